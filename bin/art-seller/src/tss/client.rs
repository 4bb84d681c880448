use super::types::{DeliveryRequest, SignedEnvelope, TxFunctionRequest, TxFunctionResponse};
use crate::config::RemoteExecutionDescriptor;
use crate::errors::RemoteServiceError;
use base64::{engine::general_purpose, Engine as _};
use ledger::{Network, PublicKey, TxEnvelope};
use reqwest::Client;
use std::time::Duration;

/// Longest slice of an error body kept in `RemoteServiceError::Status`
const MAX_ERROR_BODY: usize = 512;

/// Largest response body read from the service
pub const MAX_RESPONSE_BODY: usize = 256 * 1024;

/// Client for the remote transaction-function service
#[derive(Clone)]
pub struct TssClient {
    client: Client,
    network: Network,
}

impl TssClient {
    pub fn new(timeout: Duration, network: Network) -> Result<Self, RemoteServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteServiceError::Client(e.to_string()))?;

        Ok(Self { client, network })
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Run the configured function for one sale and return its authorized envelope.
    ///
    /// The response is only accepted if the envelope decodes, was signed by
    /// `remote.remote_signer`, and the signature verifies against the
    /// envelope hash on this client's network.
    pub async fn execute(
        &self,
        remote: &RemoteExecutionDescriptor,
        seller: &PublicKey,
        request: &DeliveryRequest,
    ) -> Result<SignedEnvelope, RemoteServiceError> {
        let url = remote.function_url();
        let body = TxFunctionRequest {
            nft_buyer: request.buyer_wallet.to_string(),
            nft_asset: request.asset_public_key.to_string(),
            nft_seller: seller.to_string(),
            claimable_balance_id: request.claim_reference.clone(),
            signer: remote.remote_signer.to_string(),
            nft_sale_price: remote.sale_price.clone(),
            tx_function_fee: remote.fee_authorization.clone(),
        };

        tracing::debug!(
            url = %url,
            asset = %request.asset_public_key,
            buyer = %request.buyer_wallet,
            claim = %request.claim_reference,
            "Requesting transaction function execution"
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RemoteServiceError::Unreachable(e.to_string()))?;

        let status = response.status();
        let text = read_capped(response).await?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Transaction function execution failed");
            return Err(RemoteServiceError::Status {
                status: status.as_u16(),
                body: truncate(&text),
            });
        }

        let reply: TxFunctionResponse = serde_json::from_str(&text)
            .map_err(|e| RemoteServiceError::InvalidBody(e.to_string()))?;

        self.verify(remote, &request.asset_public_key, reply)
    }

    /// Accept `reply` only if it spends from `asset` and carries a valid
    /// signature by `remote.remote_signer`
    pub fn verify(
        &self,
        remote: &RemoteExecutionDescriptor,
        asset: &PublicKey,
        reply: TxFunctionResponse,
    ) -> Result<SignedEnvelope, RemoteServiceError> {
        let envelope = TxEnvelope::from_xdr_base64(&reply.xdr)
            .map_err(|e| RemoteServiceError::InvalidEnvelope(e.to_string()))?;
        if envelope.source_account() != *asset {
            return Err(RemoteServiceError::InvalidEnvelope(format!(
                "source account {} is not asset {}",
                envelope.source_account(),
                asset
            )));
        }

        let signer: PublicKey = reply
            .signer
            .trim()
            .parse()
            .map_err(|_| RemoteServiceError::UnexpectedSigner {
                expected: remote.remote_signer,
                actual: reply.signer.clone(),
            })?;
        if signer != remote.remote_signer {
            return Err(RemoteServiceError::UnexpectedSigner {
                expected: remote.remote_signer,
                actual: reply.signer,
            });
        }

        let signature = general_purpose::STANDARD
            .decode(reply.signature.trim())
            .map_err(|_| RemoteServiceError::InvalidSignature)?;
        let hash = envelope
            .hash(&self.network)
            .map_err(|e| RemoteServiceError::InvalidEnvelope(e.to_string()))?;
        signer
            .verify(&hash, &signature)
            .map_err(|_| RemoteServiceError::InvalidSignature)?;

        tracing::info!(
            hash = %hex::encode(hash),
            source = %envelope.source_account(),
            operations = envelope.operations().len(),
            "Received authorized delivery envelope"
        );

        Ok(SignedEnvelope {
            envelope,
            signer,
            signature,
        })
    }
}

async fn read_capped(mut response: reqwest::Response) -> Result<String, RemoteServiceError> {
    let too_large = || RemoteServiceError::InvalidBody(format!("response exceeds {MAX_RESPONSE_BODY} bytes"));

    if response.content_length().is_some_and(|len| len > MAX_RESPONSE_BODY as u64) {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| RemoteServiceError::Unreachable(e.to_string()))?
    {
        if body.len() + chunk.len() > MAX_RESPONSE_BODY {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&body).into_owned())
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
