use crate::errors::IssuanceError;
use ledger::{LedgerError, Network, PublicKey, TxEnvelope};
use serde::{Deserialize, Serialize};

/// One sale: who buys which asset, paid through which claimable balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub buyer_wallet: PublicKey,
    pub asset_public_key: PublicKey,
    pub claim_reference: String,
}

impl DeliveryRequest {
    pub fn new(buyer_wallet: PublicKey, asset_public_key: PublicKey, claim_reference: impl Into<String>) -> Self {
        Self {
            buyer_wallet,
            asset_public_key,
            claim_reference: claim_reference.into(),
        }
    }

    pub fn validate(&self) -> Result<(), IssuanceError> {
        if self.claim_reference.trim().is_empty() {
            return Err(IssuanceError::Precondition(
                "delivery request is missing `claim_reference`".to_string(),
            ));
        }
        if self.buyer_wallet == self.asset_public_key {
            return Err(IssuanceError::Precondition(
                "buyer wallet cannot be the asset account".to_string(),
            ));
        }
        Ok(())
    }
}

/// Body of `POST {endpoint}/tx-functions/{hash}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxFunctionRequest {
    pub nft_buyer: String,
    pub nft_asset: String,
    pub nft_seller: String,
    pub claimable_balance_id: String,
    pub signer: String,
    pub nft_sale_price: String,
    #[serde(rename = "txFunctionFee")]
    pub tx_function_fee: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxFunctionResponse {
    /// Base64 XDR of the unsigned transaction
    pub xdr: String,
    pub signer: String,
    /// Base64 ed25519 signature over the transaction hash
    pub signature: String,
}

/// Envelope built and authorized by the remote service, already checked
/// against the configured signer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope {
    pub envelope: TxEnvelope,
    pub signer: PublicKey,
    pub signature: Vec<u8>,
}

impl SignedEnvelope {
    /// Envelope with the remote signature attached, ready to submit
    pub fn finalize(&self) -> Result<TxEnvelope, LedgerError> {
        let mut envelope = self.envelope.clone();
        let hint = self.signer.signature_hint();
        let attached = envelope
            .signatures()
            .iter()
            .any(|decorated| decorated.hint.0 == hint && decorated.signature.0.as_slice() == self.signature.as_slice());
        if !attached {
            envelope.add_signature(&self.signer, &self.signature)?;
        }
        Ok(envelope)
    }

    pub fn hash_hex(&self, network: &Network) -> Result<String, LedgerError> {
        self.envelope.hash_hex(network)
    }
}
