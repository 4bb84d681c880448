use super::types::{AccountResponse, ProblemResponse, TransactionResponse};
use crate::errors::LedgerError;
use crate::gateway::{AccountState, LedgerGateway, SubmissionReceipt};
use crate::keys::PublicKey;
use crate::network::Network;
use crate::transaction::TxEnvelope;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Ledger gateway backed by a Horizon server
#[derive(Clone)]
pub struct HorizonGateway {
    client: Client,
    base_url: String,
    network: Network,
}

impl HorizonGateway {
    pub fn new(network: Network, timeout: Duration) -> Result<Self, LedgerError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: network.horizon_url.trim_end_matches('/').to_string(),
            network,
        })
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    async fn problem(response: reqwest::Response) -> LedgerError {
        let status = response.status();
        match response.json::<ProblemResponse>().await {
            Ok(problem) => match problem.rejection() {
                Some(rejection) => LedgerError::Rejected(rejection),
                None => LedgerError::InvalidResponse(format!(
                    "HTTP {}: {}",
                    status,
                    problem.detail.unwrap_or(problem.title)
                )),
            },
            Err(e) => LedgerError::InvalidResponse(format!("HTTP {}: {}", status, e)),
        }
    }
}

#[async_trait::async_trait]
impl LedgerGateway for HorizonGateway {
    async fn load_account(&self, account: &PublicKey) -> Result<AccountState, LedgerError> {
        let url = format!("{}/accounts/{}", self.base_url, account);

        tracing::debug!(%account, "Loading account");

        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(LedgerError::AccountNotFound(*account)),
            status if status.is_success() => {
                let body: AccountResponse = response.json().await?;
                AccountState::try_from(body)
            }
            _ => Err(Self::problem(response).await),
        }
    }

    async fn submit(&self, envelope: &TxEnvelope) -> Result<SubmissionReceipt, LedgerError> {
        let url = format!("{}/transactions", self.base_url);
        let tx = envelope.to_xdr_base64()?;

        tracing::debug!(
            source = %envelope.source_account(),
            sequence = envelope.sequence(),
            operations = envelope.operations().len(),
            "Submitting transaction"
        );

        let response = self.client.post(&url).form(&[("tx", tx.as_str())]).send().await?;

        match response.status() {
            status if status.is_success() => {
                let body: TransactionResponse = response.json().await?;
                if !body.successful {
                    return Err(LedgerError::InvalidResponse(format!(
                        "transaction {} reported unsuccessful",
                        body.hash
                    )));
                }

                tracing::info!(hash = %body.hash, ledger = body.ledger, "Transaction committed");

                Ok(SubmissionReceipt {
                    hash: body.hash,
                    ledger: body.ledger,
                    envelope_xdr: if body.envelope_xdr.is_empty() { tx } else { body.envelope_xdr },
                })
            }
            StatusCode::GATEWAY_TIMEOUT => {
                tracing::warn!("Horizon timed out waiting for the transaction; outcome unknown");
                Err(LedgerError::Timeout)
            }
            _ => {
                let err = Self::problem(response).await;
                tracing::warn!(error = %err, "Transaction rejected");
                Err(err)
            }
        }
    }
}
