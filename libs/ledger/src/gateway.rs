use crate::amount::Lumens;
use crate::errors::LedgerError;
use crate::keys::PublicKey;
use crate::transaction::TxEnvelope;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSigner {
    pub key: PublicKey,
    pub weight: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub low: u8,
    pub med: u8,
    pub high: u8,
}

/// Snapshot of a ledger account. `signers` includes the master key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub account_id: PublicKey,
    pub sequence: i64,
    pub balance: Lumens,
    pub signers: Vec<AccountSigner>,
    pub thresholds: Thresholds,
}

impl AccountState {
    pub fn signer_weight(&self, key: &PublicKey) -> Option<u8> {
        self.signers
            .iter()
            .find(|signer| signer.key == *key)
            .map(|signer| signer.weight)
    }

    /// True when `key` is a signer with at least `weight`
    pub fn has_signer(&self, key: &PublicKey, weight: u8) -> bool {
        self.signer_weight(key).is_some_and(|w| w >= weight && w > 0)
    }
}

/// Committed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub hash: String,
    pub ledger: u32,
    pub envelope_xdr: String,
}

/// Request/response access to the ledger network
#[async_trait::async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Current state of an account; `AccountNotFound` if it was never created
    async fn load_account(&self, account: &PublicKey) -> Result<AccountState, LedgerError>;

    /// Submit a signed envelope and wait for it to commit or be rejected
    async fn submit(&self, envelope: &TxEnvelope) -> Result<SubmissionReceipt, LedgerError>;

    /// Like `load_account` but maps a missing account to `None`
    async fn find_account(&self, account: &PublicKey) -> Result<Option<AccountState>, LedgerError> {
        match self.load_account(account).await {
            Ok(state) => Ok(Some(state)),
            Err(LedgerError::AccountNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
