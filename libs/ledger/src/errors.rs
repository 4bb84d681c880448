//! Error types for ledger access

use crate::keys::PublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("invalid public key: {0:?}")]
    InvalidPublicKey(String),
    #[error("invalid secret seed")]
    InvalidSecret,
    #[error("invalid signature")]
    InvalidSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid amount: {0:?}")]
pub struct AmountError(pub String);

/// Errors that can occur while reading from or submitting to the ledger
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("account not found: {0}")]
    AccountNotFound(PublicKey),

    /// The network refused the transaction with a structured result code
    #[error("transaction rejected: {0}")]
    Rejected(Rejection),

    /// The gateway gave up waiting; the transaction may still commit
    #[error("submission timed out before a result was known")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error(transparent)]
    Key(#[from] KeyError),
}

impl LedgerError {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            LedgerError::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    /// Whether the outcome of a submission is unknown rather than refused
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, LedgerError::Timeout | LedgerError::Transport(_))
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LedgerError::Timeout
        } else if err.is_decode() {
            LedgerError::InvalidResponse(err.to_string())
        } else {
            LedgerError::Transport(err.to_string())
        }
    }
}

impl From<stellar_xdr::curr::Error> for LedgerError {
    fn from(err: stellar_xdr::curr::Error) -> Self {
        LedgerError::Codec(err.to_string())
    }
}

/// Broad classes of ledger rejections, coarse enough to pick a remedy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Sequence number was stale or ahead; rebuild with a fresh sequence
    BadSequence,
    /// Not enough funds for the fee or the operation
    InsufficientBalance,
    /// Signature weight did not reach the required threshold
    BadAuth,
    /// Validity window lapsed (or has not opened yet)
    Expired,
    /// Transaction or operation source account does not exist
    NoSourceAccount,
    /// Target of a create operation already exists
    AlreadyExists,
    /// Referenced entry (claimable balance, destination) does not exist
    NotFound,
    Malformed,
    Other,
}

impl RejectionKind {
    fn from_transaction_code(code: &str) -> Option<Self> {
        let kind = match code {
            "tx_bad_seq" => RejectionKind::BadSequence,
            "tx_insufficient_balance" => RejectionKind::InsufficientBalance,
            "tx_bad_auth" | "tx_bad_auth_extra" => RejectionKind::BadAuth,
            "tx_too_late" | "tx_too_early" => RejectionKind::Expired,
            "tx_no_account" | "tx_no_source_account" => RejectionKind::NoSourceAccount,
            "tx_malformed" | "tx_missing_operation" => RejectionKind::Malformed,
            _ => return None,
        };
        Some(kind)
    }

    fn from_operation_code(code: &str) -> Self {
        match code {
            "op_underfunded" | "op_low_reserve" => RejectionKind::InsufficientBalance,
            "op_already_exists" => RejectionKind::AlreadyExists,
            "op_does_not_exist" | "op_no_destination" => RejectionKind::NotFound,
            "op_bad_auth" => RejectionKind::BadAuth,
            "op_no_account" | "op_no_source_account" => RejectionKind::NoSourceAccount,
            "op_malformed" | "op_bad_signer" => RejectionKind::Malformed,
            _ => RejectionKind::Other,
        }
    }
}

/// Result codes attached to a refused transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub transaction_code: String,
    #[serde(default)]
    pub operation_codes: Vec<String>,
}

impl Rejection {
    pub fn new(transaction_code: impl Into<String>, operation_codes: Vec<String>) -> Self {
        Self {
            transaction_code: transaction_code.into(),
            operation_codes,
        }
    }

    pub fn transaction(code: impl Into<String>) -> Self {
        Self::new(code, Vec::new())
    }

    /// Classify by transaction code, falling back to the first failing operation
    pub fn kind(&self) -> RejectionKind {
        if let Some(kind) = RejectionKind::from_transaction_code(&self.transaction_code) {
            return kind;
        }

        self.operation_codes
            .iter()
            .find(|code| code.as_str() != "op_success")
            .map(|code| RejectionKind::from_operation_code(code))
            .unwrap_or(RejectionKind::Other)
    }

    /// Only sequence and expiry problems go away by rebuilding the transaction
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), RejectionKind::BadSequence | RejectionKind::Expired)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.transaction_code)?;
        if !self.operation_codes.is_empty() {
            write!(f, " [{}]", self.operation_codes.join(", "))?;
        }
        Ok(())
    }
}
