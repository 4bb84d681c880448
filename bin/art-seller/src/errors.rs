//! Error taxonomy for issuance and delivery

use crate::tss::SignedEnvelope;
use ledger::{LedgerError, PublicKey};
use std::fmt;
use thiserror::Error;

/// Which ledger interaction failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lookup,
    Activation,
    SignatoryInstallation,
    Delivery,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Lookup => write!(f, "account lookup"),
            Stage::Activation => write!(f, "activation"),
            Stage::SignatoryInstallation => write!(f, "signatory installation"),
            Stage::Delivery => write!(f, "delivery"),
        }
    }
}

/// Failures talking to the remote execution service
#[derive(Debug, Error)]
pub enum RemoteServiceError {
    #[error("remote execution endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("remote execution returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("remote execution response is not valid JSON: {0}")]
    InvalidBody(String),

    #[error("remote execution returned an unusable envelope: {0}")]
    InvalidEnvelope(String),

    #[error("remote execution signed as {actual}, expected {expected}")]
    UnexpectedSigner { expected: PublicKey, actual: String },

    #[error("remote execution signature does not verify against the envelope")]
    InvalidSignature,

    #[error("remote execution client misconfigured: {0}")]
    Client(String),
}

/// Coarse kind of an `IssuanceError`, for the layer that talks to buyers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Precondition,
    LedgerRejection,
    RemoteService,
    PartialProvisioning,
}

#[derive(Debug, Error)]
pub enum IssuanceError {
    /// Malformed input caught before any network call
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("ledger refused {stage}: {source}")]
    Ledger {
        stage: Stage,
        #[source]
        source: LedgerError,
    },

    /// Account exists but custody is incomplete; `provision` again to resume
    #[error("asset account {asset} is activated but its signatories are not installed: {source}")]
    PartialProvisioning {
        asset: PublicKey,
        #[source]
        source: LedgerError,
    },

    /// Delivery asked for an asset whose signatories are not all installed
    #[error("asset account {asset} is missing {} custody signatories", .missing.len())]
    Uncustodied {
        asset: PublicKey,
        missing: Vec<PublicKey>,
    },

    #[error(transparent)]
    RemoteService(#[from] RemoteServiceError),

    /// The remote service produced a valid envelope but the ledger did not take it.
    /// Retry with `resubmit` on the carried envelope, never by asking for a new one.
    #[error("ledger refused delivery envelope {hash}: {source}")]
    DeliveryRejected {
        hash: String,
        envelope: Box<SignedEnvelope>,
        #[source]
        source: LedgerError,
    },
}

impl IssuanceError {
    pub fn ledger(stage: Stage) -> impl FnOnce(LedgerError) -> Self {
        move |source| IssuanceError::Ledger { stage, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IssuanceError::Precondition(_) => ErrorKind::Precondition,
            IssuanceError::Ledger { .. } | IssuanceError::DeliveryRejected { .. } => {
                ErrorKind::LedgerRejection
            }
            IssuanceError::PartialProvisioning { .. } | IssuanceError::Uncustodied { .. } => {
                ErrorKind::PartialProvisioning
            }
            IssuanceError::RemoteService(_) => ErrorKind::RemoteService,
        }
    }

    /// Whether calling the same operation again (or `resubmit` for delivery) can help
    pub fn is_retryable(&self) -> bool {
        match self {
            IssuanceError::Precondition(_) => false,
            IssuanceError::Ledger { source, .. } => match source {
                LedgerError::Rejected(rejection) => rejection.is_retryable(),
                other => other.is_indeterminate(),
            },
            IssuanceError::PartialProvisioning { .. } | IssuanceError::Uncustodied { .. } => true,
            IssuanceError::RemoteService(RemoteServiceError::Client(_)) => false,
            IssuanceError::RemoteService(_) => true,
            IssuanceError::DeliveryRejected { source, .. } => source.is_indeterminate(),
        }
    }

    pub fn ledger_error(&self) -> Option<&LedgerError> {
        match self {
            IssuanceError::Ledger { source, .. }
            | IssuanceError::PartialProvisioning { source, .. }
            | IssuanceError::DeliveryRejected { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Envelope to hand back to `resubmit` after a delivery rejection
    pub fn envelope(&self) -> Option<&SignedEnvelope> {
        match self {
            IssuanceError::DeliveryRejected { envelope, .. } => Some(envelope.as_ref()),
            _ => None,
        }
    }
}
