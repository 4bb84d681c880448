//! Ledger plumbing for asset issuance: keys, transaction envelopes, and the
//! gateways that submit them (Horizon over HTTP, or an in-memory simulation).

pub mod amount;
pub mod errors;
pub mod gateway;
pub mod horizon;
pub mod keys;
pub mod network;
pub mod operations;
pub mod simulated;
pub mod transaction;

pub use stellar_xdr::curr as xdr;

pub use amount::{Lumens, BASE_FEE};
pub use errors::{AmountError, KeyError, LedgerError, Rejection, RejectionKind};
pub use gateway::{AccountSigner, AccountState, LedgerGateway, SubmissionReceipt, Thresholds};
pub use horizon::HorizonGateway;
pub use keys::{Keypair, PublicKey};
pub use network::Network;
pub use simulated::SimulatedLedger;
pub use transaction::{TransactionBuilder, TxEnvelope};
