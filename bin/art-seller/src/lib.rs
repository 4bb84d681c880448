pub mod config;
pub mod delivery;
pub mod errors;
pub mod identity;
pub mod provisioner;
pub mod service;
pub mod tss;

pub use config::{ConfigError, LedgerSettings, RemoteExecutionDescriptor, SellerConfig};
pub use delivery::{ContractDeliveryCoordinator, DeliveryReceipt};
pub use errors::{ErrorKind, IssuanceError, RemoteServiceError, Stage};
pub use identity::{ArtifactRecord, AssetIdentity, SellerIdentity};
pub use provisioner::{CustodyConfig, LedgerAccountProvisioner, ProvisioningReport, ProvisioningState};
pub use service::AssetIssuanceService;
pub use tss::{DeliveryRequest, SignedEnvelope, TssClient};
