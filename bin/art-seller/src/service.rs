//! Entry point the request-handling layer calls: issue an asset for an
//! artifact, then deliver it to the buyer. No retry policy lives here.

use crate::config::SellerConfig;
use crate::delivery::{ContractDeliveryCoordinator, DeliveryReceipt};
use crate::errors::IssuanceError;
use crate::identity::{self, ArtifactRecord, AssetIdentity};
use crate::provisioner::{CustodyConfig, LedgerAccountProvisioner, ProvisioningReport, ProvisioningState};
use crate::tss::{DeliveryRequest, SignedEnvelope, TssClient, TxFunctionResponse};
use ledger::{LedgerGateway, PublicKey, SubmissionReceipt};
use std::sync::Arc;

pub struct AssetIssuanceService<G>
where
    G: LedgerGateway,
{
    config: SellerConfig,
    custody: CustodyConfig,
    provisioner: LedgerAccountProvisioner<G>,
    coordinator: ContractDeliveryCoordinator<G>,
}

impl<G> AssetIssuanceService<G>
where
    G: LedgerGateway,
{
    pub fn new(config: SellerConfig, gateway: Arc<G>, tss: TssClient) -> Self {
        let seller = config.seller.public_key();
        let custody = CustodyConfig::new(config.remote.remote_signer, seller);
        let provisioner =
            LedgerAccountProvisioner::new(gateway.clone(), config.seller.clone(), config.ledger.clone());
        let coordinator = ContractDeliveryCoordinator::new(gateway, tss, custody);

        Self {
            config,
            custody,
            provisioner,
            coordinator,
        }
    }

    pub fn config(&self) -> &SellerConfig {
        &self.config
    }

    pub fn custody(&self) -> &CustodyConfig {
        &self.custody
    }

    pub fn derive_identity(&self, record: &ArtifactRecord) -> Result<AssetIdentity, IssuanceError> {
        identity::derive(&self.config.seller, record)
    }

    /// Derive, activate and custody the asset for `record`; returns its public key.
    ///
    /// Safe to call again after any failure: the same record lands on the
    /// same account and only the missing steps are submitted.
    pub async fn issue_asset(&self, record: &ArtifactRecord) -> Result<PublicKey, IssuanceError> {
        self.issue_asset_with_report(record).await.map(|report| report.asset)
    }

    pub async fn issue_asset_with_report(
        &self,
        record: &ArtifactRecord,
    ) -> Result<ProvisioningReport, IssuanceError> {
        let asset = self.derive_identity(record)?;

        tracing::info!(asset = %asset.public_key(), artifact = %record.id, buyer = %record.name, "Issuing asset");

        self.provisioner.provision(&asset, &self.custody).await
    }

    pub async fn provisioning_state(&self, asset: &PublicKey) -> Result<ProvisioningState, IssuanceError> {
        self.provisioner.provisioning_state(asset, &self.custody).await
    }

    pub async fn deliver_asset(&self, request: &DeliveryRequest) -> Result<DeliveryReceipt, IssuanceError> {
        self.coordinator.deliver(&self.config.remote, request).await
    }

    /// Retry a delivery that the ledger refused, reusing its envelope
    pub async fn resubmit(&self, envelope: &SignedEnvelope) -> Result<SubmissionReceipt, IssuanceError> {
        self.coordinator.resubmit(envelope).await
    }

    /// Resubmit from a recorded remote reply, checked again before submission
    pub async fn resubmit_response(
        &self,
        asset: &PublicKey,
        reply: TxFunctionResponse,
    ) -> Result<SubmissionReceipt, IssuanceError> {
        self.coordinator.resubmit_response(&self.config.remote, asset, reply).await
    }
}
