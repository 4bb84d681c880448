//! Ledger account bootstrapping for issued assets.
//!
//! Provisioning is two submissions in strict order: the seller funds the
//! asset account into existence, then the asset account adds its custody
//! signatories. Either step can be repeated safely, so `provision` inspects
//! the ledger first and only submits what is still missing.

use crate::config::LedgerSettings;
use crate::errors::{IssuanceError, Stage};
use crate::identity::{AssetIdentity, SellerIdentity};
use ledger::{
    operations, AccountState, LedgerError, LedgerGateway, PublicKey, RejectionKind,
    SubmissionReceipt, TransactionBuilder,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Signatories installed on every asset account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustodyConfig {
    pub remote_signer: PublicKey,
    pub seller: PublicKey,
    pub weight: u8,
}

impl CustodyConfig {
    /// Remote signer and seller at weight 1 each, with default thresholds
    pub fn new(remote_signer: PublicKey, seller: PublicKey) -> Self {
        Self {
            remote_signer,
            seller,
            weight: 1,
        }
    }

    pub fn signatories(&self) -> [PublicKey; 2] {
        [self.remote_signer, self.seller]
    }

    /// Signatories not yet present on `account` at the required weight
    pub fn missing(&self, account: &AccountState) -> Vec<PublicKey> {
        self.signatories()
            .into_iter()
            .filter(|key| !account.has_signer(key, self.weight))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    /// No account on the ledger
    Absent,
    /// Account exists but one or more signatories are missing
    Activated,
    /// Ready for delivery
    Custodied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningReport {
    pub asset: PublicKey,
    /// `None` when the account already existed
    pub activation: Option<SubmissionReceipt>,
    /// `None` when every signatory was already installed
    pub signatories: Option<SubmissionReceipt>,
}

pub struct LedgerAccountProvisioner<G>
where
    G: LedgerGateway,
{
    gateway: Arc<G>,
    seller: SellerIdentity,
    settings: LedgerSettings,
    /// Activations spend from the seller account and must not race on its sequence
    activation_lock: Mutex<()>,
}

impl<G> LedgerAccountProvisioner<G>
where
    G: LedgerGateway,
{
    pub fn new(gateway: Arc<G>, seller: SellerIdentity, settings: LedgerSettings) -> Self {
        Self {
            gateway,
            seller,
            settings,
            activation_lock: Mutex::new(()),
        }
    }

    pub async fn provisioning_state(
        &self,
        asset: &PublicKey,
        custody: &CustodyConfig,
    ) -> Result<ProvisioningState, IssuanceError> {
        let account = self
            .gateway
            .find_account(asset)
            .await
            .map_err(IssuanceError::ledger(Stage::Lookup))?;

        Ok(match account {
            None => ProvisioningState::Absent,
            Some(account) if custody.missing(&account).is_empty() => ProvisioningState::Custodied,
            Some(_) => ProvisioningState::Activated,
        })
    }

    /// Create `asset` funded with the configured starting balance.
    ///
    /// Returns `Ok(None)` if the account already exists, including when the
    /// ledger reports it was created by a concurrent or earlier submission.
    pub async fn activate(&self, asset: &PublicKey) -> Result<Option<SubmissionReceipt>, IssuanceError> {
        let _guard = self.activation_lock.lock().await;

        let existing = self
            .gateway
            .find_account(asset)
            .await
            .map_err(IssuanceError::ledger(Stage::Lookup))?;
        if existing.is_some() {
            tracing::info!(asset = %asset, "Asset account already active, skipping activation");
            return Ok(None);
        }

        let seller = self
            .gateway
            .load_account(&self.seller.public_key())
            .await
            .map_err(IssuanceError::ledger(Stage::Activation))?;

        let mut envelope = TransactionBuilder::new(&seller)
            .base_fee(self.settings.base_fee)
            .set_timeout(self.settings.tx_timeout_secs)
            .add_operation(operations::create_account(asset, self.settings.starting_balance))
            .build()
            .map_err(IssuanceError::ledger(Stage::Activation))?;
        envelope
            .sign(self.seller.keypair(), &self.settings.network)
            .map_err(IssuanceError::ledger(Stage::Activation))?;

        tracing::info!(
            asset = %asset,
            seller = %seller.account_id,
            sequence = envelope.sequence(),
            starting_balance = %self.settings.starting_balance,
            "Activating asset account"
        );

        match self.gateway.submit(&envelope).await {
            Ok(receipt) => {
                tracing::info!(asset = %asset, hash = %receipt.hash, ledger = receipt.ledger, "Asset account activated");
                Ok(Some(receipt))
            }
            Err(LedgerError::Rejected(rejection)) if rejection.kind() == RejectionKind::AlreadyExists => {
                tracing::info!(asset = %asset, "Asset account was activated elsewhere");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(asset = %asset, error = %e, "Activation rejected");
                Err(IssuanceError::Ledger {
                    stage: Stage::Activation,
                    source: e,
                })
            }
        }
    }

    /// Add whichever custody signatories `asset` still lacks.
    ///
    /// Fails with `AccountNotFound` if the account was never activated.
    pub async fn install_signatories(
        &self,
        asset: &AssetIdentity,
        custody: &CustodyConfig,
    ) -> Result<Option<SubmissionReceipt>, IssuanceError> {
        self.submit_signatories(asset, custody)
            .await
            .map_err(IssuanceError::ledger(Stage::SignatoryInstallation))
    }

    /// Bring `asset` to `Custodied`, resuming from whatever state the ledger shows
    pub async fn provision(
        &self,
        asset: &AssetIdentity,
        custody: &CustodyConfig,
    ) -> Result<ProvisioningReport, IssuanceError> {
        let public_key = asset.public_key();
        let state = self.provisioning_state(&public_key, custody).await?;

        tracing::debug!(asset = %public_key, state = ?state, "Provisioning asset account");

        let activation = match state {
            ProvisioningState::Custodied => {
                return Ok(ProvisioningReport {
                    asset: public_key,
                    activation: None,
                    signatories: None,
                });
            }
            ProvisioningState::Absent => self.activate(&public_key).await?,
            ProvisioningState::Activated => None,
        };

        let signatories = self
            .submit_signatories(asset, custody)
            .await
            .map_err(|source| {
                tracing::error!(asset = %public_key, error = %source, "Asset account left without custody signatories");
                IssuanceError::PartialProvisioning {
                    asset: public_key,
                    source,
                }
            })?;

        Ok(ProvisioningReport {
            asset: public_key,
            activation,
            signatories,
        })
    }

    async fn submit_signatories(
        &self,
        asset: &AssetIdentity,
        custody: &CustodyConfig,
    ) -> Result<Option<SubmissionReceipt>, LedgerError> {
        let account = self.gateway.load_account(&asset.public_key()).await?;

        let missing = custody.missing(&account);
        if missing.is_empty() {
            return Ok(None);
        }

        let mut builder = TransactionBuilder::new(&account)
            .base_fee(self.settings.base_fee)
            .set_timeout(self.settings.tx_timeout_secs);
        for key in &missing {
            builder = builder.add_operation(operations::add_signer(key, custody.weight));
        }
        let mut envelope = builder.build()?;
        envelope.sign(asset.keypair(), &self.settings.network)?;

        tracing::info!(
            asset = %account.account_id,
            signatories = missing.len(),
            sequence = envelope.sequence(),
            "Installing custody signatories"
        );

        let receipt = self.gateway.submit(&envelope).await?;

        tracing::info!(asset = %account.account_id, hash = %receipt.hash, "Custody signatories installed");

        Ok(Some(receipt))
    }
}
