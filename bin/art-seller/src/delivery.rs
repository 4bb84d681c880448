use crate::config::RemoteExecutionDescriptor;
use crate::errors::{IssuanceError, Stage};
use crate::provisioner::CustodyConfig;
use crate::tss::{DeliveryRequest, SignedEnvelope, TssClient, TxFunctionResponse};
use ledger::{LedgerError, LedgerGateway, PublicKey, SubmissionReceipt};
use std::sync::Arc;

/// Committed handoff of an asset to its buyer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub asset: PublicKey,
    pub buyer: PublicKey,
    pub receipt: SubmissionReceipt,
    pub envelope: SignedEnvelope,
}

/// Obtains the remote service's authorized envelope for a sale and submits it.
///
/// No seller secret is used here: the remote signer alone satisfies the
/// asset account's thresholds.
pub struct ContractDeliveryCoordinator<G>
where
    G: LedgerGateway,
{
    gateway: Arc<G>,
    tss: TssClient,
    custody: CustodyConfig,
}

impl<G> ContractDeliveryCoordinator<G>
where
    G: LedgerGateway,
{
    pub fn new(gateway: Arc<G>, tss: TssClient, custody: CustodyConfig) -> Self {
        Self { gateway, tss, custody }
    }

    /// Deliver `request.asset_public_key` to its buyer.
    ///
    /// The asset account must be activated and hold every custody
    /// signatory before the remote service is called.
    pub async fn deliver(
        &self,
        remote: &RemoteExecutionDescriptor,
        request: &DeliveryRequest,
    ) -> Result<DeliveryReceipt, IssuanceError> {
        request.validate()?;
        self.ensure_custody(&request.asset_public_key).await?;

        let signed = self.tss.execute(remote, &self.custody.seller, request).await?;
        let receipt = self.resubmit(&signed).await?;

        tracing::info!(
            asset = %request.asset_public_key,
            buyer = %request.buyer_wallet,
            hash = %receipt.hash,
            ledger = receipt.ledger,
            "Asset delivered"
        );

        Ok(DeliveryReceipt {
            asset: request.asset_public_key,
            buyer: request.buyer_wallet,
            receipt,
            envelope: signed,
        })
    }

    async fn ensure_custody(&self, asset: &PublicKey) -> Result<(), IssuanceError> {
        let account = self
            .gateway
            .find_account(asset)
            .await
            .map_err(IssuanceError::ledger(Stage::Lookup))?
            .ok_or_else(|| IssuanceError::Precondition(format!("asset account {asset} is not activated")))?;

        let missing = self.custody.missing(&account);
        if !missing.is_empty() {
            tracing::warn!(%asset, missing = missing.len(), "Refusing delivery of uncustodied asset");
            return Err(IssuanceError::Uncustodied { asset: *asset, missing });
        }
        Ok(())
    }

    /// Check a reply recorded from an earlier execution and submit it
    pub async fn resubmit_response(
        &self,
        remote: &RemoteExecutionDescriptor,
        asset: &PublicKey,
        reply: TxFunctionResponse,
    ) -> Result<SubmissionReceipt, IssuanceError> {
        let signed = self.tss.verify(remote, asset, reply)?;
        self.resubmit(&signed).await
    }

    /// Submit an envelope the remote service already authorized.
    ///
    /// This is the only retry path after a ledger failure; a fresh envelope
    /// is never requested for the same sale.
    pub async fn resubmit(&self, signed: &SignedEnvelope) -> Result<SubmissionReceipt, IssuanceError> {
        let rejected = |source: LedgerError| IssuanceError::DeliveryRejected {
            hash: signed.hash_hex(self.tss.network()).unwrap_or_default(),
            envelope: Box::new(signed.clone()),
            source,
        };

        let envelope = signed.finalize().map_err(rejected)?;

        tracing::debug!(
            source = %envelope.source_account(),
            sequence = envelope.sequence(),
            signer = %signed.signer,
            "Submitting delivery envelope"
        );

        self.gateway.submit(&envelope).await.map_err(|e| {
            tracing::warn!(error = %e, source = %envelope.source_account(), "Delivery envelope rejected");
            rejected(e)
        })
    }
}
