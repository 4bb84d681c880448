//! Issue and deliver against an in-process transaction-function service and
//! the in-memory ledger.

use art_seller::tss::{TxFunctionRequest, TxFunctionResponse};
use art_seller::{
    ArtifactRecord, AssetIssuanceService, DeliveryRequest, ErrorKind, IssuanceError, LedgerSettings,
    ProvisioningState, RemoteExecutionDescriptor, RemoteServiceError, SellerConfig, SellerIdentity,
    Stage, TssClient,
};
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use base64::{engine::general_purpose, Engine as _};
use ledger::{
    operations, AccountState, Keypair, LedgerError, LedgerGateway, Lumens, Network, PublicKey,
    RejectionKind, SimulatedLedger, SubmissionReceipt, TransactionBuilder, TxEnvelope,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const FUNCTION_HASH: &str = "aaa4d948605fa72d00b3902483ed6670698c5c1c8f05a190237da609a87290a2";
const SALE_PRICE: &str = "420";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Honest,
    ServerError,
    /// Signs with a key other than the configured remote signer, and says so
    WrongSigner,
    /// Claims to be the configured signer but signs with another key
    ForgedSignature,
    /// Builds the transaction from the buyer's account instead of the asset's
    ForeignSource,
    /// Pads a valid reply past any sane size
    Oversized,
}

struct MockTss {
    ledger: Arc<SimulatedLedger>,
    signer: Keypair,
    impostor: Keypair,
    mode: Mode,
    calls: AtomicUsize,
}

type Rejected = (StatusCode, String);

fn bad_request(e: impl std::fmt::Display) -> Rejected {
    (StatusCode::BAD_REQUEST, e.to_string())
}

/// Claim the buyer's payment into the asset account, pay the seller, and
/// add the buyer as a signatory
async fn tx_function(
    State(mock): State<Arc<MockTss>>,
    Json(body): Json<TxFunctionRequest>,
) -> Result<Json<TxFunctionResponse>, Rejected> {
    mock.calls.fetch_add(1, Ordering::SeqCst);
    if mock.mode == Mode::ServerError {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "function crashed".to_string()));
    }

    let buyer: PublicKey = body.nft_buyer.parse().map_err(bad_request)?;
    let asset: PublicKey = body.nft_asset.parse().map_err(bad_request)?;
    let seller: PublicKey = body.nft_seller.parse().map_err(bad_request)?;
    let price: Lumens = body.nft_sale_price.parse().map_err(bad_request)?;
    TxEnvelope::from_xdr_base64(&body.tx_function_fee).map_err(bad_request)?;

    let source = if mock.mode == Mode::ForeignSource { buyer } else { asset };
    let account = mock.ledger.load_account(&source).await.map_err(bad_request)?;
    let envelope = TransactionBuilder::new(&account)
        .set_timeout(60)
        .add_operation(operations::claim_claimable_balance(&body.claimable_balance_id).map_err(bad_request)?)
        .add_operation(operations::payment(&seller, price))
        .add_operation(operations::add_signer(&buyer, 1))
        .build()
        .map_err(bad_request)?;

    let hash = envelope.hash(mock.ledger.network()).map_err(bad_request)?;
    let (signing, reported) = match mock.mode {
        Mode::WrongSigner => (&mock.impostor, mock.impostor.public_key()),
        Mode::ForgedSignature => (&mock.impostor, mock.signer.public_key()),
        _ => (&mock.signer, mock.signer.public_key()),
    };

    let mut signer = reported.to_string();
    if mock.mode == Mode::Oversized {
        signer.push_str(&" ".repeat(512 * 1024));
    }

    Ok(Json(TxFunctionResponse {
        xdr: envelope.to_xdr_base64().map_err(bad_request)?,
        signer,
        signature: general_purpose::STANDARD.encode(signing.sign(&hash)),
    }))
}

async fn spawn_mock(mock: Arc<MockTss>) -> String {
    let app = Router::new()
        .route(&format!("/tx-functions/{FUNCTION_HASH}"), post(tx_function))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

/// Fails one chosen submission with a timeout, without applying it
struct DroppingGateway {
    inner: Arc<SimulatedLedger>,
    drop_submission: usize,
    seen: AtomicUsize,
}

#[async_trait::async_trait]
impl LedgerGateway for DroppingGateway {
    async fn load_account(&self, account: &PublicKey) -> Result<AccountState, LedgerError> {
        self.inner.load_account(account).await
    }

    async fn submit(&self, envelope: &TxEnvelope) -> Result<SubmissionReceipt, LedgerError> {
        if self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.drop_submission {
            return Err(LedgerError::Timeout);
        }
        self.inner.submit(envelope).await
    }
}

struct Harness<G: LedgerGateway> {
    ledger: Arc<SimulatedLedger>,
    mock: Arc<MockTss>,
    service: AssetIssuanceService<G>,
    seller: PublicKey,
    buyer: Keypair,
}

fn fee_authorization(seller: &Keypair, service_account: &PublicKey) -> String {
    let account = AccountState {
        account_id: seller.public_key(),
        sequence: 1,
        balance: Lumens::from_whole(10),
        signers: Vec::new(),
        thresholds: Default::default(),
    };
    let mut fee = TransactionBuilder::new(&account)
        .set_timeout(3600)
        .add_operation(operations::payment(service_account, Lumens::from_whole(1)))
        .build()
        .unwrap();
    fee.sign(seller, &Network::testnet()).unwrap();
    fee.to_xdr_base64().unwrap()
}

async fn harness_with<G, F>(mode: Mode, seller_funds: Lumens, gateway: F) -> Harness<G>
where
    G: LedgerGateway,
    F: FnOnce(Arc<SimulatedLedger>) -> Arc<G>,
{
    let ledger = Arc::new(SimulatedLedger::new(Network::testnet()));
    let seller = Keypair::from_seed(&[31u8; 32]);
    let remote_signer = Keypair::from_seed(&[32u8; 32]);
    let service_account = Keypair::from_seed(&[33u8; 32]).public_key();
    let buyer = Keypair::from_seed(&[34u8; 32]);

    ledger.fund_account(&seller.public_key(), seller_funds);
    ledger.fund_account(&buyer.public_key(), Lumens::from_whole(1_000));

    let mock = Arc::new(MockTss {
        ledger: ledger.clone(),
        signer: remote_signer.clone(),
        impostor: Keypair::from_seed(&[35u8; 32]),
        mode,
        calls: AtomicUsize::new(0),
    });
    let endpoint_base = spawn_mock(mock.clone()).await;

    let config = SellerConfig {
        seller: SellerIdentity::new(seller.clone()),
        remote: RemoteExecutionDescriptor {
            endpoint_base,
            function_hash: FUNCTION_HASH.to_string(),
            remote_signer: remote_signer.public_key(),
            service_account,
            sale_price: SALE_PRICE.to_string(),
            fee_authorization: fee_authorization(&seller, &service_account),
        },
        ledger: LedgerSettings::default(),
        tss_timeout_secs: 5,
    };
    let tss = TssClient::new(Duration::from_secs(5), Network::testnet()).unwrap();
    let service = AssetIssuanceService::new(config, gateway(ledger.clone()), tss);

    Harness {
        ledger,
        mock,
        service,
        seller: seller.public_key(),
        buyer,
    }
}

async fn harness(mode: Mode) -> Harness<SimulatedLedger> {
    harness_with(mode, Lumens::from_whole(100), |ledger| ledger).await
}

fn record() -> ArtifactRecord {
    ArtifactRecord::new("abc123", "buyer1", "https://x/img.png")
}

impl<G: LedgerGateway> Harness<G> {
    /// Buyer's payment for `asset`, parked where only the asset account can claim it
    fn pay_for(&self, asset: &PublicKey) -> String {
        self.ledger.create_claimable_balance(asset, Lumens::from_whole(425))
    }
}

#[tokio::test]
async fn test_issue_and_deliver() {
    let h = harness(Mode::Honest).await;

    let asset = h.service.issue_asset(&record()).await.unwrap();
    assert_eq!(h.service.provisioning_state(&asset).await.unwrap(), ProvisioningState::Custodied);

    let seller_before = h.ledger.balance(&h.seller).unwrap();
    let claim = h.pay_for(&asset);
    let request = DeliveryRequest::new(h.buyer.public_key(), asset, claim.clone());

    let delivery = h.service.deliver_asset(&request).await.unwrap();
    assert_eq!(delivery.asset, asset);
    assert_eq!(delivery.buyer, h.buyer.public_key());
    assert!(h.ledger.committed().contains(&delivery.receipt.hash));

    let account = h.ledger.account(&asset).unwrap();
    assert!(account.has_signer(&h.buyer.public_key(), 1));
    assert!(!h.ledger.claimable_balance_exists(&claim));
    assert_eq!(
        h.ledger.balance(&h.seller),
        seller_before.checked_add(Lumens::from_whole(420))
    );
}

#[tokio::test]
async fn test_issue_is_deterministic_and_idempotent() {
    let h = harness(Mode::Honest).await;

    let first = h.service.issue_asset(&record()).await.unwrap();
    let submissions = h.ledger.submission_count();
    let seller_balance = h.ledger.balance(&h.seller);

    let second = h.service.issue_asset(&record()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.ledger.submission_count(), submissions);
    assert_eq!(h.ledger.balance(&h.seller), seller_balance);
}

#[tokio::test]
async fn test_remote_failure_submits_nothing() {
    let h = harness(Mode::ServerError).await;
    let asset = h.service.issue_asset(&record()).await.unwrap();
    let submissions = h.ledger.submission_count();

    let request = DeliveryRequest::new(h.buyer.public_key(), asset, h.pay_for(&asset));
    let err = h.service.deliver_asset(&request).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RemoteService);
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        IssuanceError::RemoteService(RemoteServiceError::Status { status: 500, .. })
    ));
    assert_eq!(h.ledger.submission_count(), submissions);
    assert_eq!(h.mock.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejects_envelope_from_unexpected_signer() {
    let h = harness(Mode::WrongSigner).await;
    let asset = h.service.issue_asset(&record()).await.unwrap();
    let submissions = h.ledger.submission_count();

    let request = DeliveryRequest::new(h.buyer.public_key(), asset, h.pay_for(&asset));
    let err = h.service.deliver_asset(&request).await.unwrap_err();

    assert!(matches!(
        err,
        IssuanceError::RemoteService(RemoteServiceError::UnexpectedSigner { .. })
    ));
    assert_eq!(h.ledger.submission_count(), submissions);
}

#[tokio::test]
async fn test_rejects_forged_signature() {
    let h = harness(Mode::ForgedSignature).await;
    let asset = h.service.issue_asset(&record()).await.unwrap();
    let submissions = h.ledger.submission_count();

    let request = DeliveryRequest::new(h.buyer.public_key(), asset, h.pay_for(&asset));
    let err = h.service.deliver_asset(&request).await.unwrap_err();

    assert!(matches!(
        err,
        IssuanceError::RemoteService(RemoteServiceError::InvalidSignature)
    ));
    assert_eq!(h.ledger.submission_count(), submissions);
}

#[tokio::test]
async fn test_underfunded_seller_leaves_no_account() {
    let h = harness_with(Mode::Honest, Lumens::from_whole(3), |ledger| ledger).await;

    let err = h.service.issue_asset(&record()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LedgerRejection);
    assert!(matches!(err, IssuanceError::Ledger { stage: Stage::Activation, .. }));

    let asset = h.service.derive_identity(&record()).unwrap().into_public_key();
    assert!(h.ledger.account(&asset).is_none());
    assert_eq!(h.service.provisioning_state(&asset).await.unwrap(), ProvisioningState::Absent);
}

#[tokio::test]
async fn test_resume_after_lost_signatory_submission() {
    // Activation commits, the signatory installation is lost in transit
    let h = harness_with(Mode::Honest, Lumens::from_whole(100), |ledger| {
        Arc::new(DroppingGateway {
            inner: ledger,
            drop_submission: 2,
            seen: AtomicUsize::new(0),
        })
    })
    .await;

    let err = h.service.issue_asset(&record()).await.unwrap_err();
    let asset = match err {
        IssuanceError::PartialProvisioning { asset, .. } => asset,
        other => panic!("expected partial provisioning, got {other:?}"),
    };
    assert_eq!(h.service.provisioning_state(&asset).await.unwrap(), ProvisioningState::Activated);

    let seller_balance = h.ledger.balance(&h.seller);
    let resumed = h.service.issue_asset(&record()).await.unwrap();

    assert_eq!(resumed, asset);
    assert_eq!(h.service.provisioning_state(&asset).await.unwrap(), ProvisioningState::Custodied);
    // Resume pays no second activation
    assert_eq!(h.ledger.balance(&h.seller), seller_balance);
}

#[tokio::test]
async fn test_second_delivery_cannot_transfer_again() {
    let h = harness(Mode::Honest).await;
    let asset = h.service.issue_asset(&record()).await.unwrap();
    let request = DeliveryRequest::new(h.buyer.public_key(), asset, h.pay_for(&asset));

    let first = h.service.deliver_asset(&request).await.unwrap();

    let err = h.service.deliver_asset(&request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LedgerRejection);
    assert_eq!(
        err.ledger_error().and_then(|e| e.rejection()).map(|r| r.kind()),
        Some(RejectionKind::NotFound)
    );
    assert!(err.envelope().is_some());

    // The already-committed envelope cannot be replayed either
    let err = h.service.resubmit(&first.envelope).await.unwrap_err();
    assert_eq!(
        err.ledger_error().and_then(|e| e.rejection()).map(|r| r.kind()),
        Some(RejectionKind::BadSequence)
    );
    assert_eq!(h.ledger.committed().iter().filter(|hash| **hash == first.receipt.hash).count(), 1);
}

#[tokio::test]
async fn test_lapsed_envelope_is_refused() {
    let h = harness(Mode::Honest).await;
    let asset = h.service.issue_asset(&record()).await.unwrap();
    let claim = h.pay_for(&asset);
    let request = DeliveryRequest::new(h.buyer.public_key(), asset, claim.clone());

    let tss = TssClient::new(Duration::from_secs(5), Network::testnet()).unwrap();
    let signed = tss
        .execute(&h.service.config().remote, &h.seller, &request)
        .await
        .unwrap();

    h.ledger.advance_clock(3_600);

    let err = h.service.resubmit(&signed).await.unwrap_err();
    assert!(matches!(err, IssuanceError::DeliveryRejected { .. }));
    assert_eq!(
        err.ledger_error().and_then(|e| e.rejection()).map(|r| r.kind()),
        Some(RejectionKind::Expired)
    );
    assert!(!err.is_retryable());
    assert!(h.ledger.claimable_balance_exists(&claim));
}

#[tokio::test]
async fn test_delivery_before_issue_is_refused_locally() {
    let h = harness(Mode::Honest).await;
    let asset = h.service.derive_identity(&record()).unwrap().into_public_key();

    let request = DeliveryRequest::new(h.buyer.public_key(), asset, "claim-1");
    let err = h.service.deliver_asset(&request).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(h.mock.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.ledger.submission_count(), 0);
}

#[tokio::test]
async fn test_delivery_of_half_provisioned_asset_never_reaches_remote() {
    let h = harness_with(Mode::Honest, Lumens::from_whole(100), |ledger| {
        Arc::new(DroppingGateway {
            inner: ledger,
            drop_submission: 2,
            seen: AtomicUsize::new(0),
        })
    })
    .await;

    let asset = match h.service.issue_asset(&record()).await.unwrap_err() {
        IssuanceError::PartialProvisioning { asset, .. } => asset,
        other => panic!("expected partial provisioning, got {other:?}"),
    };
    let submissions = h.ledger.submission_count();
    let claim = h.pay_for(&asset);

    let request = DeliveryRequest::new(h.buyer.public_key(), asset, claim.clone());
    let err = h.service.deliver_asset(&request).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PartialProvisioning);
    match &err {
        IssuanceError::Uncustodied { asset: refused, missing } => {
            assert_eq!(*refused, asset);
            assert_eq!(missing.len(), 2);
        }
        other => panic!("expected uncustodied asset, got {other:?}"),
    }
    assert_eq!(h.mock.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.ledger.submission_count(), submissions);
    assert!(h.ledger.claimable_balance_exists(&claim));

    // Finishing custody unblocks the same request
    h.service.issue_asset(&record()).await.unwrap();
    h.service.deliver_asset(&request).await.unwrap();
    assert_eq!(h.mock.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejects_envelope_for_another_account() {
    let h = harness(Mode::ForeignSource).await;
    let asset = h.service.issue_asset(&record()).await.unwrap();
    let submissions = h.ledger.submission_count();

    let request = DeliveryRequest::new(h.buyer.public_key(), asset, h.pay_for(&asset));
    let err = h.service.deliver_asset(&request).await.unwrap_err();

    assert!(matches!(
        err,
        IssuanceError::RemoteService(RemoteServiceError::InvalidEnvelope(_))
    ));
    assert_eq!(h.ledger.submission_count(), submissions);
}

#[tokio::test]
async fn test_oversized_reply_is_not_buffered() {
    let h = harness(Mode::Oversized).await;
    let asset = h.service.issue_asset(&record()).await.unwrap();
    let submissions = h.ledger.submission_count();

    let request = DeliveryRequest::new(h.buyer.public_key(), asset, h.pay_for(&asset));
    let err = h.service.deliver_asset(&request).await.unwrap_err();

    assert!(matches!(
        &err,
        IssuanceError::RemoteService(RemoteServiceError::InvalidBody(message)) if message.contains("exceeds")
    ));
    assert_eq!(h.ledger.submission_count(), submissions);
}

#[tokio::test]
async fn test_resubmit_from_recorded_reply() {
    // Activation and custody commit; the delivery submission is lost in transit
    let h = harness_with(Mode::Honest, Lumens::from_whole(100), |ledger| {
        Arc::new(DroppingGateway {
            inner: ledger,
            drop_submission: 3,
            seen: AtomicUsize::new(0),
        })
    })
    .await;
    let asset = h.service.issue_asset(&record()).await.unwrap();
    let claim = h.pay_for(&asset);

    let request = DeliveryRequest::new(h.buyer.public_key(), asset, claim.clone());
    let err = h.service.deliver_asset(&request).await.unwrap_err();
    assert!(err.is_retryable());
    let signed = err.envelope().unwrap().clone();

    // What an operator copies out of the failure log
    let reply = TxFunctionResponse {
        xdr: signed.envelope.to_xdr_base64().unwrap(),
        signer: signed.signer.to_string(),
        signature: general_purpose::STANDARD.encode(&signed.signature),
    };
    let receipt = h.service.resubmit_response(&asset, reply.clone()).await.unwrap();

    assert!(h.ledger.committed().contains(&receipt.hash));
    assert!(!h.ledger.claimable_balance_exists(&claim));
    assert_eq!(h.mock.calls.load(Ordering::SeqCst), 1);

    // A reply for a different asset is refused before submission
    let other = Keypair::from_seed(&[36u8; 32]).public_key();
    let err = h.service.resubmit_response(&other, reply).await.unwrap_err();
    assert!(matches!(
        err,
        IssuanceError::RemoteService(RemoteServiceError::InvalidEnvelope(_))
    ));
}
