//! Transaction building, signing and the envelope wire codec.

use crate::amount::BASE_FEE;
use crate::errors::LedgerError;
use crate::gateway::AccountState;
use crate::keys::{Keypair, PublicKey};
use crate::network::Network;
use crate::xdr::{self, Limits, ReadXdr, WriteXdr};
use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};

/// Deepest XDR nesting accepted when decoding, matching the network's own limit
pub const MAX_XDR_DEPTH: u32 = 500;

/// Builds a transaction sequenced from a freshly loaded source account.
///
/// The account's current sequence is read from the `AccountState` handed in,
/// so callers should load the account immediately before building.
pub struct TransactionBuilder {
    source: PublicKey,
    sequence: i64,
    base_fee: u32,
    timeout_secs: Option<u64>,
    operations: Vec<xdr::Operation>,
}

impl TransactionBuilder {
    pub fn new(source: &AccountState) -> Self {
        Self {
            source: source.account_id,
            sequence: source.sequence,
            base_fee: BASE_FEE,
            timeout_secs: None,
            operations: Vec::new(),
        }
    }

    pub fn base_fee(mut self, stroops: u32) -> Self {
        self.base_fee = stroops;
        self
    }

    /// Transaction becomes permanently invalid `secs` after it is built
    pub fn set_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn add_operation(mut self, operation: xdr::Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn build(self) -> Result<TxEnvelope, LedgerError> {
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
        self.build_at(now)
    }

    /// Build with an explicit "now" (unix seconds) for the validity window
    pub fn build_at(self, now: u64) -> Result<TxEnvelope, LedgerError> {
        let timeout = self.timeout_secs.ok_or_else(|| {
            LedgerError::InvalidTransaction("transaction has no validity window".to_string())
        })?;
        if self.operations.is_empty() {
            return Err(LedgerError::InvalidTransaction(
                "transaction has no operations".to_string(),
            ));
        }

        let fee = u32::try_from(self.operations.len())
            .ok()
            .and_then(|count| count.checked_mul(self.base_fee))
            .ok_or_else(|| LedgerError::InvalidTransaction("fee overflow".to_string()))?;
        let sequence = self
            .sequence
            .checked_add(1)
            .ok_or_else(|| LedgerError::InvalidTransaction("sequence overflow".to_string()))?;

        let tx = xdr::Transaction {
            source_account: self.source.to_muxed_account(),
            fee,
            seq_num: xdr::SequenceNumber(sequence),
            cond: xdr::Preconditions::Time(xdr::TimeBounds {
                min_time: xdr::TimePoint(0),
                max_time: xdr::TimePoint(now.saturating_add(timeout)),
            }),
            memo: xdr::Memo::None,
            operations: self.operations.try_into()?,
            ext: xdr::TransactionExt::V0,
        };

        Ok(TxEnvelope::from_transaction(tx))
    }
}

/// A transaction plus the decorated signatures collected so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxEnvelope {
    inner: xdr::TransactionV1Envelope,
}

impl TxEnvelope {
    pub fn from_transaction(tx: xdr::Transaction) -> Self {
        Self {
            inner: xdr::TransactionV1Envelope {
                tx,
                signatures: xdr::VecM::default(),
            },
        }
    }

    pub fn transaction(&self) -> &xdr::Transaction {
        &self.inner.tx
    }

    pub fn source_account(&self) -> PublicKey {
        PublicKey::from_muxed_account(&self.inner.tx.source_account)
    }

    pub fn sequence(&self) -> i64 {
        self.inner.tx.seq_num.0
    }

    pub fn fee(&self) -> u32 {
        self.inner.tx.fee
    }

    /// `(min_time, max_time)` in unix seconds; zero max means unbounded
    pub fn time_bounds(&self) -> Option<(u64, u64)> {
        match &self.inner.tx.cond {
            xdr::Preconditions::Time(bounds) => Some((bounds.min_time.0, bounds.max_time.0)),
            xdr::Preconditions::V2(v2) => v2
                .time_bounds
                .as_ref()
                .map(|bounds| (bounds.min_time.0, bounds.max_time.0)),
            xdr::Preconditions::None => None,
        }
    }

    pub fn operations(&self) -> &[xdr::Operation] {
        &self.inner.tx.operations
    }

    pub fn signatures(&self) -> &[xdr::DecoratedSignature] {
        &self.inner.signatures
    }

    /// Hash that every signer signs: sha256 of the network-tagged transaction
    pub fn hash(&self, network: &Network) -> Result<[u8; 32], LedgerError> {
        let payload = xdr::TransactionSignaturePayload {
            network_id: xdr::Hash(network.network_id()),
            tagged_transaction: xdr::TransactionSignaturePayloadTaggedTransaction::Tx(
                self.inner.tx.clone(),
            ),
        };
        let bytes = payload.to_xdr(Limits::none())?;
        Ok(Sha256::digest(&bytes).into())
    }

    pub fn hash_hex(&self, network: &Network) -> Result<String, LedgerError> {
        Ok(hex::encode(self.hash(network)?))
    }

    pub fn sign(&mut self, keypair: &Keypair, network: &Network) -> Result<(), LedgerError> {
        let hash = self.hash(network)?;
        let decorated = keypair.sign_decorated(&hash)?;
        self.push_signature(decorated)
    }

    /// Attach a signature produced elsewhere; the hint is derived from `signer`
    pub fn add_signature(&mut self, signer: &PublicKey, signature: &[u8]) -> Result<(), LedgerError> {
        if signature.len() != 64 {
            return Err(LedgerError::InvalidTransaction(format!(
                "signature must be 64 bytes, got {}",
                signature.len()
            )));
        }

        self.push_signature(xdr::DecoratedSignature {
            hint: xdr::SignatureHint(signer.signature_hint()),
            signature: xdr::Signature(signature.to_vec().try_into()?),
        })
    }

    fn push_signature(&mut self, decorated: xdr::DecoratedSignature) -> Result<(), LedgerError> {
        let mut signatures = self.inner.signatures.to_vec();
        signatures.push(decorated);
        self.inner.signatures = signatures.try_into()?;
        Ok(())
    }

    pub fn add_signature_base64(&mut self, signer: &PublicKey, signature: &str) -> Result<(), LedgerError> {
        let bytes = general_purpose::STANDARD
            .decode(signature.trim())
            .map_err(|e| LedgerError::Codec(format!("signature is not base64: {e}")))?;
        self.add_signature(signer, &bytes)
    }

    pub fn to_xdr_base64(&self) -> Result<String, LedgerError> {
        let envelope = xdr::TransactionEnvelope::Tx(self.inner.clone());
        Ok(envelope.to_xdr_base64(Limits::none())?)
    }

    /// Decode an envelope from untrusted input; nesting and size are bounded
    pub fn from_xdr_base64(text: &str) -> Result<Self, LedgerError> {
        let text = text.trim();
        let limits = Limits {
            depth: MAX_XDR_DEPTH,
            len: text.len(),
        };
        match xdr::TransactionEnvelope::from_xdr_base64(text, limits)? {
            xdr::TransactionEnvelope::Tx(inner) => Ok(Self { inner }),
            xdr::TransactionEnvelope::TxV0(_) => Err(LedgerError::Codec(
                "legacy v0 envelopes are not supported".to_string(),
            )),
            xdr::TransactionEnvelope::TxFeeBump(_) => Err(LedgerError::Codec(
                "fee bump envelopes are not supported".to_string(),
            )),
        }
    }
}
