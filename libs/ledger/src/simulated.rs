//! In-memory ledger for tests and dry runs.
//!
//! Applies the subset of network rules the issuance protocol relies on:
//! - sequence numbers must advance by exactly one
//! - the source account must exist
//! - the validity window must still be open
//! - signatures must reach the threshold for every account they authorize
//! - fees and transfers must be covered by the balance
//!
//! A transaction whose operations fail still pays its fee and consumes its
//! sequence number, matching how the real network treats `tx_failed`.

use crate::amount::Lumens;
use crate::errors::{LedgerError, Rejection};
use crate::gateway::{AccountSigner, AccountState, LedgerGateway, SubmissionReceipt, Thresholds};
use crate::keys::PublicKey;
use crate::network::Network;
use crate::operations::{format_balance_id, parse_balance_id};
use crate::transaction::TxEnvelope;
use crate::xdr;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Smallest balance a new account may start with
const MIN_STARTING_BALANCE: Lumens = Lumens::from_whole(1);

#[derive(Debug, Clone)]
struct SimAccount {
    balance: Lumens,
    sequence: i64,
    master_weight: u8,
    signers: Vec<AccountSigner>,
    thresholds: Thresholds,
}

impl SimAccount {
    fn new(balance: Lumens, ledger: u32) -> Self {
        Self {
            balance,
            sequence: i64::from(ledger) << 32,
            master_weight: 1,
            signers: Vec::new(),
            thresholds: Thresholds::default(),
        }
    }

    fn weight_of(&self, id: &PublicKey, key: &PublicKey) -> u8 {
        if key == id {
            return self.master_weight;
        }
        self.signers
            .iter()
            .find(|signer| signer.key == *key)
            .map(|signer| signer.weight)
            .unwrap_or(0)
    }

    fn candidate_keys(&self, id: &PublicKey) -> Vec<PublicKey> {
        let mut keys = vec![*id];
        keys.extend(self.signers.iter().map(|signer| signer.key));
        keys
    }

    fn snapshot(&self, id: PublicKey) -> AccountState {
        let mut signers = self.signers.clone();
        signers.push(AccountSigner {
            key: id,
            weight: self.master_weight,
        });
        AccountState {
            account_id: id,
            sequence: self.sequence,
            balance: self.balance,
            signers,
            thresholds: self.thresholds,
        }
    }
}

#[derive(Debug, Clone)]
struct ClaimableBalance {
    claimant: PublicKey,
    amount: Lumens,
}

#[derive(Debug, Clone, Copy)]
enum Level {
    Low,
    Medium,
    High,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<PublicKey, SimAccount>,
    claimable: HashMap<[u8; 32], ClaimableBalance>,
    committed: Vec<String>,
    ledger: u32,
    clock_offset_secs: i64,
    submissions: usize,
    next_balance_id: u64,
}

pub struct SimulatedLedger {
    network: Network,
    state: Mutex<State>,
}

impl SimulatedLedger {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            state: Mutex::new(State {
                ledger: 1,
                ..State::default()
            }),
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Create `account` with `amount`, or top it up if it already exists
    pub fn fund_account(&self, account: &PublicKey, amount: Lumens) {
        let mut state = self.state.lock();
        let ledger = state.ledger;
        let entry = state
            .accounts
            .entry(*account)
            .or_insert_with(|| SimAccount::new(Lumens::ZERO, ledger));
        entry.balance = entry.balance.checked_add(amount).unwrap_or(entry.balance);
    }

    /// Park `amount` in a claimable balance that `claimant` may claim; returns its id
    pub fn create_claimable_balance(&self, claimant: &PublicKey, amount: Lumens) -> String {
        let mut state = self.state.lock();
        state.next_balance_id += 1;

        let mut hasher = Sha256::new();
        hasher.update(b"claimable-balance");
        hasher.update(state.next_balance_id.to_be_bytes());
        hasher.update(claimant.as_bytes());
        let id: [u8; 32] = hasher.finalize().into();

        state.claimable.insert(
            id,
            ClaimableBalance {
                claimant: *claimant,
                amount,
            },
        );
        format_balance_id(&id)
    }

    pub fn claimable_balance_exists(&self, balance_id: &str) -> bool {
        match parse_balance_id(balance_id) {
            Ok(id) => self.state.lock().claimable.contains_key(&id),
            Err(_) => false,
        }
    }

    pub fn account(&self, account: &PublicKey) -> Option<AccountState> {
        self.state
            .lock()
            .accounts
            .get(account)
            .map(|entry| entry.snapshot(*account))
    }

    pub fn balance(&self, account: &PublicKey) -> Option<Lumens> {
        self.state.lock().accounts.get(account).map(|entry| entry.balance)
    }

    /// Move the ledger clock forward, e.g. to let validity windows lapse
    pub fn advance_clock(&self, secs: i64) {
        self.state.lock().clock_offset_secs += secs;
    }

    /// Every submission attempt, accepted or not
    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions
    }

    /// Hashes of committed transactions, oldest first
    pub fn committed(&self) -> Vec<String> {
        self.state.lock().committed.clone()
    }

    fn now(state: &State) -> u64 {
        let now = chrono::Utc::now().timestamp().saturating_add(state.clock_offset_secs);
        u64::try_from(now).unwrap_or(0)
    }

    fn apply(&self, envelope: &TxEnvelope) -> Result<SubmissionReceipt, LedgerError> {
        let hash = envelope.hash(&self.network)?;
        let mut state = self.state.lock();
        state.submissions += 1;

        let source = envelope.source_account();
        let Some(source_account) = state.accounts.get(&source) else {
            return Err(reject("tx_no_account"));
        };

        if let Some((min_time, max_time)) = envelope.time_bounds() {
            let now = Self::now(&state);
            if max_time != 0 && now > max_time {
                return Err(reject("tx_too_late"));
            }
            if now < min_time {
                return Err(reject("tx_too_early"));
            }
        }

        if envelope.sequence() != source_account.sequence + 1 {
            return Err(reject("tx_bad_seq"));
        }

        let fee = Lumens::from_stroops(i64::from(envelope.fee()));
        if source_account.balance < fee {
            return Err(reject("tx_insufficient_balance"));
        }

        let signers = Self::verified_signers(&state, envelope, &hash);
        if !Self::authorized(&state, &source, &signers, Level::Low) {
            return Err(reject("tx_bad_auth"));
        }

        // Fee and sequence are consumed even if an operation fails
        let ledger = state.ledger;
        if let Some(account) = state.accounts.get_mut(&source) {
            account.balance = account.balance.checked_sub(fee).unwrap_or(Lumens::ZERO);
            account.sequence = envelope.sequence();
        }

        let mut working = State {
            accounts: state.accounts.clone(),
            claimable: state.claimable.clone(),
            ledger,
            ..State::default()
        };
        let mut codes = Vec::new();

        for operation in envelope.operations() {
            let op_source = operation
                .source_account
                .as_ref()
                .map(PublicKey::from_muxed_account)
                .unwrap_or(source);

            match Self::apply_operation(&mut working, &op_source, &signers, operation) {
                Ok(()) => codes.push("op_success".to_string()),
                Err(code) => {
                    codes.push(code.to_string());
                    state.ledger += 1;
                    return Err(LedgerError::Rejected(Rejection::new("tx_failed", codes)));
                }
            }
        }

        state.accounts = working.accounts;
        state.claimable = working.claimable;
        state.ledger += 1;

        let hash_hex = hex::encode(hash);
        state.committed.push(hash_hex.clone());

        tracing::debug!(hash = %hash_hex, ledger = ledger, "Simulated transaction committed");

        Ok(SubmissionReceipt {
            hash: hash_hex,
            ledger,
            envelope_xdr: envelope.to_xdr_base64()?,
        })
    }

    /// Keys whose decorated signatures verify against the transaction hash
    fn verified_signers(state: &State, envelope: &TxEnvelope, hash: &[u8; 32]) -> HashSet<PublicKey> {
        let mut accounts = vec![envelope.source_account()];
        accounts.extend(
            envelope
                .operations()
                .iter()
                .filter_map(|op| op.source_account.as_ref())
                .map(PublicKey::from_muxed_account),
        );

        let candidates: Vec<PublicKey> = accounts
            .iter()
            .filter_map(|id| state.accounts.get(id).map(|account| account.candidate_keys(id)))
            .flatten()
            .collect();

        let mut verified = HashSet::new();
        for decorated in envelope.signatures() {
            for key in &candidates {
                if key.signature_hint() == decorated.hint.0
                    && key.verify(hash, decorated.signature.0.as_slice()).is_ok()
                {
                    verified.insert(*key);
                }
            }
        }
        verified
    }

    fn authorized(state: &State, id: &PublicKey, signers: &HashSet<PublicKey>, level: Level) -> bool {
        let Some(account) = state.accounts.get(id) else {
            return false;
        };

        let weight: u32 = signers
            .iter()
            .map(|key| u32::from(account.weight_of(id, key)))
            .sum();
        let threshold = match level {
            Level::Low => account.thresholds.low,
            Level::Medium => account.thresholds.med,
            Level::High => account.thresholds.high,
        };

        // A zero threshold still needs one valid signature
        weight >= u32::from(threshold).max(1)
    }

    fn apply_operation(
        state: &mut State,
        source: &PublicKey,
        signers: &HashSet<PublicKey>,
        operation: &xdr::Operation,
    ) -> Result<(), &'static str> {
        if !state.accounts.contains_key(source) {
            return Err("op_no_account");
        }

        match &operation.body {
            xdr::OperationBody::CreateAccount(op) => {
                Self::require(state, source, signers, Level::Medium)?;
                let destination = PublicKey::from_account_id(&op.destination);
                let amount = Lumens::from_stroops(op.starting_balance);

                if amount <= Lumens::ZERO {
                    return Err("op_malformed");
                }
                if state.accounts.contains_key(&destination) {
                    return Err("op_already_exists");
                }
                if amount < MIN_STARTING_BALANCE {
                    return Err("op_low_reserve");
                }
                Self::debit(state, source, amount)?;

                let ledger = state.ledger;
                state.accounts.insert(destination, SimAccount::new(amount, ledger));
                Ok(())
            }
            xdr::OperationBody::Payment(op) => {
                Self::require(state, source, signers, Level::Medium)?;
                if op.asset != xdr::Asset::Native {
                    return Err("op_not_supported");
                }
                let destination = PublicKey::from_muxed_account(&op.destination);
                let amount = Lumens::from_stroops(op.amount);

                if amount <= Lumens::ZERO {
                    return Err("op_malformed");
                }
                if !state.accounts.contains_key(&destination) {
                    return Err("op_no_destination");
                }
                Self::debit(state, source, amount)?;
                Self::credit(state, &destination, amount);
                Ok(())
            }
            xdr::OperationBody::SetOptions(op) => {
                let touches_auth = op.signer.is_some()
                    || op.master_weight.is_some()
                    || op.low_threshold.is_some()
                    || op.med_threshold.is_some()
                    || op.high_threshold.is_some();
                let level = if touches_auth { Level::High } else { Level::Medium };
                Self::require(state, source, signers, level)?;

                let account = state.accounts.get_mut(source).ok_or("op_no_account")?;
                let narrow = |value: u32| u8::try_from(value).map_err(|_| "op_threshold_out_of_range");

                if let Some(weight) = op.master_weight {
                    account.master_weight = narrow(weight)?;
                }
                if let Some(low) = op.low_threshold {
                    account.thresholds.low = narrow(low)?;
                }
                if let Some(med) = op.med_threshold {
                    account.thresholds.med = narrow(med)?;
                }
                if let Some(high) = op.high_threshold {
                    account.thresholds.high = narrow(high)?;
                }
                if let Some(signer) = &op.signer {
                    let xdr::SignerKey::Ed25519(xdr::Uint256(bytes)) = &signer.key else {
                        return Err("op_not_supported");
                    };
                    let key = PublicKey::from_bytes(*bytes);
                    if key == *source {
                        return Err("op_bad_signer");
                    }
                    let weight = narrow(signer.weight)?;

                    account.signers.retain(|existing| existing.key != key);
                    if weight > 0 {
                        account.signers.push(AccountSigner { key, weight });
                    }
                }
                Ok(())
            }
            xdr::OperationBody::ClaimClaimableBalance(op) => {
                Self::require(state, source, signers, Level::Low)?;
                let xdr::ClaimableBalanceId::ClaimableBalanceIdTypeV0(xdr::Hash(id)) = &op.balance_id;

                let entry = state.claimable.get(id).ok_or("op_does_not_exist")?;
                if entry.claimant != *source {
                    return Err("op_cannot_claim");
                }
                let amount = entry.amount;
                state.claimable.remove(id);
                Self::credit(state, source, amount);
                Ok(())
            }
            _ => Err("op_not_supported"),
        }
    }

    fn require(
        state: &State,
        source: &PublicKey,
        signers: &HashSet<PublicKey>,
        level: Level,
    ) -> Result<(), &'static str> {
        if Self::authorized(state, source, signers, level) {
            Ok(())
        } else {
            Err("op_bad_auth")
        }
    }

    fn debit(state: &mut State, account: &PublicKey, amount: Lumens) -> Result<(), &'static str> {
        let entry = state.accounts.get_mut(account).ok_or("op_no_account")?;
        entry.balance = entry
            .balance
            .checked_sub(amount)
            .filter(|remaining| *remaining >= Lumens::ZERO)
            .ok_or("op_underfunded")?;
        Ok(())
    }

    fn credit(state: &mut State, account: &PublicKey, amount: Lumens) {
        if let Some(entry) = state.accounts.get_mut(account) {
            entry.balance = entry.balance.checked_add(amount).unwrap_or(entry.balance);
        }
    }
}

fn reject(code: &str) -> LedgerError {
    LedgerError::Rejected(Rejection::transaction(code))
}

#[async_trait::async_trait]
impl LedgerGateway for SimulatedLedger {
    async fn load_account(&self, account: &PublicKey) -> Result<AccountState, LedgerError> {
        self.account(account)
            .ok_or(LedgerError::AccountNotFound(*account))
    }

    async fn submit(&self, envelope: &TxEnvelope) -> Result<SubmissionReceipt, LedgerError> {
        let result = self.apply(envelope);
        if let Err(ref e) = result {
            tracing::debug!(error = %e, source = %envelope.source_account(), "Simulated transaction rejected");
        }
        result
    }
}
