//! Constructors for the handful of operations the issuance protocol uses.

use crate::amount::Lumens;
use crate::errors::LedgerError;
use crate::keys::PublicKey;
use crate::xdr;

/// Create `destination` funded with `starting_balance` from the source account
pub fn create_account(destination: &PublicKey, starting_balance: Lumens) -> xdr::Operation {
    body(xdr::OperationBody::CreateAccount(xdr::CreateAccountOp {
        destination: destination.to_account_id(),
        starting_balance: starting_balance.stroops(),
    }))
}

/// Add (or reweight) an ed25519 signer on the source account. Weight 0 removes it.
pub fn add_signer(signer: &PublicKey, weight: u8) -> xdr::Operation {
    body(xdr::OperationBody::SetOptions(xdr::SetOptionsOp {
        inflation_dest: None,
        clear_flags: None,
        set_flags: None,
        master_weight: None,
        low_threshold: None,
        med_threshold: None,
        high_threshold: None,
        home_domain: None,
        signer: Some(xdr::Signer {
            key: xdr::SignerKey::Ed25519(xdr::Uint256(*signer.as_bytes())),
            weight: u32::from(weight),
        }),
    }))
}

/// Native payment
pub fn payment(destination: &PublicKey, amount: Lumens) -> xdr::Operation {
    body(xdr::OperationBody::Payment(xdr::PaymentOp {
        destination: destination.to_muxed_account(),
        asset: xdr::Asset::Native,
        amount: amount.stroops(),
    }))
}

pub fn claim_claimable_balance(balance_id: &str) -> Result<xdr::Operation, LedgerError> {
    let hash = parse_balance_id(balance_id)?;
    Ok(body(xdr::OperationBody::ClaimClaimableBalance(
        xdr::ClaimClaimableBalanceOp {
            balance_id: xdr::ClaimableBalanceId::ClaimableBalanceIdTypeV0(xdr::Hash(hash)),
        },
    )))
}

/// Run `operation` on behalf of `source` instead of the transaction source
pub fn with_source(mut operation: xdr::Operation, source: &PublicKey) -> xdr::Operation {
    operation.source_account = Some(source.to_muxed_account());
    operation
}

fn body(body: xdr::OperationBody) -> xdr::Operation {
    xdr::Operation {
        source_account: None,
        body,
    }
}

/// Parse a claimable balance id as printed by Horizon: hex of the XDR id,
/// i.e. a 4-byte type tag (always zero) followed by the 32-byte hash.
/// A bare 32-byte hash is accepted too.
pub fn parse_balance_id(text: &str) -> Result<[u8; 32], LedgerError> {
    let invalid = || LedgerError::InvalidTransaction(format!("invalid claimable balance id: {text:?}"));
    let bytes = hex::decode(text.trim()).map_err(|_| invalid())?;

    let hash = match bytes.len() {
        36 if bytes[..4] == [0, 0, 0, 0] => &bytes[4..],
        32 => &bytes[..],
        _ => return Err(invalid()),
    };

    let mut out = [0u8; 32];
    out.copy_from_slice(hash);
    Ok(out)
}

pub fn format_balance_id(hash: &[u8; 32]) -> String {
    format!("00000000{}", hex::encode(hash))
}
