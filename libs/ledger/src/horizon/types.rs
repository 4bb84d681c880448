use crate::amount::Lumens;
use crate::errors::{LedgerError, Rejection};
use crate::gateway::{AccountSigner, AccountState, Thresholds};
use crate::keys::PublicKey;
use serde::{Deserialize, Serialize};

/// `GET /accounts/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub account_id: String,
    pub sequence: String,
    #[serde(default)]
    pub balances: Vec<BalanceLine>,
    #[serde(default)]
    pub signers: Vec<SignerLine>,
    #[serde(default)]
    pub thresholds: ThresholdsLine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceLine {
    pub balance: String,
    pub asset_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerLine {
    pub key: String,
    pub weight: u32,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdsLine {
    #[serde(default)]
    pub low_threshold: u8,
    #[serde(default)]
    pub med_threshold: u8,
    #[serde(default)]
    pub high_threshold: u8,
}

impl TryFrom<AccountResponse> for AccountState {
    type Error = LedgerError;

    fn try_from(response: AccountResponse) -> Result<Self, Self::Error> {
        let account_id: PublicKey = response.account_id.parse()?;
        let sequence = response
            .sequence
            .parse::<i64>()
            .map_err(|_| LedgerError::InvalidResponse(format!("bad sequence {:?}", response.sequence)))?;

        let balance = response
            .balances
            .iter()
            .find(|line| line.asset_type == "native")
            .map(|line| line.balance.parse::<Lumens>())
            .transpose()
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?
            .unwrap_or(Lumens::ZERO);

        // Only ed25519 keys can sign for this protocol; hash-x and pre-auth signers are ignored
        let signers = response
            .signers
            .iter()
            .filter(|line| line.kind == "ed25519_public_key")
            .map(|line| {
                Ok(AccountSigner {
                    key: line.key.parse()?,
                    weight: u8::try_from(line.weight).unwrap_or(u8::MAX),
                })
            })
            .collect::<Result<Vec<_>, LedgerError>>()?;

        Ok(AccountState {
            account_id,
            sequence,
            balance,
            signers,
            thresholds: Thresholds {
                low: response.thresholds.low_threshold,
                med: response.thresholds.med_threshold,
                high: response.thresholds.high_threshold,
            },
        })
    }
}

/// `POST /transactions` success body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub hash: String,
    pub ledger: u32,
    #[serde(default)]
    pub envelope_xdr: String,
    #[serde(default = "default_true")]
    pub successful: bool,
}

fn default_true() -> bool {
    true
}

/// RFC 7807 problem document Horizon returns on errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemResponse {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub extras: Option<ProblemExtras>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemExtras {
    #[serde(default)]
    pub result_codes: Option<ResultCodes>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultCodes {
    pub transaction: String,
    #[serde(default)]
    pub operations: Vec<String>,
}

impl ProblemResponse {
    pub fn rejection(&self) -> Option<Rejection> {
        self.extras
            .as_ref()
            .and_then(|extras| extras.result_codes.as_ref())
            .map(|codes| Rejection::new(codes.transaction.clone(), codes.operations.clone()))
    }
}
