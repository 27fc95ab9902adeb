//! Futures contracts: the enumeration template, raw gateway details, and the
//! validated `Contract` the fetch loop works with.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// CME month codes, January through December.
const MONTH_CODES: [char; 12] = ['F', 'G', 'H', 'J', 'K', 'M', 'N', 'Q', 'U', 'V', 'X', 'Z'];

/// What to ask the gateway for when listing contract variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractTemplate {
    pub symbol: String,
    pub exchange: String,
    pub currency: String,
    pub include_expired: bool,
}

/// Contract details as reported by the gateway, before expiry validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDetails {
    pub con_id: i64,
    pub symbol: String,
    /// Broker local symbol, when the endpoint reports one.
    pub local_symbol: Option<String>,
    /// `YYYYMMDD` or `YYYYMM`.
    pub last_trade_date_or_contract_month: String,
    pub exchange: String,
    pub currency: String,
}

/// A futures contract with a parsed expiry. Immutable once enumerated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contract {
    pub con_id: i64,
    pub symbol: String,
    pub local_symbol: String,
    pub expiry: NaiveDate,
    pub exchange: String,
    pub currency: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unparseable expiry '{raw}' (expected YYYYMMDD or YYYYMM)")]
pub struct ExpiryParseError {
    pub raw: String,
}

impl Contract {
    /// Validate gateway details into a contract.
    ///
    /// The local symbol falls back to one derived from symbol and expiry.
    pub fn from_details(details: &ContractDetails) -> Result<Self, ExpiryParseError> {
        let expiry = parse_expiry(&details.last_trade_date_or_contract_month)?;
        let local_symbol = match details.local_symbol.as_deref() {
            Some(ls) if !ls.trim().is_empty() => ls.trim().to_string(),
            _ => derive_local_symbol(&details.symbol, expiry),
        };
        Ok(Self {
            con_id: details.con_id,
            symbol: details.symbol.clone(),
            local_symbol,
            expiry,
            exchange: details.exchange.clone(),
            currency: details.currency.clone(),
        })
    }

    /// Identifier used for checkpoint keys and file names.
    pub fn id(&self) -> &str {
        &self.local_symbol
    }

    /// True once the start of the expiry day lies before `now`.
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        self.expiry.and_time(NaiveTime::MIN) < now
    }

    /// Last second of the expiry day, the first cursor for an expired contract.
    pub fn expiry_end_of_day(&self) -> NaiveDateTime {
        self.expiry.and_time(NaiveTime::MIN) + Duration::seconds(86_399)
    }
}

/// Parse a contract expiry in `YYYYMMDD` form, or `YYYYMM` defaulting to the
/// first of the month.
pub fn parse_expiry(raw: &str) -> Result<NaiveDate, ExpiryParseError> {
    let err = || ExpiryParseError {
        raw: raw.to_string(),
    };
    let s = raw.trim();
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err());
    }
    let field = |range: std::ops::Range<usize>| -> Result<u32, ExpiryParseError> {
        s.get(range).and_then(|v| v.parse().ok()).ok_or_else(err)
    };
    let (year, month, day) = match s.len() {
        8 => (field(0..4)?, field(4..6)?, field(6..8)?),
        6 => (field(0..4)?, field(4..6)?, 1),
        _ => return Err(err()),
    };
    NaiveDate::from_ymd_opt(year as i32, month, day).ok_or_else(err)
}

/// `MES` + 2024-12-20 → `MESZ4`.
pub fn derive_local_symbol(symbol: &str, expiry: NaiveDate) -> String {
    use chrono::Datelike;
    let code = MONTH_CODES[expiry.month0() as usize];
    format!("{symbol}{code}{}", expiry.year().rem_euclid(10))
}

/// Whether `contract_id` names a contract of `symbol`: the symbol followed by
/// a month code and year digits (`MESZ4` belongs to `MES`, `MNQZ4` does not).
pub fn is_contract_of(contract_id: &str, symbol: &str) -> bool {
    let Some(rest) = contract_id.strip_prefix(symbol) else {
        return false;
    };
    let mut chars = rest.chars();
    match chars.next() {
        Some(code) if MONTH_CODES.contains(&code) => {
            let year = chars.as_str();
            !year.is_empty() && year.bytes().all(|b| b.is_ascii_digit())
        }
        _ => false,
    }
}
