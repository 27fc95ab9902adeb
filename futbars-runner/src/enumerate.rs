//! Contract discovery: list every variant of the underlying and keep the ones
//! whose expiry falls inside the lookback window.

use chrono::{Duration, NaiveDateTime, NaiveTime};
use futbars_core::data::{ApiError, MarketDataApi};
use futbars_core::domain::{Contract, ContractTemplate, ExpiryParseError};
use std::collections::HashSet;
use tracing::{info, warn};

/// Oldest timestamp still inside the lookback window.
pub fn lookback_boundary(now: NaiveDateTime, lookback_days: i64) -> NaiveDateTime {
    now - Duration::days(lookback_days)
}

/// Result of contract discovery.
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    /// Contracts to fetch, sorted by expiry.
    pub contracts: Vec<Contract>,
    /// Contracts that expired before the lookback window.
    pub excluded: Vec<Contract>,
    /// Raw expiries that could not be parsed, with the gateway contract id.
    pub unparseable: Vec<(i64, ExpiryParseError)>,
}

impl Enumeration {
    pub fn contract_ids(&self) -> Vec<String> {
        self.contracts.iter().map(|c| c.id().to_string()).collect()
    }
}

/// Ask the gateway for all variants of `template` and keep those with
/// `expiry >= now - lookback_days`.
///
/// A contract with an unparseable expiry is skipped with a warning; only a
/// failed gateway call is an error.
pub fn enumerate_contracts(
    api: &dyn MarketDataApi,
    template: &ContractTemplate,
    now: NaiveDateTime,
    lookback_days: i64,
) -> Result<Enumeration, ApiError> {
    let details = api.contract_details(template)?;
    let cutoff = lookback_boundary(now, lookback_days);

    let mut result = Enumeration::default();
    let mut seen = HashSet::new();

    for d in &details {
        let contract = match Contract::from_details(d) {
            Ok(c) => c,
            Err(e) => {
                warn!(con_id = d.con_id, error = %e, "skipping contract");
                result.unparseable.push((d.con_id, e));
                continue;
            }
        };

        if !seen.insert(contract.local_symbol.clone()) {
            continue;
        }

        if contract.expiry.and_time(NaiveTime::MIN) >= cutoff {
            result.contracts.push(contract);
        } else {
            result.excluded.push(contract);
        }
    }

    result
        .contracts
        .sort_by(|a, b| a.expiry.cmp(&b.expiry).then_with(|| a.local_symbol.cmp(&b.local_symbol)));

    info!(
        symbol = %template.symbol,
        listed = details.len(),
        kept = result.contracts.len(),
        excluded = result.excluded.len(),
        unparseable = result.unparseable.len(),
        "contracts enumerated"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedApi;
    use chrono::NaiveDate;
    use futbars_core::domain::ContractDetails;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn template() -> ContractTemplate {
        ContractTemplate {
            symbol: "MES".into(),
            exchange: "CME".into(),
            currency: "USD".into(),
            include_expired: true,
        }
    }

    fn detail(con_id: i64, expiry: &str) -> ContractDetails {
        ContractDetails {
            con_id,
            symbol: "MES".into(),
            local_symbol: None,
            last_trade_date_or_contract_month: expiry.into(),
            exchange: "CME".into(),
            currency: "USD".into(),
        }
    }

    #[test]
    fn keeps_contracts_inside_window_sorted_by_expiry() {
        let api = ScriptedApi::with_contracts(vec![
            detail(3, "20250919"),
            detail(1, "20230317"), // older than 730 days
            detail(2, "20241220"),
        ]);

        let result = enumerate_contracts(&api, &template(), now(), 730).unwrap();
        let ids = result.contract_ids();
        assert_eq!(ids, vec!["MESZ4", "MESU5"]);
        assert_eq!(result.excluded.len(), 1);
        assert_eq!(result.excluded[0].local_symbol, "MESH3");
    }

    #[test]
    fn unparseable_expiry_is_skipped_not_fatal() {
        let api = ScriptedApi::with_contracts(vec![detail(1, "soon"), detail(2, "20250321")]);

        let result = enumerate_contracts(&api, &template(), now(), 730).unwrap();
        assert_eq!(result.contract_ids(), vec!["MESH5"]);
        assert_eq!(result.unparseable.len(), 1);
        assert_eq!(result.unparseable[0].0, 1);

        let copy = result.clone();
        assert_eq!(copy.unparseable[0].1.raw, "soon");
        assert_eq!(copy.contracts, result.contracts);
    }

    #[test]
    fn month_only_expiry_counts_from_first_of_month() {
        // 2023-06-01 is exactly 731 days before `now`, 2023-07-01 is inside.
        let api = ScriptedApi::with_contracts(vec![detail(1, "202306"), detail(2, "202307")]);

        let result = enumerate_contracts(&api, &template(), now(), 730).unwrap();
        assert_eq!(result.contract_ids(), vec!["MESN3"]);
    }

    #[test]
    fn duplicate_listings_collapse() {
        let api = ScriptedApi::with_contracts(vec![detail(2, "20241220"), detail(2, "20241220")]);
        let result = enumerate_contracts(&api, &template(), now(), 730).unwrap();
        assert_eq!(result.contracts.len(), 1);
    }

    #[test]
    fn gateway_failure_is_an_error() {
        let api = ScriptedApi::new();
        api.fail_contract_details(ApiError::Timeout("slow".into()));
        assert!(enumerate_contracts(&api, &template(), now(), 730).is_err());
    }
}
