//! Preset request ceilings for API access tiers.

use serde::{Deserialize, Serialize};

/// Access tier of the quota-limited API.
///
/// Public data APIs commonly grant a higher requests-per-minute ceiling to
/// callers that present an API key. When no explicit `requests_per_minute`
/// is configured, the tier decides the rate.
///
/// # Example
///
/// ```
/// use std::str::FromStr;
/// use tollgate_rate_limit::ApiTier;
///
/// assert_eq!(ApiTier::from_api_key(true), ApiTier::Keyed);
/// assert_eq!(ApiTier::Keyed.requests_per_minute(), 240);
/// assert_eq!(ApiTier::from_str("anonymous").unwrap(), ApiTier::Anonymous);
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApiTier {
    /// No API key: 40 requests per minute
    #[default]
    Anonymous,
    /// API key presented: 240 requests per minute
    Keyed,
}

impl ApiTier {
    /// Select the tier from whether an API key is configured.
    pub fn from_api_key(has_api_key: bool) -> Self {
        if has_api_key {
            ApiTier::Keyed
        } else {
            ApiTier::Anonymous
        }
    }

    /// Requests per minute granted by this tier.
    pub fn requests_per_minute(&self) -> u32 {
        match self {
            ApiTier::Anonymous => 40,
            ApiTier::Keyed => 240,
        }
    }
}
