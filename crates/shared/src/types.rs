//! Shared billing vocabulary

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A billing vendor that can own a tenant's subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingProvider {
    Polar,
    #[serde(rename = "revenuecat")]
    RevenueCat,
}

impl BillingProvider {
    pub const ALL: [BillingProvider; 2] = [BillingProvider::Polar, BillingProvider::RevenueCat];

    /// Wire name, also stored in `subscriptions.provider`
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingProvider::Polar => "polar",
            BillingProvider::RevenueCat => "revenuecat",
        }
    }
}

impl fmt::Display for BillingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown billing provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for BillingProvider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polar" => Ok(BillingProvider::Polar),
            "revenuecat" => Ok(BillingProvider::RevenueCat),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

impl TryFrom<String> for BillingProvider {
    type Error = UnknownProvider;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Vendor-normalized subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    Expired,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown subscription status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for SubscriptionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" | "cancelled" => Ok(SubscriptionStatus::Canceled),
            "unpaid" => Ok(SubscriptionStatus::Unpaid),
            "incomplete" => Ok(SubscriptionStatus::Incomplete),
            "expired" | "incomplete_expired" => Ok(SubscriptionStatus::Expired),
            "paused" => Ok(SubscriptionStatus::Paused),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for SubscriptionStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse_is_case_insensitive() {
        assert_eq!(
            "RevenueCat".parse::<BillingProvider>().unwrap(),
            BillingProvider::RevenueCat
        );
        assert_eq!(" polar ".parse::<BillingProvider>().unwrap(), BillingProvider::Polar);
        assert!("stripe".parse::<BillingProvider>().is_err());
    }

    #[test]
    fn test_provider_serde_matches_wire_name() {
        for provider in BillingProvider::ALL {
            let json = serde_json::to_string(&provider).unwrap();
            assert_eq!(json, format!("\"{}\"", provider));
        }
    }

    #[test]
    fn test_status_accepts_vendor_spellings() {
        assert_eq!(
            "cancelled".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Canceled
        );
        assert_eq!(
            "incomplete_expired".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Expired
        );
        assert!("bogus".parse::<SubscriptionStatus>().is_err());
    }
}
