//! Signal taxonomy and records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SignalflowError;

/// Closed taxonomy of signal origins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Ga4,
    Gsc,
    GoogleAds,
    MetaAds,
    Hubspot,
    Salesforce,
    Stripe,
    Quickbooks,
    Slack,
    Email,
    Webhook,
    Internal,
    Manual,
}

impl SignalSource {
    pub const ALL: [SignalSource; 13] = [
        SignalSource::Ga4,
        SignalSource::Gsc,
        SignalSource::GoogleAds,
        SignalSource::MetaAds,
        SignalSource::Hubspot,
        SignalSource::Salesforce,
        SignalSource::Stripe,
        SignalSource::Quickbooks,
        SignalSource::Slack,
        SignalSource::Email,
        SignalSource::Webhook,
        SignalSource::Internal,
        SignalSource::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Ga4 => "ga4",
            SignalSource::Gsc => "gsc",
            SignalSource::GoogleAds => "google_ads",
            SignalSource::MetaAds => "meta_ads",
            SignalSource::Hubspot => "hubspot",
            SignalSource::Salesforce => "salesforce",
            SignalSource::Stripe => "stripe",
            SignalSource::Quickbooks => "quickbooks",
            SignalSource::Slack => "slack",
            SignalSource::Email => "email",
            SignalSource::Webhook => "webhook",
            SignalSource::Internal => "internal",
            SignalSource::Manual => "manual",
        }
    }
}

impl FromStr for SignalSource {
    type Err = SignalflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SignalSource::ALL
            .iter()
            .copied()
            .find(|src| src.as_str() == s)
            .ok_or_else(|| SignalflowError::InvalidValue {
                field: "source",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed taxonomy of signal urgency levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }
}

impl FromStr for Urgency {
    type Err = SignalflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Urgency::Low),
            "normal" => Ok(Urgency::Normal),
            "high" => Ok(Urgency::High),
            "critical" => Ok(Urgency::Critical),
            other => Err(SignalflowError::InvalidValue {
                field: "urgency",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a stored signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    #[default]
    Pending,
    Processing,
    Processed,
    Discarded,
    Failed,
}

impl SignalStatus {
    /// Processed and discarded signals never change again.
    pub fn is_final(&self) -> bool {
        matches!(self, SignalStatus::Processed | SignalStatus::Discarded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Pending => "pending",
            SignalStatus::Processing => "processing",
            SignalStatus::Processed => "processed",
            SignalStatus::Discarded => "discarded",
            SignalStatus::Failed => "failed",
        }
    }
}

impl FromStr for SignalStatus {
    type Err = SignalflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SignalStatus::Pending),
            "processing" => Ok(SignalStatus::Processing),
            "processed" => Ok(SignalStatus::Processed),
            "discarded" => Ok(SignalStatus::Discarded),
            "failed" => Ok(SignalStatus::Failed),
            other => Err(SignalflowError::InvalidValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// Output of the normalizer, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedSignal {
    pub agency_id: Uuid,
    pub source: SignalSource,
    #[serde(rename = "type")]
    pub signal_type: String,
    /// Caller data plus the `_metadata` enrichment block.
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub urgency: Urgency,
    pub dedup_hash: String,
    pub status: SignalStatus,
    pub processed: bool,
    pub retry_count: u32,
}

/// A persisted signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: Uuid,
    pub agency_id: Uuid,
    pub source: SignalSource,
    #[serde(rename = "type")]
    pub signal_type: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub urgency: Urgency,
    pub dedup_hash: String,
    pub status: SignalStatus,
    pub processed: bool,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl Signal {
    pub fn from_normalized(signal: NormalizedSignal, id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            agency_id: signal.agency_id,
            source: signal.source,
            signal_type: signal.signal_type,
            payload: signal.payload,
            client_id: signal.client_id,
            urgency: signal.urgency,
            dedup_hash: signal.dedup_hash,
            status: signal.status,
            processed: signal.processed,
            retry_count: signal.retry_count,
            created_at,
            processed_at: None,
        }
    }
}
