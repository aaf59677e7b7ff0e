//! Raw event validation, canonical fingerprinting and enrichment.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use signalflow_core::model::{NormalizedSignal, SignalSource, SignalStatus, Urgency};
use signalflow_core::{hash_value, SignalflowError};

use crate::error::SignalError;

/// Inbound event as delivered by a connector or webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSignal {
    pub source: String,
    pub signal_type: String,
    pub data: Map<String, Value>,
    pub client_id: Option<String>,
    pub urgency: Option<String>,
    /// Event time reported by the source, passed through untouched.
    pub timestamp: Option<String>,
    pub metadata: Map<String, Value>,
}

impl RawSignal {
    pub fn new(source: impl Into<String>, signal_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            source: source.into(),
            signal_type: signal_type.into(),
            data,
            client_id: None,
            urgency: None,
            timestamp: None,
            metadata: Map::new(),
        }
    }

    /// Parse `{source, type, data, clientId?, urgency?, timestamp?, metadata?}`.
    pub fn from_value(value: &Value) -> Result<Self, SignalError> {
        let obj = value.as_object().ok_or(SignalError::NotAnObject)?;

        let source = required_str(obj, "source")?;
        let signal_type = required_str(obj, "type")?;
        let data = match obj.get("data") {
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(SignalError::InvalidData),
            None => return Err(SignalError::MissingField("data")),
        };

        Ok(Self {
            source,
            signal_type,
            data,
            client_id: optional_str(obj, "clientId")?,
            urgency: optional_str(obj, "urgency")?,
            timestamp: optional_str(obj, "timestamp")?,
            metadata: obj
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

fn required_str(obj: &Map<String, Value>, key: &'static str) -> Result<String, SignalError> {
    match obj.get(key).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(SignalError::MissingField(key)),
    }
}

/// Absent or `null` is `None`; any other non-string is rejected.
fn optional_str(obj: &Map<String, Value>, key: &'static str) -> Result<Option<String>, SignalError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(SignalflowError::InvalidValue {
            field: key,
            value: other.to_string(),
        }
        .into()),
    }
}

/// Payload key holding the enrichment block.
pub const METADATA_KEY: &str = "_metadata";

/// Turns [`RawSignal`]s into [`NormalizedSignal`]s.
///
/// Stateless apart from the clock, so one instance can be shared freely.
#[derive(Debug, Clone, Copy)]
pub struct SignalNormalizer {
    clock: fn() -> DateTime<Utc>,
}

impl Default for SignalNormalizer {
    fn default() -> Self {
        Self { clock: Utc::now }
    }
}

impl SignalNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed clock for the `_metadata.ingestedAt` stamp.
    pub fn with_clock(clock: fn() -> DateTime<Utc>) -> Self {
        Self { clock }
    }

    /// Validate taxonomy, fingerprint the payload, then enrich it.
    ///
    /// Nothing is persisted; an invalid source or urgency fails here, as
    /// does caller data that already carries the `_metadata` key.
    pub fn normalize(&self, agency_id: Uuid, raw: &RawSignal) -> Result<NormalizedSignal, SignalError> {
        if raw.data.contains_key(METADATA_KEY) {
            return Err(SignalError::ReservedField(METADATA_KEY));
        }
        let source: SignalSource = raw.source.parse()?;
        let urgency = match raw.urgency.as_deref() {
            Some(u) => u.parse::<Urgency>()?,
            None => Urgency::default(),
        };

        let payload = Value::Object(raw.data.clone());
        let dedup_hash = dedup_hash(agency_id, source, &raw.signal_type, &payload);

        let mut enriched = raw.data.clone();
        enriched.insert(METADATA_KEY.to_string(), self.metadata(raw));

        Ok(NormalizedSignal {
            agency_id,
            source,
            signal_type: raw.signal_type.clone(),
            payload: Value::Object(enriched),
            client_id: raw.client_id.clone(),
            urgency,
            dedup_hash,
            status: SignalStatus::Pending,
            processed: false,
            retry_count: 0,
        })
    }

    fn metadata(&self, raw: &RawSignal) -> Value {
        let mut meta = Map::new();
        meta.insert("ingestedAt".to_string(), json!((self.clock)().to_rfc3339()));
        if let Some(ts) = &raw.timestamp {
            meta.insert("sourceTimestamp".to_string(), json!(ts));
        }
        for (k, v) in &raw.metadata {
            meta.insert(k.clone(), v.clone());
        }
        Value::Object(meta)
    }
}

/// Fingerprint of one logical event within a tenant.
///
/// Keys are sorted recursively before hashing, so key order never matters.
pub fn dedup_hash(agency_id: Uuid, source: SignalSource, signal_type: &str, payload: &Value) -> String {
    hash_value(&json!({
        "agencyId": agency_id.to_string(),
        "source": source.as_str(),
        "type": signal_type,
        "payload": payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn raw(value: Value) -> RawSignal {
        RawSignal::from_value(&value).unwrap()
    }

    #[test]
    fn nested_key_order_does_not_change_hash() {
        let agency = Uuid::new_v4();
        let n = SignalNormalizer::new();
        let a = raw(json!({
            "source": "ga4", "type": "session_drop",
            "data": {"sessions": 10, "page": {"path": "/", "title": "Home"}, "tags": [{"b": 1, "a": 2}]}
        }));
        let b = raw(json!({
            "type": "session_drop", "source": "ga4",
            "data": {"tags": [{"a": 2, "b": 1}], "page": {"title": "Home", "path": "/"}, "sessions": 10}
        }));
        assert_eq!(
            n.normalize(agency, &a).unwrap().dedup_hash,
            n.normalize(agency, &b).unwrap().dedup_hash
        );
    }

    #[test]
    fn array_order_still_matters() {
        let agency = Uuid::new_v4();
        let n = SignalNormalizer::new();
        let a = raw(json!({"source": "ga4", "type": "t", "data": {"v": [1, 2]}}));
        let b = raw(json!({"source": "ga4", "type": "t", "data": {"v": [2, 1]}}));
        assert_ne!(
            n.normalize(agency, &a).unwrap().dedup_hash,
            n.normalize(agency, &b).unwrap().dedup_hash
        );
    }

    #[test]
    fn same_event_in_different_agencies_hashes_differently() {
        let n = SignalNormalizer::new();
        let r = raw(json!({"source": "stripe", "type": "payment_failed", "data": {"amount": 40}}));
        let a = n.normalize(Uuid::new_v4(), &r).unwrap();
        let b = n.normalize(Uuid::new_v4(), &r).unwrap();
        assert_ne!(a.dedup_hash, b.dedup_hash);
    }

    #[test]
    fn metadata_is_excluded_from_hash() {
        let agency = Uuid::new_v4();
        let mut first = raw(json!({"source": "hubspot", "type": "deal_stalled", "data": {"deal": 7}}));
        first.metadata.insert("requestId".into(), json!("abc"));
        first.timestamp = Some("2024-02-01T00:00:00Z".into());
        let second = raw(json!({"source": "hubspot", "type": "deal_stalled", "data": {"deal": 7}}));

        let a = SignalNormalizer::with_clock(fixed_clock).normalize(agency, &first).unwrap();
        let b = SignalNormalizer::new().normalize(agency, &second).unwrap();
        assert_eq!(a.dedup_hash, b.dedup_hash);
        assert_ne!(a.payload, b.payload);
    }

    #[test]
    fn enrichment_block_is_added() {
        let mut r = raw(json!({
            "source": "ga4", "type": "session_drop", "data": {"sessions": 10},
            "timestamp": "2024-02-29T23:00:00Z", "metadata": {"connector": "ga4-v2"}
        }));
        r.client_id = Some("client-1".into());
        let s = SignalNormalizer::with_clock(fixed_clock)
            .normalize(Uuid::nil(), &r)
            .unwrap();

        let meta = &s.payload["_metadata"];
        assert_eq!(meta["ingestedAt"], json!("2024-03-01T12:00:00+00:00"));
        assert_eq!(meta["sourceTimestamp"], json!("2024-02-29T23:00:00Z"));
        assert_eq!(meta["connector"], json!("ga4-v2"));
        assert_eq!(s.payload["sessions"], json!(10));
        assert_eq!(s.urgency, Urgency::Normal);
        assert_eq!(s.status, SignalStatus::Pending);
        assert!(!s.processed);
        assert_eq!(s.retry_count, 0);
        assert_eq!(s.client_id.as_deref(), Some("client-1"));
    }

    #[test]
    fn unknown_source_or_urgency_is_rejected() {
        let n = SignalNormalizer::new();
        let bad_source = raw(json!({"source": "fax", "type": "t", "data": {}}));
        assert!(matches!(n.normalize(Uuid::nil(), &bad_source), Err(SignalError::Invalid(_))));

        let bad_urgency = raw(json!({"source": "slack", "type": "t", "data": {}, "urgency": "asap"}));
        assert!(matches!(n.normalize(Uuid::nil(), &bad_urgency), Err(SignalError::Invalid(_))));

        let high = raw(json!({"source": "slack", "type": "t", "data": {}, "urgency": "high"}));
        assert_eq!(n.normalize(Uuid::nil(), &high).unwrap().urgency, Urgency::High);

        for urgency in [json!(3), json!(true), json!(["high"])] {
            let err = RawSignal::from_value(&json!({"source": "slack", "type": "t", "data": {}, "urgency": urgency}))
                .unwrap_err();
            assert!(matches!(
                err,
                SignalError::Invalid(SignalflowError::InvalidValue { field: "urgency", .. })
            ));
        }

        let null = raw(json!({"source": "slack", "type": "t", "data": {}, "urgency": null}));
        assert_eq!(n.normalize(Uuid::nil(), &null).unwrap().urgency, Urgency::Normal);
    }

    #[test]
    fn caller_supplied_metadata_key_is_rejected() {
        let n = SignalNormalizer::new();
        let spoofed = raw(json!({
            "source": "ga4",
            "type": "t",
            "data": {"sessions": 1, "_metadata": {"ingestedAt": "1970-01-01T00:00:00Z"}}
        }));
        assert!(matches!(
            n.normalize(Uuid::nil(), &spoofed),
            Err(SignalError::ReservedField("_metadata"))
        ));

        let mut data = Map::new();
        data.insert(METADATA_KEY.to_string(), json!({}));
        let built = RawSignal::new("ga4", "t", data);
        assert!(matches!(n.normalize(Uuid::nil(), &built), Err(SignalError::ReservedField(_))));
    }

    #[test]
    fn raw_signal_requires_core_fields() {
        assert!(matches!(
            RawSignal::from_value(&json!({"type": "t", "data": {}})),
            Err(SignalError::MissingField("source"))
        ));
        assert!(matches!(
            RawSignal::from_value(&json!({"source": "ga4", "type": "t", "data": [1]})),
            Err(SignalError::InvalidData)
        ));
        assert!(matches!(
            RawSignal::from_value(&json!("ga4")),
            Err(SignalError::NotAnObject)
        ));
    }
}
