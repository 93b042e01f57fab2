//! Event records and the builder that assembles them
//!
//! An [`EventRecord`] is one observed user-interaction or lifecycle
//! occurrence, fully populated at construction time and immutable
//! afterwards. The wire form is a single flattened JSON object produced by
//! [`EventRecord::to_payload`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::attribution::{AttributionParams, AttributionStore};
use crate::context::PageContext;

/// One observed event, timestamped at construction.
///
/// Fields sourced from the page context degrade to `None` when the execution
/// context cannot supply them; attribution is present only when any
/// parameters are known.
#[derive(Debug, Clone)]
pub struct EventRecord {
    /// Event name, e.g. `page_view`, `click`, `form_submit` (never empty)
    pub event: String,
    /// Current page path
    pub page: Option<String>,
    /// Path plus query string
    pub full_path: Option<String>,
    /// Referrer URL
    pub referrer: Option<String>,
    /// User-agent string
    pub user_agent: Option<String>,
    /// Construction time
    pub timestamp: DateTime<Utc>,
    /// Session identifier
    pub session_id: String,
    /// Caller-supplied user identifier
    pub user_id: Option<String>,
    /// Known attribution parameters
    pub attribution: Option<AttributionParams>,
    /// Open map of event-specific fields
    pub extra: Map<String, Value>,
    /// Content hash for server-side deduplication (32-char hex)
    pub event_hash: Option<String>,
}

impl EventRecord {
    /// Flatten into the single JSON object the collection endpoint expects.
    ///
    /// Attribution parameters become individual `utm_*` keys (omitted when
    /// absent); caller-supplied extras are merged last and may intentionally
    /// overwrite same-named top-level fields.
    pub fn to_payload(&self) -> Value {
        let mut payload = Map::new();

        payload.insert("event".to_string(), Value::String(self.event.clone()));
        if let Some(page) = &self.page {
            payload.insert("page".to_string(), Value::String(page.clone()));
        }
        if let Some(full_path) = &self.full_path {
            payload.insert("full_path".to_string(), Value::String(full_path.clone()));
        }
        if let Some(referrer) = &self.referrer {
            payload.insert("referrer".to_string(), Value::String(referrer.clone()));
        }
        if let Some(user_agent) = &self.user_agent {
            payload.insert("user_agent".to_string(), Value::String(user_agent.clone()));
        }
        payload.insert(
            "timestamp".to_string(),
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        payload.insert(
            "session_id".to_string(),
            Value::String(self.session_id.clone()),
        );
        if let Some(user_id) = &self.user_id {
            payload.insert("user_id".to_string(), Value::String(user_id.clone()));
        }
        if let Some(hash) = &self.event_hash {
            payload.insert("event_hash".to_string(), Value::String(hash.clone()));
        }

        if let Some(attribution) = &self.attribution {
            for (name, value) in attribution {
                payload.insert(name.clone(), Value::String(value.clone()));
            }
        }

        // Extras last: last-write-wins over top-level fields
        for (key, value) in &self.extra {
            payload.insert(key.clone(), value.clone());
        }

        Value::Object(payload)
    }

    /// Compute the deduplication hash over the event identity and its data.
    ///
    /// Returns a 32-character hex digest (first 16 bytes of SHA-256).
    fn compute_hash(&self) -> String {
        let data = serde_json::to_string(&self.extra).unwrap_or_default();
        let hash_input = format!(
            "{}:{}:{}:{}",
            self.event,
            self.timestamp.to_rfc3339(),
            self.full_path.as_deref().unwrap_or(""),
            data
        );

        let mut hasher = Sha256::new();
        hasher.update(hash_input.as_bytes());
        let digest = hasher.finalize();

        hex::encode(&digest[..16])
    }
}

/// Assembles [`EventRecord`]s from page context, attribution state, and
/// caller-supplied fields.
///
/// `build` never fails: missing context values degrade to absent fields, so
/// the builder is safe to call from any execution context.
#[derive(Clone)]
pub struct EventBuilder {
    page: Arc<dyn PageContext>,
    attribution: AttributionStore,
    user_id: Option<String>,
}

impl EventBuilder {
    pub fn new(page: Arc<dyn PageContext>, attribution: AttributionStore) -> Self {
        Self {
            page,
            attribution,
            user_id: None,
        }
    }

    /// Attach a caller-supplied user identifier to every built event.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Produce one fully-populated record for a named event.
    pub fn build(&self, event: &str, extra: Map<String, Value>) -> EventRecord {
        debug_assert!(!event.is_empty(), "event name must be non-empty");

        let path = self.page.path();
        let query = self.page.query();
        let full_path = path.as_ref().map(|p| match query.as_deref() {
            Some(q) if !q.is_empty() => format!("{}?{}", p, q),
            _ => p.clone(),
        });

        let merged = self.attribution.merged(query.as_deref());
        let attribution = if merged.is_empty() { None } else { Some(merged) };

        let mut record = EventRecord {
            event: event.to_string(),
            page: path,
            full_path,
            referrer: self.page.referrer(),
            user_agent: self.page.user_agent(),
            timestamp: Utc::now(),
            session_id: self.attribution.session_id(),
            user_id: self.user_id.clone(),
            attribution,
            extra,
            event_hash: None,
        };
        record.event_hash = Some(record.compute_hash());
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{MemoryStore, NoopStore, SnapshotPage};
    use serde_json::json;

    fn builder_with_page() -> (Arc<SnapshotPage>, EventBuilder) {
        let page = Arc::new(SnapshotPage::new("pagebeam-test/1.0"));
        let attribution = AttributionStore::new(Arc::new(MemoryStore::new()));
        let builder = EventBuilder::new(page.clone(), attribution);
        (page, builder)
    }

    #[test]
    fn test_build_populates_context_fields() {
        let (page, builder) = builder_with_page();
        page.navigate("/pricing", Some("utm_source=google"), Some("Pricing"));

        let record = builder.build("page_view", Map::new());

        assert_eq!(record.event, "page_view");
        assert_eq!(record.page.as_deref(), Some("/pricing"));
        assert_eq!(
            record.full_path.as_deref(),
            Some("/pricing?utm_source=google")
        );
        assert_eq!(record.user_agent.as_deref(), Some("pagebeam-test/1.0"));
        assert!(record.session_id.starts_with("session_"));
        assert!(record.event_hash.is_some());

        let attribution = record.attribution.as_ref().unwrap();
        assert_eq!(attribution["utm_source"], "google");
    }

    #[test]
    fn test_build_degrades_without_context() {
        let page = Arc::new(SnapshotPage::default());
        let attribution = AttributionStore::new(Arc::new(NoopStore));
        let builder = EventBuilder::new(page, attribution);

        let record = builder.build("page_view", Map::new());

        assert_eq!(record.page, None);
        assert_eq!(record.full_path, None);
        assert_eq!(record.user_agent, None);
        assert!(record.attribution.is_none());
        // NoopStore cannot persist, but a session id is still synthesized
        assert!(record.session_id.starts_with("session_"));
    }

    #[test]
    fn test_attribution_survives_navigation() {
        let (page, builder) = builder_with_page();

        page.navigate("/", Some("utm_source=google&utm_campaign=spring"), None);
        let first = builder.build("page_view", Map::new());
        assert!(first.attribution.is_some());

        page.navigate("/about", None, None);
        let second = builder.build("page_view", Map::new());

        let attribution = second.attribution.as_ref().unwrap();
        assert_eq!(attribution["utm_source"], "google");
        assert_eq!(attribution["utm_campaign"], "spring");
    }

    #[test]
    fn test_payload_flattens_attribution_and_extras() {
        let (page, builder) = builder_with_page();
        page.navigate("/contact", Some("utm_medium=email"), None);

        let mut extra = Map::new();
        extra.insert("form_id".to_string(), json!("newsletter"));
        let record = builder.build("form_submit", extra);
        let payload = record.to_payload();

        assert_eq!(payload["event"], "form_submit");
        assert_eq!(payload["page"], "/contact");
        assert_eq!(payload["utm_medium"], "email");
        assert_eq!(payload["form_id"], "newsletter");
        assert!(payload.get("attribution").is_none());
        assert!(payload.get("extra").is_none());
    }

    #[test]
    fn test_extras_overwrite_top_level_fields() {
        let (page, builder) = builder_with_page();
        page.navigate("/demo", None, None);

        let mut extra = Map::new();
        extra.insert("page".to_string(), json!("/overridden"));
        let record = builder.build("click", extra);
        let payload = record.to_payload();

        assert_eq!(payload["page"], "/overridden");
    }

    #[test]
    fn test_event_hash_deterministic() {
        let (page, builder) = builder_with_page();
        page.navigate("/", None, None);

        let record = builder.build("page_view", Map::new());
        assert_eq!(record.compute_hash(), record.compute_hash());
        assert_eq!(record.event_hash.as_deref().unwrap().len(), 32);
    }

    #[test]
    fn test_timestamp_is_rfc3339_utc() {
        let (page, builder) = builder_with_page();
        page.navigate("/", None, None);

        let payload = builder.build("page_view", Map::new()).to_payload();
        let timestamp = payload["timestamp"].as_str().unwrap();
        assert!(timestamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }
}
