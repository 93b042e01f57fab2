//! Campaign attribution capture and session identity
//!
//! Attribution parameters (`utm_source`, `utm_medium`, ...) arrive on the
//! first page load that carries them in its URL and must survive every later
//! navigation within the session, even when the query string is gone. The
//! [`AttributionStore`] keeps them in session-scoped storage together with a
//! lazily created session identifier.
//!
//! Storage failures are logged and swallowed here: tracking degrades to
//! "no attribution known" rather than surfacing an error into the host page.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::SessionStore;

/// Campaign-parameter name → value, keyed by the full `utm_*` name.
pub type AttributionParams = BTreeMap<String, String>;

/// Prefix shared by every recognized campaign parameter.
pub const UTM_PREFIX: &str = "utm_";

/// The five conventional campaign parameters.
pub const KNOWN_PARAMS: [&str; 5] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
];

/// Storage key holding the JSON-serialized [`AttributionParams`].
const PARAMS_KEY: &str = "utm_params";

/// Storage key holding the session identifier.
const SESSION_KEY: &str = "session_id";

/// Whether a query-parameter name is a campaign parameter.
fn is_campaign_param(name: &str) -> bool {
    KNOWN_PARAMS.contains(&name) || name.starts_with(UTM_PREFIX)
}

fn decode(raw: &str) -> Cow<'_, str> {
    urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw))
}

/// Extract campaign parameters from a raw query string.
///
/// Accepts the string with or without its leading `?`. Only recognized
/// campaign parameters are kept; everything else is excluded. Pure function,
/// no side effects.
pub fn parse_query(query: &str) -> AttributionParams {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut params = AttributionParams::new();

    for pair in query.split('&') {
        let (name, value) = match pair.split_once('=') {
            Some(split) => split,
            None => continue,
        };
        let name = decode(name);
        let value = decode(value);
        if value.is_empty() || !is_campaign_param(&name) {
            continue;
        }
        params.insert(name.into_owned(), value.into_owned());
    }

    params
}

/// Persists attribution parameters and the session identifier in
/// session-scoped storage.
#[derive(Clone)]
pub struct AttributionStore {
    store: Arc<dyn SessionStore>,
}

impl AttributionStore {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Write each parameter individually plus the aggregate JSON entry.
    ///
    /// Write failures are logged and swallowed so tracking never crashes the
    /// host page.
    pub fn persist(&self, params: &AttributionParams) {
        if params.is_empty() {
            return;
        }

        for (name, value) in params {
            if let Err(e) = self.store.set(name, value) {
                tracing::warn!(param = %name, error = %e, "Failed to store attribution param");
            }
        }

        match serde_json::to_string(params) {
            Ok(serialized) => {
                if let Err(e) = self.store.set(PARAMS_KEY, &serialized) {
                    tracing::warn!(error = %e, "Failed to store aggregate attribution entry");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize attribution params");
            }
        }
    }

    /// Read the aggregate entry back; absent or malformed data yields the
    /// empty map.
    pub fn stored(&self) -> AttributionParams {
        let raw = match self.store.get(PARAMS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return AttributionParams::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stored attribution");
                return AttributionParams::new();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Malformed stored attribution entry, ignoring");
            AttributionParams::new()
        })
    }

    /// Merge stored attribution with the current URL's parameters.
    ///
    /// URL parameters win per key. When the URL contributed anything, the
    /// merged result is persisted immediately so later pages without the
    /// query string keep reporting the original attribution.
    pub fn merged(&self, query: Option<&str>) -> AttributionParams {
        let from_url = query.map(parse_query).unwrap_or_default();
        let mut merged = self.stored();

        if from_url.is_empty() {
            return merged;
        }

        merged.extend(from_url);
        self.persist(&merged);
        merged
    }

    /// Return the session identifier, creating and persisting one if absent.
    ///
    /// Repeated calls within one session return the same value; a cleared
    /// store yields a fresh identifier on next access.
    pub fn session_id(&self) -> String {
        match self.store.get(SESSION_KEY) {
            Ok(Some(id)) => return id,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read session id");
            }
        }

        let id = new_session_id();
        if let Err(e) = self.store.set(SESSION_KEY, &id) {
            tracing::warn!(error = %e, "Failed to persist session id");
        }
        id
    }
}

/// Synthesize `session_<millis>_<base36 suffix>`.
fn new_session_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    format!("session_{}_{}", millis, base36_suffix())
}

/// Random base36 suffix derived from a v4 UUID, truncated to 8 digits.
fn base36_suffix() -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut n = uuid::Uuid::new_v4().as_u128();
    let mut out = String::with_capacity(8);
    while n > 0 && out.len() < 8 {
        out.push(DIGITS[(n % 36) as usize] as char);
        n /= 36;
    }
    if out.is_empty() {
        out.push('0');
    }
    out
}
