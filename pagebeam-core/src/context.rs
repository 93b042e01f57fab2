//! Host-environment capabilities
//!
//! The pipeline never touches ambient globals directly. Everything it needs
//! from the host page lives behind two small traits: [`PageContext`] for the
//! current location/title/referrer/user-agent, and [`SessionStore`] for
//! session-scoped key/value storage. A browser embedding implements them
//! against the real page; tests, server-side paths, and the replay CLI use
//! the in-memory implementations here.
//!
//! Every getter degrades to `None` rather than failing, so event building is
//! safe from any execution context.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result};

/// Read access to the host page.
pub trait PageContext: Send + Sync {
    /// Current page path (e.g. `/pricing`)
    fn path(&self) -> Option<String>;

    /// Raw query string without the leading `?` (e.g. `utm_source=google`)
    fn query(&self) -> Option<String>;

    /// Current document title
    fn title(&self) -> Option<String>;

    /// Referrer URL, if any
    fn referrer(&self) -> Option<String>;

    /// User-agent string
    fn user_agent(&self) -> Option<String>;

    /// Apply a navigation to the context.
    ///
    /// Live-page implementations read ambient state and ignore this; snapshot
    /// implementations record the new location so subsequent getters reflect
    /// it. The default is a no-op.
    fn navigate(&self, _path: &str, _query: Option<&str>, _title: Option<&str>) {}
}

/// Session-scoped string key/value storage.
///
/// Implementations map onto whatever per-session storage the host offers.
/// Failures (quota, privacy restrictions) are reported as [`Error::Storage`];
/// callers at the attribution boundary log and swallow them.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory [`SessionStore`] for tests, server-side paths, and replay.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry, modelling end-of-session storage teardown.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Stub [`SessionStore`] for execution contexts with no storage at all.
///
/// Reads yield nothing and writes vanish, which degrades tracking to
/// "no attribution known" without erroring.
#[derive(Debug, Default)]
pub struct NoopStore;

impl SessionStore for NoopStore {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
struct PageState {
    path: Option<String>,
    query: Option<String>,
    title: Option<String>,
    referrer: Option<String>,
}

/// Interior-mutable [`PageContext`] holding a snapshot of one page.
///
/// [`PageContext::navigate`] records the previous location as the new
/// referrer, mirroring how a document referrer behaves across navigations.
#[derive(Debug, Default)]
pub struct SnapshotPage {
    state: Mutex<PageState>,
    user_agent: Option<String>,
}

impl SnapshotPage {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(PageState::default()),
            user_agent: Some(user_agent.into()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn full_url(state: &PageState) -> Option<String> {
        let path = state.path.as_ref()?;
        match state.query.as_deref() {
            Some(q) if !q.is_empty() => Some(format!("{}?{}", path, q)),
            _ => Some(path.clone()),
        }
    }
}

impl PageContext for SnapshotPage {
    fn path(&self) -> Option<String> {
        self.lock().path.clone()
    }

    fn query(&self) -> Option<String> {
        self.lock().query.clone()
    }

    fn title(&self) -> Option<String> {
        self.lock().title.clone()
    }

    fn referrer(&self) -> Option<String> {
        self.lock().referrer.clone()
    }

    fn user_agent(&self) -> Option<String> {
        self.user_agent.clone()
    }

    fn navigate(&self, path: &str, query: Option<&str>, title: Option<&str>) {
        let mut state = self.lock();
        state.referrer = Self::full_url(&state);
        state.path = Some(path.to_string());
        state.query = query.map(str::to_string);
        state.title = title.map(str::to_string);
    }
}

/// Storage failure helper for host implementations.
pub fn storage_error(message: impl Into<String>) -> Error {
    Error::Storage(message.into())
}
