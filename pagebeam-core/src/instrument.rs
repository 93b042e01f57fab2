//! Page instrumentation: browser signals in, event records out
//!
//! Host embeddings translate raw browser events into [`PageSignal`] values
//! and feed them to a [`PageTracker`], which owns the rest of the pipeline
//! (builder, batching queue, delivery client) with an explicit
//! construction/teardown lifecycle. Exit events bypass the queue and go
//! straight to the delivery client to maximize the chance they depart before
//! teardown.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::attribution::AttributionStore;
use crate::config::TrackerConfig;
use crate::context::{PageContext, SessionStore};
use crate::delivery::{DeliveryClient, DeliveryResult};
use crate::error::Result;
use crate::event::EventBuilder;
use crate::queue::{BatchQueue, QueueStats};

/// Visible element text is trimmed and capped at this many characters.
const MAX_ELEMENT_TEXT: usize = 100;

/// Scroll-depth milestones, each fired at most once per page view.
const SCROLL_MILESTONES: [f64; 4] = [25.0, 50.0, 75.0, 100.0];

/// A browser-level signal entering the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageSignal {
    /// Path or query change, including the initial mount
    Navigate {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// Click on (or nested inside) an anchor/button/ARIA-button element
    Click {
        tag: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        href: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        classes: Option<String>,
    },
    /// Form submission
    Submit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        form_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
    },
    /// Raw scroll position sample
    Scroll {
        scroll_y: f64,
        viewport: f64,
        document_height: f64,
    },
    /// The page is about to unload
    Unload,
}

/// Per-page-view state: entry instant plus the monotonic scroll watermark.
struct PageVisit {
    entered_at: Instant,
    max_depth: f64,
    fired: [bool; SCROLL_MILESTONES.len()],
}

impl PageVisit {
    fn fresh() -> Self {
        Self {
            entered_at: Instant::now(),
            max_depth: 0.0,
            fired: [false; SCROLL_MILESTONES.len()],
        }
    }
}

/// Drives the tracking pipeline from [`PageSignal`]s.
///
/// The mount-once integration point for hosts: construct with [`mount`],
/// feed signals through [`handle`], track custom events with
/// [`track`]/[`track_now`], and call [`shutdown`] on teardown.
///
/// [`mount`]: PageTracker::mount
/// [`handle`]: PageTracker::handle
/// [`track`]: PageTracker::track
/// [`track_now`]: PageTracker::track_now
/// [`shutdown`]: PageTracker::shutdown
pub struct PageTracker {
    page: Arc<dyn PageContext>,
    builder: EventBuilder,
    queue: BatchQueue,
    client: Arc<DeliveryClient>,
    settle_delay: Duration,
    visit: Mutex<PageVisit>,
}

impl PageTracker {
    /// Build the whole pipeline from configuration and host capabilities.
    pub fn mount(
        config: &TrackerConfig,
        page: Arc<dyn PageContext>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let client = Arc::new(DeliveryClient::new(config.clone())?);
        let queue = BatchQueue::from_config(Arc::clone(&client), config);
        let builder = EventBuilder::new(Arc::clone(&page), AttributionStore::new(store));

        Ok(Self::with_parts(
            page,
            builder,
            queue,
            client,
            config.settle_delay(),
        ))
    }

    /// Assemble from pre-built parts (dependency injection for hosts that
    /// share a client or need a customized builder).
    pub fn with_parts(
        page: Arc<dyn PageContext>,
        builder: EventBuilder,
        queue: BatchQueue,
        client: Arc<DeliveryClient>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            page,
            builder,
            queue,
            client,
            settle_delay,
            visit: Mutex::new(PageVisit::fresh()),
        }
    }

    fn visit(&self) -> MutexGuard<'_, PageVisit> {
        self.visit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed one browser signal into the pipeline.
    pub async fn handle(&self, signal: PageSignal) {
        match signal {
            PageSignal::Navigate { path, query, title } => {
                self.page
                    .navigate(&path, query.as_deref(), title.as_deref());
                *self.visit() = PageVisit::fresh();

                // Let the page finish rendering so the title is accurate
                if !self.settle_delay.is_zero() {
                    tokio::time::sleep(self.settle_delay).await;
                }

                let mut extra = Map::new();
                if let Some(title) = self.page.title() {
                    extra.insert("title".to_string(), json!(title));
                }
                self.queue.add(self.builder.build("page_view", extra));
            }

            PageSignal::Click {
                tag,
                text,
                href,
                id,
                classes,
            } => {
                let mut extra = Map::new();
                extra.insert("element_type".to_string(), json!(tag));
                if let Some(text) = text.as_deref().and_then(cap_element_text) {
                    extra.insert("element_text".to_string(), json!(text));
                }
                if let Some(href) = href {
                    extra.insert("element_href".to_string(), json!(href));
                }
                if let Some(id) = id {
                    extra.insert("element_id".to_string(), json!(id));
                }
                if let Some(classes) = classes {
                    extra.insert("element_classes".to_string(), json!(classes));
                }
                self.queue.add(self.builder.build("click", extra));
            }

            PageSignal::Submit {
                form_id,
                action,
                method,
            } => {
                let mut extra = Map::new();
                if let Some(form_id) = form_id {
                    extra.insert("form_id".to_string(), json!(form_id));
                }
                if let Some(action) = action {
                    extra.insert("form_action".to_string(), json!(action));
                }
                if let Some(method) = method {
                    extra.insert("form_method".to_string(), json!(method));
                }
                self.queue.add(self.builder.build("form_submit", extra));
            }

            PageSignal::Scroll {
                scroll_y,
                viewport,
                document_height,
            } => {
                for milestone in self.crossed_milestones(scroll_y, viewport, document_height) {
                    let mut extra = Map::new();
                    extra.insert("depth_percent".to_string(), json!(milestone as u64));
                    self.queue.add(self.builder.build("scroll", extra));
                }
            }

            PageSignal::Unload => {
                let elapsed_secs = self.visit().entered_at.elapsed().as_secs();
                let mut extra = Map::new();
                extra.insert("time_on_page_secs".to_string(), json!(elapsed_secs));

                // Bypass the queue so the exit event departs before teardown
                let record = self.builder.build("page_exit", extra);
                self.client.send(&record).await;

                self.queue.flush().await;
            }
        }
    }

    /// Milestones newly crossed by this scroll sample, in ascending order.
    fn crossed_milestones(&self, scroll_y: f64, viewport: f64, document_height: f64) -> Vec<f64> {
        if document_height <= 0.0 {
            return Vec::new();
        }

        let depth = ((scroll_y + viewport) / document_height * 100.0).clamp(0.0, 100.0);

        let mut visit = self.visit();
        if depth > visit.max_depth {
            visit.max_depth = depth;
        }

        let mut crossed = Vec::new();
        for (i, milestone) in SCROLL_MILESTONES.iter().enumerate() {
            if !visit.fired[i] && visit.max_depth >= *milestone {
                visit.fired[i] = true;
                crossed.push(*milestone);
            }
        }
        crossed
    }

    /// Track a custom event through the batching queue.
    pub fn track(&self, event: &str, extra: Map<String, Value>) {
        self.queue.add(self.builder.build(event, extra));
    }

    /// Track a custom event and deliver it immediately, bypassing the queue.
    pub async fn track_now(&self, event: &str, extra: Map<String, Value>) -> DeliveryResult {
        self.client.send(&self.builder.build(event, extra)).await
    }

    /// Flush pending events on teardown.
    pub async fn shutdown(&self) {
        self.queue.flush().await;
    }

    /// Queue counter snapshot.
    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Records waiting in the batching queue.
    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }
}

/// Trim visible text and cap it at [`MAX_ELEMENT_TEXT`] characters.
fn cap_element_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_ELEMENT_TEXT).collect())
}
