//! Integration tests for the pagebeam delivery pipeline
//!
//! Real-HTTP properties run against a minimal TCP stub server; everything
//! the stub receives is captured raw so tests can assert on the wire format.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use pagebeam_core::{
    AttributionStore, DeliveryClient, Environment, EventBuilder, MemoryStore, PageContext,
    PageSignal, PageTracker, SnapshotPage, TrackerConfig,
};

struct StubServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    fn endpoint(&self) -> String {
        format!("http://{}/v1/events", self.addr)
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Spawn a one-response-per-connection HTTP stub returning a fixed status
/// and body.
async fn spawn_stub(status_line: &'static str, body: &'static str) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));

    let hit_counter = hits.clone();
    let request_log = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            hit_counter.fetch_add(1, Ordering::SeqCst);

            let raw = read_request(&mut socket).await;
            request_log.lock().unwrap().push(raw);

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    StubServer {
        addr,
        hits,
        requests,
    }
}

fn headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Read one full HTTP request (headers plus Content-Length body).
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = headers_end(&buf) {
            let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
            let content_length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);

            while buf.len() - (pos + 4) < content_length {
                let n = socket.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            break;
        }
    }

    String::from_utf8_lossy(&buf).into_owned()
}

fn prod_config(endpoint: String) -> TrackerConfig {
    TrackerConfig {
        endpoint: Some(endpoint),
        environment: Environment::Production,
        timeout_secs: 5,
        settle_delay_ms: 0,
        ..Default::default()
    }
}

fn builder_on(page: &Arc<SnapshotPage>) -> EventBuilder {
    EventBuilder::new(
        page.clone(),
        AttributionStore::new(Arc::new(MemoryStore::new())),
    )
}

#[tokio::test]
async fn test_send_delivers_flattened_payload() {
    let stub = spawn_stub("200 OK", "{\"status\":\"ok\",\"message\":\"accepted\"}").await;
    let client = DeliveryClient::new(prod_config(stub.endpoint())).unwrap();

    let page = Arc::new(SnapshotPage::new("pagebeam-test/1.0"));
    page.navigate("/pricing", Some("utm_source=google"), Some("Pricing"));
    let record = builder_on(&page).build("page_view", serde_json::Map::new());

    let result = client.send(&record).await;
    assert!(result.success, "delivery failed: {:?}", result.error);
    assert_eq!(result.message.as_deref(), Some("accepted"));

    let requests = stub.requests();
    assert_eq!(requests.len(), 1);
    let raw = &requests[0];
    assert!(raw.starts_with("POST /v1/events HTTP/1.1"));
    assert!(raw.to_lowercase().contains("content-type: application/json"));
    assert!(raw.contains("\"event\":\"page_view\""));
    assert!(raw.contains("\"page\":\"/pricing\""));
    assert!(raw.contains("\"utm_source\":\"google\""));
    assert!(raw.contains("\"session_id\":\"session_"));
    assert!(raw.contains("\"event_hash\":"));
}

#[tokio::test]
async fn test_send_attaches_bearer_header() {
    let stub = spawn_stub("200 OK", "{}").await;
    let mut config = prod_config(stub.endpoint());
    config.api_key = Some("pb_live_test".to_string());
    let client = DeliveryClient::new(config).unwrap();

    let page = Arc::new(SnapshotPage::new("pagebeam-test/1.0"));
    page.navigate("/", None, None);
    let record = builder_on(&page).build("page_view", serde_json::Map::new());

    assert!(client.send(&record).await.success);

    let raw = stub.requests().remove(0).to_lowercase();
    assert!(raw.contains("authorization: bearer pb_live_test"));
}

#[tokio::test]
async fn test_send_never_errors_on_refused_connection() {
    // Bind then drop so the port is closed
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = DeliveryClient::new(prod_config(format!("http://{}/v1/events", addr))).unwrap();

    let page = Arc::new(SnapshotPage::new("pagebeam-test/1.0"));
    page.navigate("/", None, None);
    let record = builder_on(&page).build("page_view", serde_json::Map::new());

    let result = client.send(&record).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("HTTP request failed"));
}

#[tokio::test]
async fn test_retry_makes_exactly_three_attempts() {
    let stub = spawn_stub("500 Internal Server Error", "{\"error\":\"boom\"}").await;
    let client = DeliveryClient::new(prod_config(stub.endpoint())).unwrap();

    let page = Arc::new(SnapshotPage::new("pagebeam-test/1.0"));
    page.navigate("/", None, None);
    let record = builder_on(&page).build("page_view", serde_json::Map::new());

    let result = client
        .send_with_retry(&record, 3, Duration::from_millis(10))
        .await;

    assert_eq!(stub.hits(), 3);
    assert!(!result.success);
    assert!(result.error.unwrap().contains("500"));
}

#[tokio::test]
async fn test_retry_returns_on_first_success() {
    let stub = spawn_stub("200 OK", "{}").await;
    let client = DeliveryClient::new(prod_config(stub.endpoint())).unwrap();

    let page = Arc::new(SnapshotPage::new("pagebeam-test/1.0"));
    page.navigate("/", None, None);
    let record = builder_on(&page).build("page_view", serde_json::Map::new());

    let result = client
        .send_with_retry(&record, 3, Duration::from_millis(10))
        .await;

    assert_eq!(stub.hits(), 1);
    assert!(result.success);
}

#[tokio::test]
async fn test_success_with_unparsable_body_is_failure() {
    let stub = spawn_stub("200 OK", "ok").await;
    let client = DeliveryClient::new(prod_config(stub.endpoint())).unwrap();

    let page = Arc::new(SnapshotPage::new("pagebeam-test/1.0"));
    page.navigate("/", None, None);
    let record = builder_on(&page).build("page_view", serde_json::Map::new());

    let result = client.send(&record).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("failed to parse response"));
}

#[tokio::test]
async fn test_attribution_persists_across_pages_end_to_end() {
    let stub = spawn_stub("200 OK", "{}").await;
    let mut config = prod_config(stub.endpoint());
    config.batch_size = 100;
    config.flush_interval_ms = 60_000;

    let page = Arc::new(SnapshotPage::new("pagebeam-test/1.0"));
    let tracker =
        PageTracker::mount(&config, page.clone(), Arc::new(MemoryStore::new())).unwrap();

    tracker
        .handle(PageSignal::Navigate {
            path: "/".to_string(),
            query: Some("utm_source=google&utm_campaign=spring".to_string()),
            title: Some("Home".to_string()),
        })
        .await;
    tracker
        .handle(PageSignal::Navigate {
            path: "/about".to_string(),
            query: None,
            title: Some("About".to_string()),
        })
        .await;
    tracker.shutdown().await;

    let requests = stub.requests();
    assert_eq!(requests.len(), 2);
    for raw in &requests {
        assert!(raw.contains("\"utm_source\":\"google\""));
        assert!(raw.contains("\"utm_campaign\":\"spring\""));
    }
    assert!(requests.iter().any(|raw| raw.contains("\"page\":\"/about\"")));

    let stats = tracker.stats();
    assert_eq!(stats.flushes, 1);
    assert_eq!(stats.delivered, 2);
}

#[tokio::test]
async fn test_batch_tolerates_failed_deliveries() {
    let stub = spawn_stub("500 Internal Server Error", "{\"error\":\"boom\"}").await;
    let mut config = prod_config(stub.endpoint());
    config.batch_size = 100;
    config.flush_interval_ms = 60_000;

    let page = Arc::new(SnapshotPage::new("pagebeam-test/1.0"));
    let tracker =
        PageTracker::mount(&config, page.clone(), Arc::new(MemoryStore::new())).unwrap();

    for _ in 0..3 {
        tracker.track("custom", serde_json::Map::new());
    }
    tracker.shutdown().await;

    // One attempt per record, no retries, nothing left pending
    let stats = tracker.stats();
    assert_eq!(stats.flushes, 1);
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.failed, 3);
    assert_eq!(tracker.pending_count(), 0);
    assert_eq!(stub.hits(), 3);
}
