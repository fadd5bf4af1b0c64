//! Test utilities: a scripted transport and JSON fixtures.
//!
//! The mock uses `Arc<Mutex<_>>` for interior mutability so tests can keep a
//! clone and assert on the requests it recorded.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::GatewayConfig;
use crate::error::ApiError;
use crate::request::{PreparedRequest, RawResponse};
use crate::traits::Transport;

/// Gateway config pointing at a fake host, with the production rate limit.
pub fn test_config() -> GatewayConfig {
    GatewayConfig::new("http://api.test").expect("static test URL is valid")
}

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

struct ScriptedReply {
    result: Result<RawResponse, ApiError>,
    delay: Duration,
}

/// A dispatched request and the (tokio) instant it reached the transport.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: PreparedRequest,
    pub at: Instant,
}

/// Transport that replays scripted replies in order and records every call.
///
/// Once the script runs out it answers `200 {}`.
#[derive(Clone, Default)]
pub struct MockTransport {
    replies: Arc<Mutex<VecDeque<ScriptedReply>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: Result<RawResponse, ApiError>) {
        self.push_delayed(result, Duration::ZERO);
    }

    pub fn push_json(&self, value: serde_json::Value) {
        self.push(Ok(RawResponse::ok(value.to_string())));
    }

    pub fn push_delayed(&self, result: Result<RawResponse, ApiError>, delay: Duration) {
        self.replies
            .lock()
            .unwrap()
            .push_back(ScriptedReply { result, delay });
    }

    pub fn calls(&self) -> Vec<PreparedRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.request.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn dispatch_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|c| c.at).collect()
    }

    /// Request paths relative to [`test_config`]'s base URL.
    pub fn paths(&self) -> Vec<String> {
        let base = test_config().base_url;
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| {
                c.request
                    .url
                    .strip_prefix(&base)
                    .unwrap_or(&c.request.url)
                    .to_string()
            })
            .collect()
    }
}

impl Transport for MockTransport {
    async fn execute(&self, request: &PreparedRequest) -> Result<RawResponse, ApiError> {
        self.calls.lock().unwrap().push(RecordedCall {
            request: request.clone(),
            at: Instant::now(),
        });

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(ScriptedReply { result, delay }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                result
            }
            None => Ok(RawResponse::ok("{}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// JSON for a single search result row.
pub fn vacancy_json(id: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "title": format!("Vacancy {id}"),
        "url": format!("https://www.vdab.be/vindeenjob/vacatures/{id}"),
        "company": { "id": "c-1", "name": "Acme NV" },
        "publicationDate": "2024-03-01T08:00:00Z",
        "location": { "city": "Gent", "postalCode": "9000" },
        "expired": false
    })
}

/// JSON for page `page` (1-based) of a result set of `total` items.
pub fn search_page_json(page: u64, limit: u64, total: u64) -> serde_json::Value {
    let offset = (page - 1) * limit;
    let count = total.saturating_sub(offset).min(limit);
    let items: Vec<_> = (offset..offset + count)
        .map(|i| vacancy_json(&format!("v-{i}")))
        .collect();
    serde_json::json!({
        "items": items,
        "total": total,
        "limit": limit,
        "offset": offset,
        "count": count
    })
}
