//! Throttled request gateway.
//!
//! Every outbound API call goes through a [`Gateway`]. Requests wait in a
//! FIFO queue and are dispatched one at a time, with the start of each call
//! spaced at least `1 / rate_limit` seconds after the start of the previous
//! one.
//!
//! # Drain states
//!
//! ```text
//! IDLE --[enqueue]--> DRAINING --[queue empty]--> IDLE
//! ```
//!
//! The drain task is spawned by the first enqueue that finds the gateway
//! idle and exits as soon as it pops from an empty queue. Both transitions
//! happen under the queue lock, so a request is never left queued without a
//! drain task.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::error::{ApiError, TransportCode};
use crate::request::{PreparedRequest, RawResponse, RequestDescriptor};
use crate::traits::{CredentialStore, Transport};

pub const PINNED_CERT_HEADER: &str = "X-Pinned-Cert";

/// Whether a drain task is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Idle,
    Draining,
}

impl std::fmt::Display for DrainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DrainState::Idle => write!(f, "idle"),
            DrainState::Draining => write!(f, "draining"),
        }
    }
}

type Reply = oneshot::Sender<Result<RawResponse, ApiError>>;

struct QueuedRequest {
    id: Uuid,
    descriptor: RequestDescriptor,
    enqueued_at: Instant,
    deadline: Instant,
    reply: Reply,
}

struct QueueState {
    queue: VecDeque<QueuedRequest>,
    draining: bool,
    last_dispatch: Option<Instant>,
}

struct Shared<T, C> {
    transport: T,
    credentials: C,
    config: GatewayConfig,
    interval: Duration,
    state: Mutex<QueueState>,
}

/// Rate-limited, authenticated entry point for API calls.
///
/// Cloning is cheap and clones share one queue. Separate `Gateway::new`
/// calls produce fully independent queues.
pub struct Gateway<T, C> {
    shared: Arc<Shared<T, C>>,
}

impl<T, C> Clone for Gateway<T, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport, C: CredentialStore> Gateway<T, C> {
    pub fn new(transport: T, credentials: C, config: GatewayConfig) -> Self {
        let interval = config.dispatch_interval();
        Self {
            shared: Arc::new(Shared {
                transport,
                credentials,
                config,
                interval,
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    draining: false,
                    last_dispatch: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.shared.config
    }

    pub fn credentials(&self) -> &C {
        &self.shared.credentials
    }

    pub fn state(&self) -> DrainState {
        if self.shared.lock_state().draining {
            DrainState::Draining
        } else {
            DrainState::Idle
        }
    }

    /// Number of requests waiting for dispatch (excluding the one in flight).
    pub fn queued(&self) -> usize {
        self.shared.lock_state().queue.len()
    }

    /// Queue a request and decode its JSON body as `R`.
    pub async fn enqueue<R: DeserializeOwned>(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<R, ApiError> {
        let response = self.enqueue_raw(descriptor).await?;
        decode(&response.body)
    }

    /// Queue a request and return the raw 2xx response.
    ///
    /// Dropping the returned future before dispatch removes the request from
    /// the queue without spending a rate-limit slot.
    pub async fn enqueue_raw(&self, descriptor: RequestDescriptor) -> Result<RawResponse, ApiError> {
        let deadline = Instant::now() + self.shared.config.timeout;
        let rx = self.submit(descriptor, deadline);

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ApiError::transport(
                TransportCode::Unknown,
                "Gateway dropped the request before it settled",
            )),
            Err(_) => Err(self.shared.timeout_error()),
        }
    }

    /// Like [`enqueue`](Self::enqueue), but gives up with
    /// [`ApiError::Cancelled`] once `cancel` fires.
    ///
    /// A request cancelled while still queued never reaches the transport. A
    /// request already in flight runs to completion and its result is dropped.
    pub async fn enqueue_cancellable<R: DeserializeOwned>(
        &self,
        descriptor: RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<R, ApiError> {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        tokio::select! {
            result = self.enqueue::<R>(descriptor) => result,
            () = cancel.cancelled() => {
                tracing::debug!("Request cancelled by caller");
                Err(ApiError::Cancelled)
            }
        }
    }

    fn submit(
        &self,
        descriptor: RequestDescriptor,
        deadline: Instant,
    ) -> oneshot::Receiver<Result<RawResponse, ApiError>> {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();

        let start_drain = {
            let mut state = self.shared.lock_state();
            tracing::debug!(
                request_id = %id,
                method = %descriptor.method(),
                path = %descriptor.path(),
                queued = state.queue.len(),
                "Request enqueued"
            );
            state.queue.push_back(QueuedRequest {
                id,
                descriptor,
                enqueued_at: Instant::now(),
                deadline,
                reply: tx,
            });
            if state.draining {
                false
            } else {
                state.draining = true;
                true
            }
        };

        if start_drain {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(shared.drain());
        }

        rx
    }
}

impl<T: Transport, C: CredentialStore> Shared<T, C> {
    /// Acquires the state lock, recovering from poison if necessary.
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned gateway queue lock");
            poisoned.into_inner()
        })
    }

    fn timeout_error(&self) -> ApiError {
        ApiError::transport(
            TransportCode::Timeout,
            format!("timeout of {}ms exceeded", self.config.timeout.as_millis()),
        )
    }

    async fn drain(self: Arc<Self>) {
        tracing::debug!("Gateway draining");

        loop {
            let job = {
                let mut state = self.lock_state();
                loop {
                    match state.queue.pop_front() {
                        None => {
                            state.draining = false;
                            tracing::debug!("Gateway idle");
                            return;
                        }
                        Some(job) if job.reply.is_closed() => {
                            tracing::debug!(request_id = %job.id, "Dropping abandoned request");
                        }
                        Some(job) => break job,
                    }
                }
            };

            let ready_at = self.lock_state().last_dispatch.map(|t| t + self.interval);
            if let Some(ready_at) = ready_at {
                let now = Instant::now();
                if ready_at > now {
                    tracing::debug!(
                        request_id = %job.id,
                        wait_ms = %(ready_at - now).as_millis(),
                        "Throttling request"
                    );
                    tokio::time::sleep_until(ready_at).await;
                }
            }

            if job.reply.is_closed() {
                tracing::debug!(request_id = %job.id, "Dropping request abandoned while throttled");
                continue;
            }

            self.lock_state().last_dispatch = Some(Instant::now());
            let result = self.dispatch(&job).await;

            // The caller may have timed out or been cancelled mid-flight.
            if job.reply.send(result).is_err() {
                tracing::debug!(request_id = %job.id, "Result discarded, caller went away");
            }
        }
    }

    async fn dispatch(&self, job: &QueuedRequest) -> Result<RawResponse, ApiError> {
        let request = self.prepare(&job.descriptor).await;

        tracing::debug!(
            request_id = %job.id,
            method = %request.method,
            url = %request.url,
            queued_ms = %job.enqueued_at.elapsed().as_millis(),
            "Dispatching request"
        );

        let response =
            match tokio::time::timeout_at(job.deadline, self.transport.execute(&request)).await {
                Ok(result) => result.inspect_err(|e| {
                    tracing::debug!(request_id = %job.id, error = %e, "Transport failed");
                })?,
                Err(_) => return Err(self.timeout_error()),
            };

        if !response.is_success() {
            tracing::debug!(
                request_id = %job.id,
                status = response.status,
                "Non-success status"
            );
            return Err(ApiError::from_status(response.status, &response.body));
        }

        Ok(response)
    }

    /// Resolve the URL and attach headers. The credential is read fresh for
    /// every request; an unreadable store means an unauthenticated request.
    async fn prepare(&self, descriptor: &RequestDescriptor) -> PreparedRequest {
        let token = match self.credentials.get().await {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, "Credential store unavailable, sending unauthenticated request");
                None
            }
        };

        let mut headers = vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        if let Some(token) = token {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        headers.push((PINNED_CERT_HEADER.to_string(), self.config.pinned_cert.clone()));

        let path = descriptor.path();
        let url = if path.starts_with('/') {
            format!("{}{}", self.config.base_url, path)
        } else {
            format!("{}/{}", self.config.base_url, path)
        };

        PreparedRequest {
            method: descriptor.method(),
            url,
            headers,
            query: descriptor
                .query_params()
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
            body: descriptor.body().cloned(),
        }
    }
}

/// Decode a JSON response body, keeping the raw text on failure.
pub fn decode<R: DeserializeOwned>(body: &str) -> Result<R, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::Decode {
        message: e.to_string(),
        body: body.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CredentialError, ErrorKind};
    use crate::testutil::{MockTransport, test_config};
    use crate::traits::MemoryCredentialStore;

    fn gateway(transport: &MockTransport) -> Gateway<MockTransport, MemoryCredentialStore> {
        Gateway::new(
            transport.clone(),
            MemoryCredentialStore::new(),
            test_config(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_are_spaced_by_rate_limit() {
        let transport = MockTransport::new();
        let gw = gateway(&transport);

        let calls = (0..5).map(|i| gw.enqueue_raw(RequestDescriptor::get(format!("/r/{i}"))));
        let results = futures::future::join_all(calls).await;
        assert!(results.iter().all(Result::is_ok));

        let times = transport.dispatch_times();
        assert_eq!(times.len(), 5);
        let interval = Duration::from_secs(1) / 3;
        for (k, at) in times.iter().enumerate() {
            assert!(
                *at - times[0] >= interval * k as u32,
                "dispatch {k} came too early: {:?}",
                *at - times[0]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_order_is_fifo_regardless_of_latency() {
        let transport = MockTransport::new();
        transport.push_delayed(Ok(RawResponse::ok("{}")), Duration::from_millis(900));
        transport.push_delayed(Ok(RawResponse::ok("{}")), Duration::from_millis(10));
        transport.push_delayed(Ok(RawResponse::ok("{}")), Duration::from_millis(400));
        let gw = gateway(&transport);

        let (a, b, c) = tokio::join!(
            gw.enqueue_raw(RequestDescriptor::get("/a")),
            gw.enqueue_raw(RequestDescriptor::get("/b")),
            gw.enqueue_raw(RequestDescriptor::get("/c")),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(transport.paths(), vec!["/a", "/b", "/c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_request_in_flight() {
        let transport = MockTransport::new();
        transport.push_delayed(Ok(RawResponse::ok("{}")), Duration::from_secs(2));
        transport.push(Ok(RawResponse::ok("{}")));
        let gw = gateway(&transport);

        let start = Instant::now();
        let (_, _) = tokio::join!(
            gw.enqueue_raw(RequestDescriptor::get("/slow")),
            gw.enqueue_raw(RequestDescriptor::get("/fast")),
        );
        let times = transport.dispatch_times();
        assert!(times[1] - start >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_survives_idle_periods() {
        let transport = MockTransport::new();
        let gw = gateway(&transport);

        gw.enqueue_raw(RequestDescriptor::get("/first")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gw.state(), DrainState::Idle);
        gw.enqueue_raw(RequestDescriptor::get("/second")).await.unwrap();

        let times = transport.dispatch_times();
        assert!(times[1] - times[0] >= Duration::from_secs(1) / 3);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_state_returns_to_idle_and_restarts() {
        let transport = MockTransport::new();
        let gw = gateway(&transport);
        assert_eq!(gw.state(), DrainState::Idle);

        gw.enqueue_raw(RequestDescriptor::get("/one")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(gw.state(), DrainState::Idle);
        assert_eq!(gw.queued(), 0);

        // A new enqueue after going idle must be picked up.
        gw.enqueue_raw(RequestDescriptor::get("/two")).await.unwrap();
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn attaches_bearer_token_and_pinned_header() {
        let transport = MockTransport::new();
        let gw = Gateway::new(
            transport.clone(),
            MemoryCredentialStore::with_token("s3cret"),
            test_config(),
        );

        gw.enqueue_raw(RequestDescriptor::get("/vacatures").query("limit", 10u32))
            .await
            .unwrap();

        let call = &transport.calls()[0];
        assert_eq!(call.header("Authorization"), Some("Bearer s3cret"));
        assert_eq!(
            call.header(PINNED_CERT_HEADER),
            Some("sha256//VdabCertificateFingerprint=")
        );
        assert_eq!(call.url, "http://api.test/vacatures");
        assert_eq!(call.query_value("limit"), Some("10"));
    }

    #[tokio::test]
    async fn missing_credential_sends_unauthenticated_request() {
        let transport = MockTransport::new();
        let gw = gateway(&transport);

        gw.enqueue_raw(RequestDescriptor::get("/jobdomeinen")).await.unwrap();

        let call = &transport.calls()[0];
        assert!(call.header("Authorization").is_none());
        assert!(call.header(PINNED_CERT_HEADER).is_some());
    }

    #[derive(Clone)]
    struct BrokenStore;

    impl CredentialStore for BrokenStore {
        async fn get(&self) -> Result<Option<String>, CredentialError> {
            Err(CredentialError("keychain locked".into()))
        }

        async fn set(&self, _value: &str) -> Result<(), CredentialError> {
            Err(CredentialError("keychain locked".into()))
        }

        async fn delete(&self) -> Result<(), CredentialError> {
            Err(CredentialError("keychain locked".into()))
        }
    }

    #[tokio::test]
    async fn unreadable_credential_store_fails_closed() {
        let transport = MockTransport::new();
        let gw = Gateway::new(transport.clone(), BrokenStore, test_config());

        gw.enqueue_raw(RequestDescriptor::get("/jobdomeinen")).await.unwrap();
        assert!(transport.calls()[0].header("Authorization").is_none());
    }

    #[tokio::test]
    async fn credential_is_read_per_request() {
        let transport = MockTransport::new();
        let store = MemoryCredentialStore::new();
        let gw = Gateway::new(transport.clone(), store.clone(), test_config());

        gw.enqueue_raw(RequestDescriptor::get("/a")).await.unwrap();
        store.set("fresh").await.unwrap();
        gw.enqueue_raw(RequestDescriptor::get("/b")).await.unwrap();

        let calls = transport.calls();
        assert!(calls[0].header("Authorization").is_none());
        assert_eq!(calls[1].header("Authorization"), Some("Bearer fresh"));
    }

    #[tokio::test]
    async fn failures_are_normalized() {
        let transport = MockTransport::new();
        transport.push(Err(ApiError::transport(
            TransportCode::Network,
            "connection refused",
        )));
        transport.push(Ok(RawResponse::new(404, r#"{"message":"Not found"}"#)));
        transport.push(Ok(RawResponse::ok("{not json")));
        let gw = gateway(&transport);

        let network = gw
            .enqueue::<serde_json::Value>(RequestDescriptor::get("/a"))
            .await
            .unwrap_err();
        let not_found = gw
            .enqueue::<serde_json::Value>(RequestDescriptor::get("/b"))
            .await
            .unwrap_err();
        let malformed = gw
            .enqueue::<serde_json::Value>(RequestDescriptor::get("/c"))
            .await
            .unwrap_err();

        assert_eq!(network.code(), "ERR_NETWORK");
        assert_eq!(not_found.code(), "ERR_BAD_REQUEST");
        assert_eq!(not_found.status(), Some(404));
        assert_eq!(malformed.code(), "ERR_DECODE");
        assert_eq!(malformed.kind(), ErrorKind::Protocol);
        for err in [network, not_found, malformed] {
            let body = err.body();
            assert!(!body.code.is_empty());
            assert!(!body.message.is_empty());
        }
    }

    #[tokio::test]
    async fn no_automatic_retry() {
        let transport = MockTransport::new();
        transport.push(Ok(RawResponse::new(503, "")));
        let gw = gateway(&transport);

        let err = gw.enqueue_raw(RequestDescriptor::get("/a")).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_timeout_surfaces_as_transport_timeout() {
        let transport = MockTransport::new();
        transport.push_delayed(Ok(RawResponse::ok("{}")), Duration::from_secs(60));
        let gw = gateway(&transport);

        let err = gw.enqueue_raw(RequestDescriptor::get("/slow")).await.unwrap_err();
        assert_eq!(err.code(), "ETIMEDOUT");
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_while_queued_never_dispatches() {
        let transport = MockTransport::new();
        transport.push_delayed(Ok(RawResponse::ok("{}")), Duration::from_secs(1));
        let gw = gateway(&transport);
        let cancel = CancellationToken::new();

        let first = gw.enqueue_raw(RequestDescriptor::get("/first"));
        let second = gw.enqueue_cancellable::<serde_json::Value>(
            RequestDescriptor::get("/second"),
            &cancel,
        );
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        };

        let (first, second, ()) = tokio::join!(first, second, canceller);
        assert!(first.is_ok());
        assert!(matches!(second, Err(ApiError::Cancelled)));

        // Let the drain task pop the abandoned entry.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.paths(), vec!["/first"]);
        assert_eq!(gw.state(), DrainState::Idle);
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits() {
        let transport = MockTransport::new();
        let gw = gateway(&transport);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = gw
            .enqueue_cancellable::<serde_json::Value>(RequestDescriptor::get("/a"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Cancelled));
        assert_eq!(gw.queued(), 0);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn independent_gateways_do_not_share_a_queue() {
        let transport_a = MockTransport::new();
        let transport_b = MockTransport::new();
        let gw_a = gateway(&transport_a);
        let gw_b = gateway(&transport_b);

        let start = Instant::now();
        let (a, b) = tokio::join!(
            gw_a.enqueue_raw(RequestDescriptor::get("/a")),
            gw_b.enqueue_raw(RequestDescriptor::get("/b")),
        );
        assert!(a.is_ok() && b.is_ok());
        assert!(transport_a.dispatch_times()[0] - start < Duration::from_millis(10));
        assert!(transport_b.dispatch_times()[0] - start < Duration::from_millis(10));
    }

    #[test]
    fn decode_keeps_raw_body() {
        let err = decode::<Vec<u32>>("oops").unwrap_err();
        match err {
            ApiError::Decode { body, .. } => assert_eq!(body, "oops"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
