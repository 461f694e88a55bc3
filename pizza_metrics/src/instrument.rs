use crate::names;
use crate::store::MetricStore;
use std::sync::Arc;
use std::time::Instant;

/// In-flight request state handed back to the web layer at request start and
/// returned at completion. Carries everything needed to close out the
/// per-method latency sample.
#[derive(Debug)]
pub struct RequestHandle {
    method: String,
    started: Instant,
}

impl RequestHandle {
    pub fn method(&self) -> &str {
        &self.method
    }
}

/// Request-lifecycle hooks invoked by the external HTTP layer.
///
/// Every operation is synchronous and infallible: one timestamp capture plus
/// a couple of map writes, nothing that can disturb an already-failing
/// request.
#[derive(Clone)]
pub struct RequestInstrumentation {
    store: Arc<MetricStore>,
}

impl RequestInstrumentation {
    pub fn new(store: Arc<MetricStore>) -> Self {
        Self { store }
    }

    /// Counts the request (total and per-method) and starts its latency
    /// clock. Call [`on_request_finish`](Self::on_request_finish) with the
    /// returned handle on every exit path, success or error.
    pub fn on_request_start(&self, method: &str) -> RequestHandle {
        self.store
            .increment_counter(names::HTTP_REQUESTS_TOTAL, 1.0, None);
        self.store.increment_counter(
            names::HTTP_REQUESTS_BY_METHOD,
            1.0,
            Some((names::METHOD_DIM, method)),
        );
        RequestHandle {
            method: method.to_string(),
            started: Instant::now(),
        }
    }

    pub fn on_request_finish(&self, handle: RequestHandle) {
        let elapsed_ms = handle.started.elapsed().as_secs_f64() * 1000.0;
        self.store.record_latency(&handle.method, elapsed_ms);
    }

    /// Marks the resolved identity as active for the sliding window.
    pub fn on_authenticated_identity(&self, user_id: &str) {
        self.store.mark_active(user_id);
    }
}
