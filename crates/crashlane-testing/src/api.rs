//! Scripted API client.
//!
//! Replies are served from a queue, falling back to a default once the
//! queue is empty. Every request is recorded, and the client tracks how
//! many uploads were in flight at the same time.

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use crashlane_delivery::{ApiClient, DeliveryError, Result, UploadRequest, UploadResponse};

/// What the scripted client answers with.
#[derive(Debug, Clone)]
pub enum Reply {
    /// HTTP response with this status.
    Status(u16),
    /// HTTP response with this status and a `Retry-After` header.
    RetryAfter(u16, u64),
    /// Transport failure.
    Error(DeliveryError),
    /// Never completes; only cancellation ends the upload.
    Hang,
    /// Panics inside the upload future.
    Panic,
}

#[derive(Debug)]
struct State {
    queue: VecDeque<Reply>,
    default: Reply,
    requests: Vec<UploadRequest>,
}

/// [`ApiClient`] double with scripted replies.
#[derive(Debug)]
pub struct ScriptedApiClient {
    state: Mutex<State>,
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedApiClient {
    /// Client answering every upload with HTTP 200.
    pub fn new() -> Self {
        Self::with_default(Reply::Status(200))
    }

    /// Client answering every upload with `reply`.
    pub fn with_default(reply: Reply) -> Self {
        Self {
            state: Mutex::new(State { queue: VecDeque::new(), default: reply, requests: Vec::new() }),
            delay: Duration::ZERO,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Delays every reply by `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queues `reply` for the next upload that has no queued reply yet.
    pub fn push(&self, reply: Reply) {
        self.state().queue.push_back(reply);
    }

    /// All requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<UploadRequest> {
        self.state().requests.clone()
    }

    /// Number of uploads attempted.
    pub fn upload_count(&self) -> usize {
        self.state().requests.len()
    }

    /// Highest number of uploads that were in flight at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn respond(&self, request: UploadRequest) -> Result<UploadResponse> {
        let reply = {
            let mut state = self.state();
            state.requests.push(request);
            state.queue.pop_front().unwrap_or_else(|| state.default.clone())
        };

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match reply {
            Reply::Status(status_code) => Ok(response(status_code, HashMap::new())),
            Reply::RetryAfter(status_code, seconds) => {
                let headers = HashMap::from([("retry-after".to_string(), seconds.to_string())]);
                Ok(response(status_code, headers))
            },
            Reply::Error(error) => Err(error),
            Reply::Hang => std::future::pending().await,
            Reply::Panic => panic!("scripted upload panic"),
        }
    }
}

impl Default for ScriptedApiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiClient for ScriptedApiClient {
    fn upload(
        &self,
        request: UploadRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UploadResponse>> + Send + '_>> {
        Box::pin(self.respond(request))
    }
}

fn response(status_code: u16, headers: HashMap<String, String>) -> UploadResponse {
    UploadResponse { status_code, headers, body: String::new(), duration: Duration::from_millis(1) }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
