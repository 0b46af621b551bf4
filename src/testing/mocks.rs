//! Mock transport and handlers for exercising failure paths

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::MeshResult;
use crate::protocol::{TaskRequest, TaskResponse};
use crate::tasks::{MeshBus, MeshTransport, TaskHandler};

/// Bus wrapper that injects transport faults on demand
///
/// Dropped requests force the sender's timeout/retry path; dropped responses
/// exercise the recipient-side response cache; duplicated responses exercise
/// the first-response-wins dedup rule.
pub struct FlakyTransport {
    inner: Arc<MeshBus>,
    request_drops: Mutex<HashMap<String, usize>>,
    response_drops: Mutex<usize>,
    duplicate_responses: Mutex<bool>,
}

impl FlakyTransport {
    pub fn new(inner: Arc<MeshBus>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            request_drops: Mutex::new(HashMap::new()),
            response_drops: Mutex::new(0),
            duplicate_responses: Mutex::new(false),
        })
    }

    /// Silently drop the next `count` requests for a capability
    pub fn drop_next_requests(&self, capability: &str, count: usize) {
        let mut drops = self.request_drops.lock().unwrap();
        *drops.entry(capability.to_string()).or_insert(0) += count;
    }

    /// Silently drop the next `count` responses (any capability)
    pub fn drop_next_responses(&self, count: usize) {
        let mut drops = self.response_drops.lock().unwrap();
        *drops += count;
    }

    /// Deliver every response twice while enabled
    pub fn set_duplicate_responses(&self, enabled: bool) {
        *self.duplicate_responses.lock().unwrap() = enabled;
    }
}

#[async_trait]
impl MeshTransport for FlakyTransport {
    async fn deliver_request(&self, request: TaskRequest) -> MeshResult<()> {
        let should_drop = {
            let mut drops = self.request_drops.lock().unwrap();
            match drops.get_mut(&request.capability_name) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };

        if should_drop {
            debug!(
                task_id = %request.task_id,
                capability = %request.capability_name,
                "Dropping request (injected fault)"
            );
            return Ok(());
        }
        self.inner.deliver_request(request).await
    }

    async fn deliver_response(&self, recipient_id: &str, response: TaskResponse) -> MeshResult<()> {
        {
            let mut drops = self.response_drops.lock().unwrap();
            if *drops > 0 {
                *drops -= 1;
                debug!(task_id = %response.task_id, "Dropping response (injected fault)");
                return Ok(());
            }
        }

        let duplicate = *self.duplicate_responses.lock().unwrap();
        if duplicate {
            self.inner
                .deliver_response(recipient_id, response.clone())
                .await?;
        }
        self.inner.deliver_response(recipient_id, response).await
    }
}

/// Handler returning a fixed result
pub struct FixedHandler {
    result: Value,
}

impl FixedHandler {
    pub fn new(result: Value) -> Arc<Self> {
        Arc::new(Self { result })
    }
}

#[async_trait]
impl TaskHandler for FixedHandler {
    async fn handle(&self, _request: &TaskRequest) -> MeshResult<Value> {
        Ok(self.result.clone())
    }
}

/// Handler that appends a label to a shared log before answering
///
/// The log doubles as an execution counter: occurrences of a label tell how
/// many times the handler actually ran.
pub struct RecordingHandler {
    label: String,
    log: Arc<Mutex<Vec<String>>>,
    result: Value,
    delay: Option<Duration>,
}

impl RecordingHandler {
    pub fn new(label: &str, log: Arc<Mutex<Vec<String>>>, result: Value) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            log,
            result,
            delay: None,
        })
    }

    pub fn with_delay(
        label: &str,
        log: Arc<Mutex<Vec<String>>>,
        result: Value,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            log,
            result,
            delay: Some(delay),
        })
    }
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    async fn handle(&self, _request: &TaskRequest) -> MeshResult<Value> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.log.lock().unwrap().push(self.label.clone());
        Ok(self.result.clone())
    }
}
