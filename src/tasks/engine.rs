//! Per-agent task protocol engine
//!
//! Correlates responses to outstanding requests by task id, enforces
//! per-attempt timeouts, and retries with exponential backoff. Retried
//! attempts reuse the original task id, so a late response from an earlier
//! attempt still resolves the call; the first response wins and later
//! duplicates are dropped. The recipient side deduplicates retried inbound
//! requests and re-sends the cached response when the attempt already
//! completed, which keeps non-idempotent capabilities (queue transitions)
//! safe under lost-response retries.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TaskSection;
use crate::error::{sanitize_error_detail, MeshError, MeshResult};
use crate::protocol::{reason, TaskOutcome, TaskParams, TaskRequest, TaskResponse};

use super::bus::{AgentMailbox, MeshTransport};

/// Executes inbound task requests for the local agent
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, request: &TaskRequest) -> MeshResult<Value>;
}

/// Handler that dispatches to sub-handlers by capability name
#[derive(Default)]
pub struct CapabilityHandlers {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl CapabilityHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to bind a capability to a handler
    pub fn with(mut self, capability: &str, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(capability.to_string(), handler);
        self
    }
}

#[async_trait]
impl TaskHandler for CapabilityHandlers {
    async fn handle(&self, request: &TaskRequest) -> MeshResult<Value> {
        match self.handlers.get(&request.capability_name) {
            Some(handler) => handler.handle(request).await,
            None => Err(MeshError::validation(format!(
                "no handler for capability {}",
                request.capability_name
            ))),
        }
    }
}

struct Waiter {
    rx: oneshot::Receiver<TaskResponse>,
    request: TaskRequest,
}

enum InboundState {
    InFlight,
    Done(TaskResponse),
}

enum Admission {
    New,
    InFlight,
    Done(TaskResponse),
}

/// Dedup ledger for inbound task ids, with a bounded cache of completed
/// responses so lost-response retries can be answered without re-execution.
struct InboundLedger {
    states: HashMap<Uuid, InboundState>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl InboundLedger {
    fn new(capacity: usize) -> Self {
        Self {
            states: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn admit(&mut self, task_id: Uuid) -> Admission {
        match self.states.get(&task_id) {
            Some(InboundState::InFlight) => Admission::InFlight,
            Some(InboundState::Done(response)) => Admission::Done(response.clone()),
            None => {
                self.states.insert(task_id, InboundState::InFlight);
                self.order.push_back(task_id);
                self.prune();
                Admission::New
            }
        }
    }

    fn complete(&mut self, task_id: Uuid, response: TaskResponse) {
        self.states.insert(task_id, InboundState::Done(response));
    }

    fn prune(&mut self) {
        while self.order.len() > self.capacity {
            match self.order.pop_front() {
                Some(old) => {
                    if matches!(self.states.get(&old), Some(InboundState::InFlight)) {
                        // Never evict an in-flight attempt; put it back and stop
                        self.order.push_back(old);
                        break;
                    }
                    self.states.remove(&old);
                }
                None => break,
            }
        }
    }
}

/// One agent's endpoint on the task protocol
pub struct TaskEngine {
    agent_id: String,
    transport: Arc<dyn MeshTransport>,
    config: TaskSection,
    /// Resolution side of outstanding calls, keyed by task id
    pending: Mutex<HashMap<Uuid, oneshot::Sender<TaskResponse>>>,
    /// Caller side of outstanding calls, consumed by await_response
    waiters: Mutex<HashMap<Uuid, Waiter>>,
    handler: RwLock<Option<Arc<dyn TaskHandler>>>,
    inbound: Mutex<InboundLedger>,
}

impl TaskEngine {
    pub fn new(
        agent_id: impl Into<String>,
        transport: Arc<dyn MeshTransport>,
        config: TaskSection,
    ) -> Arc<Self> {
        let inbound_capacity = config.inbound_cache_size;
        Arc::new(Self {
            agent_id: agent_id.into(),
            transport,
            config,
            pending: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            handler: RwLock::new(None),
            inbound: Mutex::new(InboundLedger::new(inbound_capacity)),
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Register the local function that converts an inbound request into a
    /// response (executes the capability)
    pub fn on_task_received(&self, handler: Arc<dyn TaskHandler>) {
        let mut slot = self.handler.write().unwrap();
        *slot = Some(handler);
    }

    /// Start the inbox loops over a bus mailbox
    pub fn start(self: &Arc<Self>, mailbox: AgentMailbox) -> Vec<JoinHandle<()>> {
        let AgentMailbox {
            mut requests,
            mut responses,
        } = mailbox;

        let request_engine = Arc::clone(self);
        let request_loop = tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                request_engine.handle_inbound(request);
            }
            debug!(agent_id = %request_engine.agent_id, "Request mailbox closed");
        });

        let response_engine = Arc::clone(self);
        let response_loop = tokio::spawn(async move {
            while let Some(response) = responses.recv().await {
                response_engine.resolve(response);
            }
            debug!(agent_id = %response_engine.agent_id, "Response mailbox closed");
        });

        vec![request_loop, response_loop]
    }

    /// Create and dispatch a task request; returns the correlation id
    /// without waiting for the result
    pub async fn send_task(
        &self,
        recipient_id: &str,
        capability_name: &str,
        parameters: TaskParams,
        timeout: Duration,
    ) -> MeshResult<Uuid> {
        let request = TaskRequest::new(
            &self.agent_id,
            recipient_id,
            capability_name,
            parameters,
            timeout,
            self.config.max_retries,
        );
        let task_id = request.task_id;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(task_id, tx);
        self.waiters.lock().unwrap().insert(
            task_id,
            Waiter {
                rx,
                request: request.clone(),
            },
        );

        debug!(
            task_id = %task_id,
            recipient = %recipient_id,
            capability = %capability_name,
            "Dispatching task"
        );

        // Delivery failure is not terminal: the recipient may attach before a
        // retry, so the timeout/retry path decides the outcome
        if let Err(e) = self.transport.deliver_request(request).await {
            warn!(task_id = %task_id, error = %e, "Initial task delivery failed");
        }

        Ok(task_id)
    }

    /// Suspend until the task resolves, retrying on timeout
    ///
    /// Returns the final resolution exactly once per task id: the first
    /// response to arrive, or a synthesized FAILURE tagged
    /// `exhausted_retries` after the last attempt's deadline.
    pub async fn await_response(&self, task_id: Uuid) -> MeshResult<TaskResponse> {
        let Waiter { mut rx, request } = self
            .waiters
            .lock()
            .unwrap()
            .remove(&task_id)
            .ok_or(MeshError::UnknownTask { task_id })?;

        let per_attempt = (request.deadline - request.created_at)
            .to_std()
            .unwrap_or_else(|_| self.config.default_timeout());
        let mut attempt: u32 = 0;

        loop {
            match tokio::time::timeout(per_attempt, &mut rx).await {
                Ok(Ok(response)) => {
                    debug!(task_id = %task_id, status = ?response.status, "Task resolved");
                    return Ok(response);
                }
                Ok(Err(_closed)) => {
                    return Err(MeshError::internal(format!(
                        "resolution channel closed for task {task_id}"
                    )));
                }
                Err(_elapsed) => {
                    attempt += 1;
                    if attempt > request.max_retries {
                        // Abandon the call; late responses are dropped by the
                        // dedup rule in resolve()
                        self.pending.lock().unwrap().remove(&task_id);
                        warn!(
                            task_id = %task_id,
                            capability = %request.capability_name,
                            attempts = attempt,
                            "Retries exhausted"
                        );
                        return Ok(TaskResponse::failure(task_id, reason::EXHAUSTED_RETRIES));
                    }

                    let backoff = self.config.backoff_delay(attempt);
                    debug!(
                        task_id = %task_id,
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Task attempt timed out; retrying"
                    );
                    tokio::time::sleep(backoff).await;

                    // Resend with the SAME task id so the first response wins
                    let mut retry = request.clone();
                    retry.retry_count = attempt;
                    if let Err(e) = self.transport.deliver_request(retry).await {
                        warn!(task_id = %task_id, error = %e, "Retry delivery failed");
                    }
                }
            }
        }
    }

    /// Dispatch and await in one step
    pub async fn call(
        &self,
        recipient_id: &str,
        capability_name: &str,
        parameters: TaskParams,
        timeout: Duration,
    ) -> MeshResult<TaskResponse> {
        let task_id = self
            .send_task(recipient_id, capability_name, parameters, timeout)
            .await?;
        self.await_response(task_id).await
    }

    /// Resolve an inbound response against the pending map
    ///
    /// Exactly-once: the first response for a task id consumes the pending
    /// entry; duplicates and late responses find nothing and are dropped.
    pub fn resolve(&self, response: TaskResponse) {
        let sender = self.pending.lock().unwrap().remove(&response.task_id);
        match sender {
            Some(tx) => {
                if tx.send(response).is_err() {
                    // Caller abandoned the wait between removal and send
                    debug!("Dropping response for abandoned call");
                }
            }
            None => {
                debug!(task_id = %response.task_id, "Dropping duplicate or late response");
            }
        }
    }

    /// Outstanding (unresolved) calls
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    fn handle_inbound(self: &Arc<Self>, request: TaskRequest) {
        let admission = self.inbound.lock().unwrap().admit(request.task_id);

        match admission {
            Admission::Done(cached) => {
                // A retried attempt whose response was lost in transit
                debug!(task_id = %request.task_id, "Re-sending cached response for retried task");
                let engine = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = engine
                        .transport
                        .deliver_response(&request.sender_id, cached)
                        .await
                    {
                        warn!(task_id = %request.task_id, error = %e, "Cached response delivery failed");
                    }
                });
            }
            Admission::InFlight => {
                debug!(task_id = %request.task_id, "Dropping retried attempt; original still executing");
            }
            Admission::New => {
                let engine = Arc::clone(self);
                tokio::spawn(async move {
                    engine.execute(request).await;
                });
            }
        }
    }

    async fn execute(self: Arc<Self>, request: TaskRequest) {
        let handler = {
            let slot = self.handler.read().unwrap();
            slot.clone()
        };

        let response = match handler {
            Some(handler) => match handler.handle(&request).await {
                Ok(result) => {
                    info!(
                        task_id = %request.task_id,
                        capability = %request.capability_name,
                        sender = %request.sender_id,
                        "Task completed"
                    );
                    TaskResponse::success(request.task_id, result)
                }
                Err(e) => {
                    warn!(
                        task_id = %request.task_id,
                        capability = %request.capability_name,
                        error = %e,
                        "Task handler failed"
                    );
                    let detail = sanitize_error_detail(&e.to_string());
                    match e.outcome() {
                        TaskOutcome::Error => TaskResponse::error(request.task_id, detail),
                        _ => TaskResponse::failure(request.task_id, detail),
                    }
                }
            },
            None => {
                warn!(task_id = %request.task_id, "No task handler installed");
                TaskResponse::error(request.task_id, reason::NO_HANDLER)
            }
        };

        self.inbound
            .lock()
            .unwrap()
            .complete(request.task_id, response.clone());

        if let Err(e) = self
            .transport
            .deliver_response(&request.sender_id, response)
            .await
        {
            warn!(task_id = %request.task_id, error = %e, "Response delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inbound_ledger_dedup() {
        let mut ledger = InboundLedger::new(8);
        let task_id = Uuid::new_v4();

        assert!(matches!(ledger.admit(task_id), Admission::New));
        assert!(matches!(ledger.admit(task_id), Admission::InFlight));

        let response = TaskResponse::success(task_id, json!({"ok": true}));
        ledger.complete(task_id, response);

        match ledger.admit(task_id) {
            Admission::Done(cached) => assert_eq!(cached.task_id, task_id),
            _ => panic!("expected cached response"),
        }
    }

    #[test]
    fn test_inbound_ledger_prunes_completed_only() {
        let mut ledger = InboundLedger::new(2);

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let third = Uuid::new_v4();

        ledger.admit(first);
        ledger.complete(first, TaskResponse::success(first, json!({})));
        ledger.admit(second);
        ledger.complete(second, TaskResponse::success(second, json!({})));
        ledger.admit(third);

        // Oldest completed entry was evicted; in-flight entry survives
        assert!(matches!(ledger.admit(first), Admission::New));
        assert!(matches!(ledger.admit(third), Admission::InFlight));
    }

    #[test]
    fn test_capability_handlers_unknown_capability() {
        let handlers = CapabilityHandlers::new();
        let request = TaskRequest::new(
            "a",
            "b",
            "unknown",
            TaskParams::Dynamic(json!({})),
            Duration::from_secs(1),
            0,
        );

        let result = futures_executor(handlers.handle(&request));
        assert!(matches!(result, Err(MeshError::Validation { .. })));
    }

    fn futures_executor<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }
}
