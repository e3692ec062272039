//! Poll loops and handler dispatch.
//!
//! [`Dispatcher::start`] spawns one independent poll loop per registered
//! listener. Each cycle of a loop:
//!
//! 1. waits for at least one free worker slot, then takes up to
//!    `max_messages_per_poll` slots that are free right now
//! 2. long-polls the queue for that many messages
//! 3. hands the messages to handler tasks, each message holding one slot
//! 4. deletes every message whose handler succeeded
//!
//! Handler failures, decode failures, panics and timeouts leave the message
//! in the queue; it is redelivered once its visibility timeout lapses. Only
//! cancellation stops a loop, after which it drains by waiting for every slot
//! to come back.

use crate::client::QueueService;
use crate::concurrency::{WorkerSlot, WorkerSlots};
use crate::error::HandlerError;
use crate::message::{MessageEnvelope, MessageGroupId, MessageId, QueueName, ReceiptHandle};
use crate::ordering::{GroupSequencer, GroupTurn};
use crate::registry::{DispatchHandler, Listener, ListenerRegistry};
use crate::retry::{RetryPolicy, RetryState};
use futures::future::join_all;
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;

/// Shortest time between two receives that both came back empty
pub const MIN_EMPTY_POLL_INTERVAL: Duration = Duration::from_millis(200);

// ============================================================================
// State and results
// ============================================================================

/// Lifecycle of one poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    /// Waiting for a free worker slot
    Idle = 0,
    /// A receive call is outstanding
    Polling = 1,
    /// Handing received messages to handler tasks
    Dispatching = 2,
    /// Cancelled, waiting for in-flight handlers
    Draining = 3,
    Stopped = 4,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Polling,
            2 => Self::Dispatching,
            3 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// What happened to one received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// Handled and deleted
    Acked,
    /// Not deleted; the reason is logged
    Failed(String),
    /// Not attempted because an earlier message of its FIFO group failed in
    /// the same poll. Comes back, in order, after the visibility timeout.
    Redelivered,
}

/// Point-in-time view of one listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerStatus {
    pub state: LoopState,
    /// Messages received and not yet acknowledged or failed
    pub in_flight: usize,
    pub peak_in_flight: usize,
    /// Slots reserved for an outstanding receive plus `in_flight`
    pub slots_held: usize,
    pub max_concurrent_messages: usize,
    pub acked: u64,
    pub failed: u64,
    pub redelivered: u64,
}

/// Counters shared between a poll loop, its handler tasks and the handle
struct ListenerStats {
    state: AtomicU8,
    acked: AtomicU64,
    failed: AtomicU64,
    redelivered: AtomicU64,
    slots: WorkerSlots,
}

impl ListenerStats {
    fn new(slots: WorkerSlots) -> Self {
        Self {
            state: AtomicU8::new(LoopState::Idle as u8),
            acked: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            redelivered: AtomicU64::new(0),
            slots,
        }
    }

    fn set_state(&self, state: LoopState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn record(&self, result: &DispatchResult) {
        let counter = match result {
            DispatchResult::Acked => &self.acked,
            DispatchResult::Failed(_) => &self.failed,
            DispatchResult::Redelivered => &self.redelivered,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> ListenerStatus {
        ListenerStatus {
            state: LoopState::from_u8(self.state.load(Ordering::SeqCst)),
            in_flight: self.slots.in_flight(),
            peak_in_flight: self.slots.peak(),
            slots_held: self.slots.held(),
            max_concurrent_messages: self.slots.capacity(),
            acked: self.acked.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            redelivered: self.redelivered.load(Ordering::SeqCst),
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Runs every listener of a registry against one queue service
pub struct Dispatcher {
    service: Arc<dyn QueueService>,
    registry: ListenerRegistry,
    retry_policy: RetryPolicy,
    shutdown_token: CancellationToken,
}

impl Dispatcher {
    pub fn new(service: Arc<dyn QueueService>, registry: ListenerRegistry) -> Self {
        Self {
            service,
            registry,
            retry_policy: RetryPolicy::default(),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Backoff applied when `receive` fails
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Use an externally owned token, so shutdown can be triggered elsewhere
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    /// Spawn one poll loop per listener. Must be called within a tokio runtime.
    pub fn start(self) -> DispatcherHandle {
        info!(listeners = self.registry.len(), "Starting dispatcher");

        let mut loops = Vec::with_capacity(self.registry.len());
        let mut stats = HashMap::with_capacity(self.registry.len());

        for listener in self.registry.iter() {
            let config = listener.config();
            let slots = WorkerSlots::new(config.max_concurrent_messages as usize);
            let listener_stats = Arc::new(ListenerStats::new(slots.clone()));

            let poll_loop = PollLoop {
                listener: Arc::clone(listener),
                service: Arc::clone(&self.service),
                slots,
                stats: Arc::clone(&listener_stats),
                retry_policy: self.retry_policy.clone(),
                shutdown_token: self.shutdown_token.child_token(),
            };

            let queue = config.queue_name().clone();
            stats.insert(queue.clone(), listener_stats);
            loops.push((queue, tokio::spawn(poll_loop.run())));
        }

        DispatcherHandle {
            shutdown_token: self.shutdown_token,
            loops,
            stats,
        }
    }
}

/// Controls a running dispatcher
pub struct DispatcherHandle {
    shutdown_token: CancellationToken,
    loops: Vec<(QueueName, JoinHandle<()>)>,
    stats: HashMap<QueueName, Arc<ListenerStats>>,
}

impl DispatcherHandle {
    /// Current state and counters of the listener for `queue`
    pub fn status(&self, queue: &QueueName) -> Option<ListenerStatus> {
        self.stats.get(queue).map(|s| s.snapshot())
    }

    /// Queues with a running or stopped poll loop
    pub fn queues(&self) -> impl Iterator<Item = &QueueName> {
        self.loops.iter().map(|(queue, _)| queue)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Stop polling and wait for every in-flight handler to finish
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        info!("Dispatcher shutdown initiated");

        let (queues, handles): (Vec<_>, Vec<_>) = self.loops.into_iter().unzip();
        for (queue, result) in queues.iter().zip(join_all(handles).await) {
            if let Err(e) = result {
                error!(queue = %queue, error = %e, "Poll loop task failed");
            }
        }

        info!("All listeners stopped");
    }

    /// Like [`shutdown`](Self::shutdown) but gives up after `timeout`.
    ///
    /// Returns `true` when every listener drained in time. Handlers still
    /// running after the timeout are left to finish in the background.
    pub async fn shutdown_timeout(self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.shutdown()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(timeout = ?timeout, "Listeners did not drain before the shutdown timeout");
                false
            }
        }
    }
}

// ============================================================================
// Poll loop
// ============================================================================

struct PollLoop {
    listener: Arc<Listener>,
    service: Arc<dyn QueueService>,
    slots: WorkerSlots,
    stats: Arc<ListenerStats>,
    retry_policy: RetryPolicy,
    shutdown_token: CancellationToken,
}

impl PollLoop {
    async fn run(self) {
        let config = self.listener.config();
        let queue = config.queue_name().clone();
        let per_poll = config.max_messages_per_poll as usize;
        let mut retry = RetryState::new();
        let mut sequencer = GroupSequencer::new();

        info!(
            queue = %queue,
            max_concurrent_messages = config.max_concurrent_messages,
            max_messages_per_poll = config.max_messages_per_poll,
            payload_type = ?config.payload_type(),
            "Listener started"
        );

        loop {
            self.stats.set_state(LoopState::Idle);
            let mut slots = tokio::select! {
                biased;
                _ = self.shutdown_token.cancelled() => break,
                slots = self.slots.acquire_up_to(per_poll) => slots,
            };
            if slots.is_empty() {
                break;
            }

            self.stats.set_state(LoopState::Polling);
            let started = Instant::now();
            let received = tokio::select! {
                biased;
                _ = self.shutdown_token.cancelled() => break,
                received = self.service.receive_messages(
                    &queue,
                    slots.len() as u32,
                    config.poll_timeout,
                ) => received,
            };

            let envelopes = match received {
                Ok(envelopes) => {
                    if retry.is_failing() {
                        info!(queue = %queue, "Receive recovered");
                    }
                    retry.reset();
                    envelopes
                }
                Err(e) => {
                    drop(slots);
                    let delay = retry.record_failure(&self.retry_policy, &e);
                    if e.is_transient() {
                        warn!(
                            queue = %queue,
                            error = %e,
                            consecutive_failures = retry.consecutive_failures,
                            retry_in = ?delay,
                            "Receive failed"
                        );
                    } else {
                        error!(
                            queue = %queue,
                            error = %e,
                            consecutive_failures = retry.consecutive_failures,
                            retry_in = ?delay,
                            "Receive failed with a non-transient error"
                        );
                    }
                    tokio::select! {
                        biased;
                        _ = self.shutdown_token.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };

            if envelopes.is_empty() {
                drop(slots);
                // Short polls and early returns must not spin on an empty queue
                let idle = MIN_EMPTY_POLL_INTERVAL.saturating_sub(started.elapsed());
                if !idle.is_zero() {
                    tokio::select! {
                        biased;
                        _ = self.shutdown_token.cancelled() => break,
                        _ = tokio::time::sleep(idle) => {}
                    }
                }
                continue;
            }

            // Unused slots go straight back to the pool
            slots.truncate(envelopes.len());

            self.stats.set_state(LoopState::Dispatching);
            debug!(queue = %queue, count = envelopes.len(), "Dispatching messages");
            self.dispatch(envelopes, slots, &mut sequencer);
        }

        self.stats.set_state(LoopState::Draining);
        info!(queue = %queue, in_flight = self.slots.in_flight(), "Listener draining");
        self.slots.drain().await;
        self.stats.set_state(LoopState::Stopped);
        info!(queue = %queue, "Listener stopped");
    }

    fn dispatch(
        &self,
        envelopes: Vec<MessageEnvelope>,
        slots: Vec<WorkerSlot>,
        sequencer: &mut GroupSequencer,
    ) {
        let work: Vec<(MessageEnvelope, WorkerSlot)> = envelopes
            .into_iter()
            .zip(slots)
            .map(|(envelope, mut slot)| {
                slot.occupy();
                (envelope, slot)
            })
            .collect();

        match &self.listener.handler {
            DispatchHandler::Batch(_) => {
                tokio::spawn(self.invocation().run_batch(work));
            }
            DispatchHandler::Single(_) if self.listener.config().queue.is_fifo() => {
                for (group, chain) in group_in_order(work) {
                    let turn = group.map(|g| sequencer.next_turn(&g));
                    tokio::spawn(self.invocation().run_chain(chain, turn));
                }
            }
            DispatchHandler::Single(_) => {
                for item in work {
                    tokio::spawn(self.invocation().run_chain(vec![item], None));
                }
            }
        }
    }

    fn invocation(&self) -> Invocation {
        Invocation {
            listener: Arc::clone(&self.listener),
            service: Arc::clone(&self.service),
            stats: Arc::clone(&self.stats),
        }
    }
}

type GroupChain = (Option<MessageGroupId>, Vec<(MessageEnvelope, WorkerSlot)>);

/// Split a poll into per-group chains, keeping receive order within each group
fn group_in_order(work: Vec<(MessageEnvelope, WorkerSlot)>) -> Vec<GroupChain> {
    let mut chains: Vec<GroupChain> = Vec::new();

    for (envelope, slot) in work {
        let group = envelope.group_id.clone();
        let position = group
            .as_ref()
            .and_then(|g| chains.iter().position(|(k, _)| k.as_ref() == Some(g)));

        match position {
            Some(index) => chains[index].1.push((envelope, slot)),
            None => chains.push((group, vec![(envelope, slot)])),
        }
    }

    chains
}

// ============================================================================
// Handler invocation
// ============================================================================

/// Everything a handler task needs, detached from the poll loop
struct Invocation {
    listener: Arc<Listener>,
    service: Arc<dyn QueueService>,
    stats: Arc<ListenerStats>,
}

impl Invocation {
    fn queue(&self) -> &QueueName {
        self.listener.config().queue_name()
    }

    /// Handle messages one after the other. After the first failure the rest
    /// of the chain is left for redelivery.
    async fn run_chain(
        self,
        chain: Vec<(MessageEnvelope, WorkerSlot)>,
        mut turn: Option<GroupTurn>,
    ) {
        let DispatchHandler::Single(handler) = &self.listener.handler else {
            return;
        };

        if let Some(turn) = turn.as_mut() {
            turn.wait().await;
        }

        let timeout = self.listener.config().handler_timeout;
        let mut halted = false;

        for (envelope, slot) in chain {
            let result = if halted {
                debug!(
                    queue = %self.queue(),
                    message_id = %envelope.message_id,
                    "Skipping message behind a failed group member"
                );
                DispatchResult::Redelivered
            } else {
                let handler = Arc::clone(handler);
                let worker_id = slot.id();
                let message = envelope.clone();
                let outcome =
                    invoke(async move { handler(message, worker_id).await }, timeout).await;
                self.acknowledge(&envelope, outcome, worker_id).await
            };

            halted |= result != DispatchResult::Acked;
            self.stats.record(&result);
            drop(slot);
        }

        if let Some(turn) = turn {
            turn.finish();
        }
    }

    /// Handle a whole poll in one invocation, then delete what succeeded
    async fn run_batch(self, work: Vec<(MessageEnvelope, WorkerSlot)>) {
        let DispatchHandler::Batch(handler) = &self.listener.handler else {
            return;
        };

        let (envelopes, slots): (Vec<_>, Vec<_>) = work.into_iter().unzip();
        let batch: Vec<(MessageEnvelope, usize)> = envelopes
            .iter()
            .cloned()
            .zip(slots.iter().map(WorkerSlot::id))
            .collect();

        let handler = Arc::clone(handler);
        let timeout = self.listener.config().handler_timeout;
        let outcome = invoke(async move { handler(batch).await }, timeout).await;

        let to_delete: Vec<&MessageEnvelope> = match &outcome {
            Ok(()) => envelopes.iter().collect(),
            Err(HandlerError::PartialBatch { failed, message })
                if self.service.reports_per_message_results() =>
            {
                warn!(
                    queue = %self.queue(),
                    failed = failed.len(),
                    batch = envelopes.len(),
                    error = %message,
                    "Batch partially failed; keeping failed messages"
                );
                let failed: HashSet<&MessageId> = failed.iter().collect();
                envelopes
                    .iter()
                    .filter(|e| !failed.contains(&e.message_id))
                    .collect()
            }
            Err(e) => {
                warn!(
                    queue = %self.queue(),
                    batch = envelopes.len(),
                    error = %e,
                    "Batch handler failed; batch will be redelivered"
                );
                Vec::new()
            }
        };

        let acked = self.delete_batch(&to_delete).await;
        for envelope in &envelopes {
            let result = if acked.contains(&envelope.message_id) {
                DispatchResult::Acked
            } else {
                DispatchResult::Failed(match &outcome {
                    Ok(()) => "delete failed".to_string(),
                    Err(e) => e.to_string(),
                })
            };
            self.stats.record(&result);
        }

        drop(slots);
    }

    /// Delete a single message after its handler returned
    async fn acknowledge(
        &self,
        envelope: &MessageEnvelope,
        outcome: Result<(), HandlerError>,
        worker_id: usize,
    ) -> DispatchResult {
        if let Err(e) = outcome {
            warn!(
                queue = %self.queue(),
                message_id = %envelope.message_id,
                worker = worker_id,
                receive_count = envelope.receive_count,
                error = %e,
                "Handler failed; message will be redelivered"
            );
            return DispatchResult::Failed(e.to_string());
        }

        match self.service.delete_message(&envelope.receipt_handle).await {
            Ok(()) => {
                debug!(
                    queue = %self.queue(),
                    message_id = %envelope.message_id,
                    worker = worker_id,
                    "Message acknowledged"
                );
                DispatchResult::Acked
            }
            Err(e) => {
                warn!(
                    queue = %self.queue(),
                    message_id = %envelope.message_id,
                    error = %e,
                    "Failed to delete handled message"
                );
                DispatchResult::Failed(format!("delete failed: {}", e))
            }
        }
    }

    /// Delete the given messages, returning the ids that are gone for good
    async fn delete_batch(&self, envelopes: &[&MessageEnvelope]) -> HashSet<MessageId> {
        let mut deleted = HashSet::new();
        if envelopes.is_empty() {
            return deleted;
        }

        let by_handle: HashMap<&ReceiptHandle, &MessageId> = envelopes
            .iter()
            .map(|e| (&e.receipt_handle, &e.message_id))
            .collect();

        let chunk_size = self.service.max_batch_size().max(1) as usize;
        for chunk in envelopes.chunks(chunk_size) {
            let receipts = chunk.iter().map(|e| e.receipt_handle.clone()).collect();
            match self.service.delete_messages(receipts).await {
                Ok(result) => {
                    for receipt in &result.successful {
                        if let Some(id) = by_handle.get(receipt) {
                            deleted.insert((*id).clone());
                        }
                    }
                    for failure in &result.failed {
                        warn!(
                            queue = %self.queue(),
                            receipt = %failure.receipt.handle(),
                            error = %failure.error,
                            "Failed to delete batch entry"
                        );
                    }
                }
                Err(e) => {
                    warn!(queue = %self.queue(), error = %e, "Batch delete failed");
                }
            }
        }

        deleted
    }
}

/// Run a handler future, turning panics and timeouts into handler errors
async fn invoke<F>(handler: F, timeout: Option<Duration>) -> Result<(), HandlerError>
where
    F: Future<Output = Result<(), HandlerError>> + Send,
{
    let guarded = AssertUnwindSafe(handler).catch_unwind();

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(HandlerError::TimedOut { timeout: limit }),
        },
        None => guarded.await,
    };

    outcome.unwrap_or_else(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Err(HandlerError::Panicked { message })
    })
}
