//! Per-user message batching.
//!
//! Each user gets a slot with a bounded mailbox. Four triggers flush a
//! slot: timeout (since first message), silence (since last message,
//! shrinking as the queue grows), buffer-full, and the explicit flush
//! signal. Draining the mailbox and marking the slot as processing is
//! one critical section, so a batch is never split by a concurrent
//! submit and at most one processor call per user is in flight.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio::time::sleep;

use casc_domain::config::{BackpressurePolicy, BatchingConfig, ErrorStrategy};

use crate::types::{BatchContext, BatchProcessor, FlushReason, PendingMessage, SubmitOutcome};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SlotState {
    queue: VecDeque<PendingMessage>,
    first_arrival: Option<Instant>,
    last_arrival: Option<Instant>,
    processing: bool,
    last_activity: Instant,
}

struct Slot {
    user_id: String,
    state: Mutex<SlotState>,
    /// Signalled when processing finishes or space frees up.
    space: Notify,
}

impl Slot {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            state: Mutex::new(SlotState {
                queue: VecDeque::new(),
                first_arrival: None,
                last_arrival: None,
                processing: false,
                last_activity: Instant::now(),
            }),
            space: Notify::new(),
        }
    }

    /// Atomically drain the mailbox and mark the slot as processing.
    /// Returns `None` when already processing or empty.
    fn begin_flush(&self) -> Option<Vec<PendingMessage>> {
        let mut state = self.state.lock();
        if state.processing || state.queue.is_empty() {
            return None;
        }
        state.processing = true;
        state.first_arrival = None;
        state.last_arrival = None;
        state.last_activity = Instant::now();
        Some(state.queue.drain(..).collect())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-user batching with bounded cross-user concurrency.
pub struct BatchingService {
    config: BatchingConfig,
    processor: Arc<dyn BatchProcessor>,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    workers: Arc<Semaphore>,
}

impl BatchingService {
    pub fn new(config: BatchingConfig, processor: Arc<dyn BatchProcessor>) -> Arc<Self> {
        let workers = Arc::new(Semaphore::new(config.max_concurrent_users));
        Arc::new(Self {
            config,
            processor,
            slots: Mutex::new(HashMap::new()),
            workers,
        })
    }

    /// The silence threshold shrinks as the queue grows: halved for
    /// every 4 queued messages, floored at 200 ms. A chatty user gets
    /// batched sooner instead of holding the slot open.
    fn adaptive_silence(&self, queue_len: usize) -> Duration {
        let halvings = (queue_len / 4) as u32;
        let ms = self.config.silence_threshold_ms >> halvings.min(63);
        Duration::from_millis(ms.max(200))
    }

    fn slot(&self, user_id: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock();
        slots
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Slot::new(user_id)))
            .clone()
    }

    /// Queue a message for a user, re-arming the slot's flush timers.
    pub async fn submit(
        self: &Arc<Self>,
        user_id: &str,
        text: impl Into<String>,
    ) -> SubmitOutcome {
        let message = PendingMessage::new(text);
        let slot = self.slot(user_id);

        loop {
            let outcome = {
                let mut state = slot.state.lock();
                state.last_activity = Instant::now();

                if state.queue.len() >= self.config.max_batch_size && state.processing {
                    // Mailbox full while the worker is busy.
                    match self.config.backpressure {
                        BackpressurePolicy::Reject => Some(SubmitOutcome::Rejected),
                        BackpressurePolicy::DropOldest => {
                            state.queue.pop_front();
                            state.queue.push_back(message.clone());
                            touch_arrivals(&mut state);
                            Some(SubmitOutcome::DroppedOldest)
                        }
                        BackpressurePolicy::Block => None, // wait below
                    }
                } else {
                    state.queue.push_back(message.clone());
                    touch_arrivals(&mut state);
                    if state.queue.len() >= self.config.max_batch_size && !state.processing {
                        Some(SubmitOutcome::FlushTriggered)
                    } else {
                        Some(SubmitOutcome::Queued {
                            queue_len: state.queue.len(),
                        })
                    }
                }
            };

            match outcome {
                Some(SubmitOutcome::FlushTriggered) => {
                    self.try_flush(&slot, FlushReason::BufferFull);
                    return SubmitOutcome::FlushTriggered;
                }
                Some(done @ (SubmitOutcome::Queued { .. } | SubmitOutcome::DroppedOldest)) => {
                    self.arm_watcher(&slot);
                    return done;
                }
                Some(SubmitOutcome::Rejected) => {
                    tracing::warn!(user_id, "mailbox full; submission rejected");
                    return SubmitOutcome::Rejected;
                }
                None => {
                    // Block policy: wait for space, bounded by the
                    // configured timeout, then re-check.
                    let wait = sleep(Duration::from_millis(self.config.block_timeout_ms));
                    tokio::select! {
                        _ = slot.space.notified() => continue,
                        _ = wait => {
                            tracing::warn!(user_id, "blocked submission timed out");
                            return SubmitOutcome::Rejected;
                        }
                    }
                }
            }
        }
    }

    /// Explicit flush signal. Returns whether a flush actually started.
    pub fn flush(self: &Arc<Self>, user_id: &str) -> bool {
        let slot = {
            let slots = self.slots.lock();
            match slots.get(user_id) {
                Some(slot) => slot.clone(),
                None => return false,
            }
        };
        self.try_flush(&slot, FlushReason::Unknown)
    }

    /// Number of queued (not yet flushed) messages for a user.
    pub fn queued_len(&self, user_id: &str) -> usize {
        let slots = self.slots.lock();
        slots
            .get(user_id)
            .map(|s| s.state.lock().queue.len())
            .unwrap_or(0)
    }

    /// Whether a processor call for the user is currently in flight.
    pub fn is_processing(&self, user_id: &str) -> bool {
        let slots = self.slots.lock();
        slots
            .get(user_id)
            .map(|s| s.state.lock().processing)
            .unwrap_or(false)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }

    // ── Triggers ──────────────────────────────────────────────────

    /// Arm a timer task that fires the earliest of the timeout and
    /// (adaptive) silence deadlines. Each submit arms a fresh watcher;
    /// stale watchers wake, find their condition no longer met, and
    /// exit.
    fn arm_watcher(self: &Arc<Self>, slot: &Arc<Slot>) {
        let (first, last, queue_len) = {
            let state = slot.state.lock();
            match (state.first_arrival, state.last_arrival) {
                (Some(f), Some(l)) => (f, l, state.queue.len()),
                _ => return,
            }
        };
        let timeout_at = first + Duration::from_millis(self.config.max_wait_ms);
        let silence_at = last + self.adaptive_silence(queue_len);
        let wake_at = timeout_at.min(silence_at);

        let service = self.clone();
        let slot = slot.clone();
        tokio::spawn(async move {
            let now = Instant::now();
            if wake_at > now {
                sleep(wake_at - now).await;
            }
            if let Some(reason) = service.due_reason(&slot) {
                service.try_flush(&slot, reason);
            }
        });
    }

    /// Which trigger, if any, is due for the slot right now.
    fn due_reason(&self, slot: &Arc<Slot>) -> Option<FlushReason> {
        let state = slot.state.lock();
        if state.processing || state.queue.is_empty() {
            return None;
        }
        let now = Instant::now();
        if state
            .first_arrival
            .is_some_and(|f| now >= f + Duration::from_millis(self.config.max_wait_ms))
        {
            return Some(FlushReason::Timeout);
        }
        if state
            .last_arrival
            .is_some_and(|l| now >= l + self.adaptive_silence(state.queue.len()))
        {
            return Some(FlushReason::Silence);
        }
        None
    }

    /// Drain + dispatch when the slot is idle. Returns whether a batch
    /// was handed to a worker.
    fn try_flush(self: &Arc<Self>, slot: &Arc<Slot>, reason: FlushReason) -> bool {
        let Some(batch) = slot.begin_flush() else {
            return false;
        };
        let service = self.clone();
        let slot = slot.clone();
        tokio::spawn(async move {
            service.dispatch(slot, batch, reason).await;
        });
        true
    }

    // ── Worker ────────────────────────────────────────────────────

    async fn dispatch(self: Arc<Self>, slot: Arc<Slot>, batch: Vec<PendingMessage>, reason: FlushReason) {
        let Ok(_permit) = self.workers.clone().acquire_owned().await else {
            return; // semaphore closed only at teardown
        };

        let context = BatchContext {
            batch_id: format!("batch_{}", uuid::Uuid::new_v4().simple()),
            first_message_id: batch.first().map(|m| m.id.clone()).unwrap_or_default(),
            last_message_id: batch.last().map(|m| m.id.clone()).unwrap_or_default(),
            reason,
            retry_attempt: 0,
        };

        let mut attempt: u32 = 0;
        loop {
            let mut ctx = context.clone();
            ctx.retry_attempt = attempt;
            match self.processor.process(&slot.user_id, &batch, &ctx).await {
                Ok(()) => break,
                Err(e) => match self.config.error_strategy {
                    ErrorStrategy::Retry => {
                        attempt += 1;
                        if attempt < self.config.retry_max_attempts {
                            let delay = Duration::from_millis(
                                self.config.retry_base_delay_ms
                                    * 2u64.saturating_pow(attempt - 1),
                            );
                            tracing::warn!(
                                user_id = %slot.user_id,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "batch processing failed; retrying"
                            );
                            sleep(delay).await;
                            continue;
                        }
                        tracing::error!(
                            user_id = %slot.user_id,
                            batch_id = %context.batch_id,
                            error = %e,
                            "batch processing exhausted retries; dead-lettering"
                        );
                        break;
                    }
                    ErrorStrategy::DeadLetter => {
                        tracing::error!(
                            user_id = %slot.user_id,
                            batch_id = %context.batch_id,
                            messages = batch.len(),
                            error = %e,
                            "batch dead-lettered"
                        );
                        break;
                    }
                    ErrorStrategy::Drop => {
                        tracing::warn!(
                            user_id = %slot.user_id,
                            messages = batch.len(),
                            error = %e,
                            "batch dropped"
                        );
                        break;
                    }
                    ErrorStrategy::Ignore => {
                        tracing::debug!(user_id = %slot.user_id, error = %e, "batch error ignored");
                        break;
                    }
                },
            }
        }

        // Release the slot and wake any blocked submitters.
        {
            let mut state = slot.state.lock();
            state.processing = false;
            state.last_activity = Instant::now();
        }
        slot.space.notify_waiters();

        // Messages may have queued while we were processing.
        let backlog = {
            let state = slot.state.lock();
            state.queue.len()
        };
        if backlog >= self.config.max_batch_size {
            self.try_flush(&slot, FlushReason::BufferFull);
        } else if backlog > 0 {
            self.arm_watcher(&slot);
        }
    }

    // ── Cleanup ───────────────────────────────────────────────────

    /// Remove slots that are empty and idle for longer than
    /// `idle_eviction`. Returns the number of evicted slots.
    pub fn evict_idle(&self) -> usize {
        let horizon = Duration::from_millis(self.config.idle_eviction_ms);
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| {
            let state = slot.state.lock();
            state.processing
                || !state.queue.is_empty()
                || state.last_activity.elapsed() < horizon
        });
        before - slots.len()
    }

    /// Spawn the periodic idle-slot sweep.
    pub fn spawn_idle_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        let interval = Duration::from_millis((self.config.idle_eviction_ms / 4).max(1_000));
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                let evicted = service.evict_idle();
                if evicted > 0 {
                    tracing::debug!(evicted, "idle batching slots evicted");
                }
            }
        })
    }
}

fn touch_arrivals(state: &mut SlotState) {
    let now = Instant::now();
    if state.first_arrival.is_none() {
        state.first_arrival = Some(now);
    }
    state.last_arrival = Some(now);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
