//! The scheduler service: reconciliation, timers, and dispatch.

use crate::clock::Clock;
use crate::error::ScheduleError;
use crate::expression::ScheduleExpression;
use crate::store::ScheduleStore;
use crate::types::{ExecutionPolicy, ExecutionStatus, HandlerType, NewSchedule, ScheduleItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Error summaries in the execution log are truncated to this many bytes.
const ERROR_SUMMARY_LIMIT: usize = 500;

/// Boxed future returned by direct handlers.
type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// A registered direct handler.
type DirectHandler = Arc<dyn Fn(serde_json::Value) -> HandlerFuture + Send + Sync>;

/// Runs `AGENT_PROMPT` schedules through the agent executor.
///
/// The scheduler knows nothing about prompt assembly or models; the agent
/// crate implements this trait and attaches itself at startup. Scheduled
/// turns run with an empty conversation history and no interactive output
/// channel; the returned answer flows into the execution log.
#[async_trait]
pub trait TurnRunner: Send + Sync + 'static {
    /// Runs one scheduled agent turn for `task_key` with `prompt` as input.
    async fn run_scheduled_turn(&self, task_key: &str, prompt: &str) -> Result<String, String>;
}

/// A fire that has been dispatched but has not recorded its outcome yet.
struct InFlightFire {
    schedule_id: Uuid,
    period: String,
}

/// Durable task scheduler.
///
/// One in-memory timer task is armed per active schedule (re-arming replaces
/// and cancels the previous timer). Fires run concurrently on their own
/// tasks; per-period idempotence is enforced by the store's unique success
/// index, not by timer bookkeeping.
pub struct Scheduler {
    store: Arc<ScheduleStore>,
    clock: Clock,
    handlers: RwLock<HashMap<String, DirectHandler>>,
    turn_runner: RwLock<Option<Arc<dyn TurnRunner>>>,
    timers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    in_flight: Mutex<HashMap<u64, InFlightFire>>,
    fire_counter: AtomicU64,
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    /// Creates a scheduler over a store and a clock.
    #[must_use]
    pub fn new(store: Arc<ScheduleStore>, clock: Clock) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            clock,
            handlers: RwLock::new(HashMap::new()),
            turn_runner: RwLock::new(None),
            timers: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            fire_counter: AtomicU64::new(0),
            started: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Registers (or replaces) the direct handler for a task key.
    ///
    /// Re-registration is normal: plugins re-register their handlers on
    /// every process start even when the schedule row already exists.
    pub fn register_direct_handler<F, Fut>(&self, task_key: impl Into<String>, handler: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let task_key = task_key.into();
        let boxed: DirectHandler = Arc::new(move |payload| Box::pin(handler(payload)));
        self.handlers.write().insert(task_key, boxed);
    }

    /// Attaches the agent turn runner used for `AGENT_PROMPT` schedules.
    pub fn set_turn_runner(&self, runner: Arc<dyn TurnRunner>) {
        *self.turn_runner.write() = Some(runner);
    }

    /// Creates a schedule. Rejects duplicate task keys.
    ///
    /// When the scheduler is already running, the new schedule's timer is
    /// armed immediately.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::InvalidExpression`] for unparsable expressions and
    /// [`ScheduleError::DuplicateTaskKey`] for an existing task key.
    pub fn create(self: &Arc<Self>, new: NewSchedule) -> Result<Uuid, ScheduleError> {
        ScheduleExpression::parse(&new.schedule_expression)?;
        let id = self.store.create(&new, self.clock.now())?;
        tracing::info!(task_key = %new.task_key, %id, "created schedule");

        if self.started.load(Ordering::SeqCst)
            && let Some(item) = self.store.get(id)?
        {
            self.arm(item);
        }
        Ok(id)
    }

    /// Deletes a schedule, cancelling its timer.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::NotFound`] for an unknown id.
    pub fn delete(&self, id: Uuid) -> Result<(), ScheduleError> {
        if let Some(timer) = self.timers.lock().remove(&id) {
            timer.abort();
        }
        self.store.delete(id)
    }

    /// Fetches a schedule by task key.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lookup fails.
    pub fn get_by_key(&self, task_key: &str) -> Result<Option<ScheduleItem>, ScheduleError> {
        self.store.get_by_key(task_key)
    }

    /// Lists all schedules.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn list(&self) -> Result<Vec<ScheduleItem>, ScheduleError> {
        self.store.list()
    }

    /// Returns the backing store, for diagnostics and log queries.
    #[must_use]
    pub fn store(&self) -> &Arc<ScheduleStore> {
        &self.store
    }

    /// Performs the initial load, missed-task reconciliation, then arms
    /// timers for every active schedule.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the schedule list cannot be read;
    /// individual reconciliation fires log their own failures.
    pub async fn start(self: &Arc<Self>) -> Result<(), ScheduleError> {
        self.reconcile().await?;
        for schedule in self.store.list_active()? {
            self.arm(schedule);
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Runs catch-up for every active schedule, per its execution policy.
    ///
    /// Idempotent: restarting within the same period re-runs only what the
    /// execution log does not already show as succeeded.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the schedule list cannot be read.
    pub async fn reconcile(&self) -> Result<(), ScheduleError> {
        let now = self.clock.now();
        for schedule in self.store.list_active()? {
            let expr = match ScheduleExpression::parse(&schedule.schedule_expression) {
                Ok(expr) => expr,
                Err(err) => {
                    tracing::warn!(task_key = %schedule.task_key, %err, "skipping unparsable schedule");
                    continue;
                }
            };
            let Some(missed) = expr.previous_fire(now) else {
                continue;
            };

            match schedule.execution_policy {
                ExecutionPolicy::SkipMissed => {}
                ExecutionPolicy::RunImmediatelyIfMissed => {
                    let already_ran = schedule
                        .last_invocation
                        .is_some_and(|last| last >= missed);
                    if !already_ran {
                        tracing::info!(task_key = %schedule.task_key, %missed, "running missed firing");
                        self.fire(schedule.id, missed).await;
                    }
                }
                ExecutionPolicy::RunOncePerPeriodCatchUp => {
                    let period = expr.period_identifier(missed);
                    if !self.store.has_success(schedule.id, &period)? {
                        tracing::info!(task_key = %schedule.task_key, %period, "catching up period");
                        self.fire(schedule.id, missed).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Cancels pending timers and gives in-flight fires a grace window.
    ///
    /// Fires still running after the grace window are abandoned and logged
    /// as failures.
    pub async fn shutdown(&self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        for (_, timer) in self.timers.lock().drain() {
            timer.abort();
        }

        let deadline = std::time::Instant::now() + grace;
        while !self.in_flight.lock().is_empty() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let abandoned: Vec<InFlightFire> = {
            let mut in_flight = self.in_flight.lock();
            in_flight.drain().map(|(_, fire)| fire).collect()
        };
        for fire in abandoned {
            tracing::warn!(schedule_id = %fire.schedule_id, period = %fire.period, "abandoning in-flight fire at shutdown");
            if let Err(err) = self.store.record(
                fire.schedule_id,
                &fire.period,
                ExecutionStatus::Failure,
                self.clock.now(),
                Some("abandoned at shutdown"),
            ) {
                tracing::error!(%err, "failed to log abandoned fire");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Timers and firing
    // ─────────────────────────────────────────────────────────────────────

    /// Arms (or re-arms) the timer task for a schedule.
    ///
    /// The previous timer, if any, is cancelled first so each schedule has
    /// at most one armed timer at any instant.
    fn arm(self: &Arc<Self>, schedule: ScheduleItem) {
        let expr = match ScheduleExpression::parse(&schedule.schedule_expression) {
            Ok(expr) => expr,
            Err(err) => {
                tracing::warn!(task_key = %schedule.task_key, %err, "cannot arm unparsable schedule");
                return;
            }
        };

        let scheduler = Arc::clone(self);
        let schedule_id = schedule.id;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let timer = tokio::spawn(async move {
            loop {
                let now = scheduler.clock.now();
                let Some(next) = expr.next_after(now) else {
                    break;
                };
                let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.changed() => break,
                }
                scheduler.spawn_fire(schedule_id, next, expr.period_identifier(next));
                if expr.is_one_off() {
                    break;
                }
            }
        });

        if let Some(previous) = self.timers.lock().insert(schedule_id, timer) {
            previous.abort();
        }
    }

    /// Dispatches a fire on its own task so long-running handlers never
    /// block the timer loop.
    fn spawn_fire(self: &Arc<Self>, schedule_id: Uuid, firing_time: DateTime<Utc>, period: String) {
        let key = self.fire_counter.fetch_add(1, Ordering::SeqCst);
        self.in_flight.lock().insert(
            key,
            InFlightFire {
                schedule_id,
                period,
            },
        );
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.fire(schedule_id, firing_time).await;
            scheduler.in_flight.lock().remove(&key);
        });
    }

    /// Executes one firing: dedup check, dispatch, outcome recording,
    /// one-off deactivation.
    async fn fire(&self, schedule_id: Uuid, firing_time: DateTime<Utc>) {
        let schedule = match self.store.get(schedule_id) {
            Ok(Some(schedule)) if schedule.is_active => schedule,
            Ok(_) => return,
            Err(err) => {
                tracing::error!(%schedule_id, %err, "cannot load schedule for firing");
                return;
            }
        };
        let Ok(expr) = ScheduleExpression::parse(&schedule.schedule_expression) else {
            return;
        };
        let period = expr.period_identifier(firing_time);

        // Cheap pre-check; the success insert below is the real gate.
        if schedule.execution_policy == ExecutionPolicy::RunOncePerPeriodCatchUp {
            match self.store.has_success(schedule_id, &period) {
                Ok(true) => {
                    let _ = self.store.record(
                        schedule_id,
                        &period,
                        ExecutionStatus::SkippedDuplicate,
                        self.clock.now(),
                        Some("success already recorded for this period"),
                    );
                    return;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(%schedule_id, %err, "dedup check failed");
                    return;
                }
            }
        }

        let outcome = self.dispatch(&schedule).await;
        let recorded_at = self.clock.now();
        match outcome {
            Ok(notes) => {
                let won = self
                    .store
                    .try_record_success(schedule_id, &period, recorded_at, notes.as_deref())
                    .unwrap_or_else(|err| {
                        tracing::error!(%schedule_id, %err, "cannot record success");
                        false
                    });
                if won {
                    if let Err(err) = self.store.set_last_invocation(schedule_id, firing_time) {
                        tracing::warn!(%schedule_id, %err, "cannot update last_invocation");
                    }
                    if expr.is_one_off()
                        && let Err(err) = self.store.set_active(schedule_id, false)
                    {
                        tracing::warn!(%schedule_id, %err, "cannot deactivate one-off");
                    }
                    tracing::info!(task_key = %schedule.task_key, %period, "schedule fired");
                }
            }
            Err(message) => {
                let summary = truncate(&message, ERROR_SUMMARY_LIMIT);
                tracing::warn!(task_key = %schedule.task_key, error = %summary, "schedule fire failed");
                if let Err(err) = self.store.record(
                    schedule_id,
                    &period,
                    ExecutionStatus::Failure,
                    recorded_at,
                    Some(&summary),
                ) {
                    tracing::error!(%schedule_id, %err, "cannot record failure");
                }
            }
        }
    }

    /// Routes a fire to its direct handler or the agent turn runner.
    async fn dispatch(&self, schedule: &ScheduleItem) -> Result<Option<String>, String> {
        match schedule.handler_type {
            HandlerType::DirectHandler => {
                let handler = self.handlers.read().get(&schedule.task_key).cloned();
                match handler {
                    Some(handler) => handler(schedule.payload_json()).await.map(|()| None),
                    None => Err(format!(
                        "no direct handler registered for task key '{}'",
                        schedule.task_key
                    )),
                }
            }
            HandlerType::AgentPrompt => {
                let runner = self.turn_runner.read().clone();
                match runner {
                    Some(runner) => runner
                        .run_scheduled_turn(&schedule.task_key, &schedule.payload_text())
                        .await
                        .map(|answer| Some(truncate(&answer, ERROR_SUMMARY_LIMIT))),
                    None => Err("no agent turn runner attached".to_string()),
                }
            }
        }
    }
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("handlers", &self.handlers.read().len())
            .field("timers", &self.timers.lock().len())
            .finish()
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicU32;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn scheduler_at(now: DateTime<Utc>) -> (Arc<Scheduler>, Arc<MockClock>) {
        let clock = MockClock::at(now);
        let store = Arc::new(ScheduleStore::open_in_memory().unwrap());
        let scheduler = Arc::new(Scheduler::new(store, Clock::with_provider(clock.clone())));
        (scheduler, clock)
    }

    fn counting_handler(scheduler: &Arc<Scheduler>, task_key: &str) -> Arc<AtomicU32> {
        let count = Arc::new(AtomicU32::new(0));
        let captured = count.clone();
        scheduler.register_direct_handler(task_key, move |_payload| {
            let captured = captured.clone();
            async move {
                captured.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        count
    }

    #[tokio::test]
    async fn missing_handler_logs_failure_and_keeps_schedule_active() {
        let (scheduler, _) = scheduler_at(utc(2024, 7, 1, 9, 30));
        let id = scheduler
            .create(NewSchedule {
                description: "orphan".to_string(),
                schedule_expression: "0 7 * * *".to_string(),
                payload: b"{}".to_vec(),
                task_key: "orphan.task".to_string(),
                handler_type: HandlerType::DirectHandler,
                execution_policy: ExecutionPolicy::RunOncePerPeriodCatchUp,
            })
            .unwrap();

        scheduler.reconcile().await.unwrap();

        let log = scheduler.store().recent_executions(id, 10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, ExecutionStatus::Failure);
        assert!(log[0].notes.as_deref().unwrap().contains("no direct handler"));
        assert!(scheduler.store().get(id).unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn agent_prompt_dispatches_through_turn_runner() {
        struct EchoRunner;

        #[async_trait]
        impl TurnRunner for EchoRunner {
            async fn run_scheduled_turn(
                &self,
                _task_key: &str,
                prompt: &str,
            ) -> Result<String, String> {
                Ok(format!("ran: {prompt}"))
            }
        }

        let (scheduler, _) = scheduler_at(utc(2024, 7, 1, 9, 30));
        scheduler.set_turn_runner(Arc::new(EchoRunner));
        let id = scheduler
            .create(NewSchedule {
                description: "agent task".to_string(),
                schedule_expression: "0 7 * * *".to_string(),
                payload: b"summarize my day".to_vec(),
                task_key: "agent.task".to_string(),
                handler_type: HandlerType::AgentPrompt,
                execution_policy: ExecutionPolicy::RunOncePerPeriodCatchUp,
            })
            .unwrap();

        scheduler.reconcile().await.unwrap();

        let log = scheduler.store().recent_executions(id, 10).unwrap();
        assert_eq!(log[0].status, ExecutionStatus::Success);
        assert_eq!(log[0].notes.as_deref(), Some("ran: summarize my day"));
    }

    #[tokio::test]
    async fn handler_error_is_truncated_in_log() {
        let (scheduler, _) = scheduler_at(utc(2024, 7, 1, 9, 30));
        scheduler.register_direct_handler("noisy.task", |_payload| async move {
            Err("x".repeat(2000))
        });
        let id = scheduler
            .create(NewSchedule {
                description: "noisy".to_string(),
                schedule_expression: "0 7 * * *".to_string(),
                payload: b"{}".to_vec(),
                task_key: "noisy.task".to_string(),
                handler_type: HandlerType::DirectHandler,
                execution_policy: ExecutionPolicy::RunOncePerPeriodCatchUp,
            })
            .unwrap();

        scheduler.reconcile().await.unwrap();

        let log = scheduler.store().recent_executions(id, 10).unwrap();
        let notes = log[0].notes.as_deref().unwrap();
        assert!(notes.len() <= ERROR_SUMMARY_LIMIT + '…'.len_utf8());
    }

    #[tokio::test]
    async fn skip_missed_does_nothing_at_startup() {
        let (scheduler, _) = scheduler_at(utc(2024, 7, 1, 9, 30));
        let count = counting_handler(&scheduler, "skip.task");
        scheduler
            .create(NewSchedule {
                description: "skipper".to_string(),
                schedule_expression: "0 7 * * *".to_string(),
                payload: b"{}".to_vec(),
                task_key: "skip.task".to_string(),
                handler_type: HandlerType::DirectHandler,
                execution_policy: ExecutionPolicy::SkipMissed,
            })
            .unwrap();

        scheduler.reconcile().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn run_immediately_if_missed_respects_last_invocation() {
        let (scheduler, _) = scheduler_at(utc(2024, 7, 1, 9, 30));
        let count = counting_handler(&scheduler, "imm.task");
        let id = scheduler
            .create(NewSchedule {
                description: "immediate".to_string(),
                schedule_expression: "0 7 * * *".to_string(),
                payload: b"{}".to_vec(),
                task_key: "imm.task".to_string(),
                handler_type: HandlerType::DirectHandler,
                execution_policy: ExecutionPolicy::RunImmediatelyIfMissed,
            })
            .unwrap();

        // The 07:00 firing already ran before the "crash".
        scheduler
            .store()
            .set_last_invocation(id, utc(2024, 7, 1, 7, 0))
            .unwrap();

        scheduler.reconcile().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
