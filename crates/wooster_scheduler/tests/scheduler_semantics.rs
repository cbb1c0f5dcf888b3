//! End-to-end scheduler semantics: catch-up idempotence across restarts,
//! missed one-off recovery, and duplicate task-key rejection.
//!
//! Each "process restart" builds a fresh `Scheduler` over the same on-disk
//! store, re-registers handlers (as the plugin manager would), and runs
//! reconciliation with a pinned mock clock.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;
use wooster_scheduler::{
    Clock, ExecutionPolicy, ExecutionStatus, HandlerType, MockClock, NewSchedule, ScheduleError,
    ScheduleStore, Scheduler,
};

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

/// Opens the store in `dir` and builds a scheduler pinned at `now`, with a
/// counting handler registered for `task_key`.
fn boot(
    dir: &TempDir,
    now: DateTime<Utc>,
    task_key: &str,
    invocations: &Arc<AtomicU32>,
) -> Arc<Scheduler> {
    let store = Arc::new(ScheduleStore::open(dir.path().join("scheduler.db")).unwrap());
    let clock = MockClock::at(now);
    let scheduler = Arc::new(Scheduler::new(store, Clock::with_provider(clock)));
    let counter = invocations.clone();
    scheduler.register_direct_handler(task_key, move |_payload| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    scheduler
}

fn daily_review_schedule() -> NewSchedule {
    NewSchedule {
        description: "Morning daily review".to_string(),
        schedule_expression: "0 7 * * *".to_string(),
        payload: b"{}".to_vec(),
        task_key: "system.dailyReview".to_string(),
        handler_type: HandlerType::DirectHandler,
        execution_policy: ExecutionPolicy::RunOncePerPeriodCatchUp,
    }
}

#[tokio::test]
async fn seeded_daily_task_cold_start_runs_once_per_period() {
    let dir = TempDir::new().unwrap();
    let invocations = Arc::new(AtomicU32::new(0));

    // Cold start at 09:30 with no execution log: the 07:00 firing is caught up.
    let scheduler = boot(&dir, utc(2024, 7, 1, 9, 30), "system.dailyReview", &invocations);
    let id = scheduler.create(daily_review_schedule()).unwrap();
    scheduler.reconcile().await.unwrap();

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    let log = scheduler.store().recent_executions(id, 10).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, ExecutionStatus::Success);
    assert_eq!(log[0].period_identifier, "2024-07-01");

    // Restart at 10:00 the same day: no additional invocation.
    let restarted = boot(&dir, utc(2024, 7, 1, 10, 0), "system.dailyReview", &invocations);
    restarted.reconcile().await.unwrap();

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    let success_rows = restarted
        .store()
        .recent_executions(id, 10)
        .unwrap()
        .into_iter()
        .filter(|rec| rec.status == ExecutionStatus::Success)
        .count();
    assert_eq!(success_rows, 1);

    // Next morning is a new period.
    let next_day = boot(&dir, utc(2024, 7, 2, 8, 0), "system.dailyReview", &invocations);
    next_day.reconcile().await.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn repeated_restarts_within_a_period_yield_one_success() {
    let dir = TempDir::new().unwrap();
    let invocations = Arc::new(AtomicU32::new(0));

    let first = boot(&dir, utc(2024, 7, 1, 7, 5), "system.dailyReview", &invocations);
    let id = first.create(daily_review_schedule()).unwrap();

    // Restart every 20 minutes through the morning; reconciliation must be
    // idempotent no matter how often the process bounces.
    for minutes in (5..180).step_by(20) {
        let now = utc(2024, 7, 1, 7, 0) + chrono::Duration::minutes(minutes);
        let scheduler = boot(&dir, now, "system.dailyReview", &invocations);
        scheduler.reconcile().await.unwrap();
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    let success_rows = first
        .store()
        .recent_executions(id, 50)
        .unwrap()
        .into_iter()
        .filter(|rec| {
            rec.status == ExecutionStatus::Success && rec.period_identifier == "2024-07-01"
        })
        .count();
    assert_eq!(success_rows, 1);
}

#[tokio::test]
async fn missed_one_off_runs_immediately_and_deactivates() {
    let dir = TempDir::new().unwrap();
    let invocations = Arc::new(AtomicU32::new(0));

    // The 23:59 one-off was missed while the process was down.
    let scheduler = boot(&dir, utc(2024, 7, 1, 8, 0), "oneoff.reminder", &invocations);
    let id = scheduler
        .create(NewSchedule {
            description: "Late reminder".to_string(),
            schedule_expression: "2024-06-30T23:59:00Z".to_string(),
            payload: b"{}".to_vec(),
            task_key: "oneoff.reminder".to_string(),
            handler_type: HandlerType::DirectHandler,
            execution_policy: ExecutionPolicy::RunImmediatelyIfMissed,
        })
        .unwrap();

    scheduler.reconcile().await.unwrap();

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    let item = scheduler.store().get(id).unwrap().unwrap();
    assert!(!item.is_active, "one-off must deactivate after success");
    let log = scheduler.store().recent_executions(id, 10).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, ExecutionStatus::Success);

    // A further restart finds the schedule inactive and does nothing.
    let restarted = boot(&dir, utc(2024, 7, 1, 9, 0), "oneoff.reminder", &invocations);
    restarted.reconcile().await.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn duplicate_task_key_is_rejected_and_first_schedule_unchanged() {
    let dir = TempDir::new().unwrap();
    let invocations = Arc::new(AtomicU32::new(0));
    let scheduler = boot(&dir, utc(2024, 7, 1, 8, 0), "foo", &invocations);

    scheduler
        .create(NewSchedule {
            description: "original".to_string(),
            schedule_expression: "0 7 * * *".to_string(),
            payload: b"{}".to_vec(),
            task_key: "foo".to_string(),
            handler_type: HandlerType::DirectHandler,
            execution_policy: ExecutionPolicy::SkipMissed,
        })
        .unwrap();

    let err = scheduler
        .create(NewSchedule {
            description: "imposter".to_string(),
            schedule_expression: "0 8 * * *".to_string(),
            payload: b"{}".to_vec(),
            task_key: "foo".to_string(),
            handler_type: HandlerType::AgentPrompt,
            execution_policy: ExecutionPolicy::SkipMissed,
        })
        .unwrap_err();

    assert!(matches!(err, ScheduleError::DuplicateTaskKey(key) if key == "foo"));
    let kept = scheduler.get_by_key("foo").unwrap().unwrap();
    assert_eq!(kept.description, "original");
    assert_eq!(kept.schedule_expression, "0 7 * * *");
}
