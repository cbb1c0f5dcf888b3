//! Durable cron and one-off task scheduling.
//!
//! The scheduler persists every schedule in a WAL-mode SQLite store, arms an
//! in-process timer per active schedule, and dispatches fires either to a
//! registered direct handler or into the agent executor via [`TurnRunner`].
//!
//! # Execution policies
//!
//! What happens to firings missed while the process was down is governed per
//! schedule:
//!
//! - [`ExecutionPolicy::SkipMissed`] - missed firings are ignored.
//! - [`ExecutionPolicy::RunImmediatelyIfMissed`] - the most recent missed
//!   firing runs once at startup.
//! - [`ExecutionPolicy::RunOncePerPeriodCatchUp`] - at most one successful
//!   run per period, deduplicated through the execution log; idempotent
//!   across any number of restarts within the same period.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wooster_scheduler::{
//!     Clock, ExecutionPolicy, HandlerType, NewSchedule, ScheduleStore, Scheduler,
//! };
//!
//! # async fn demo() -> Result<(), wooster_scheduler::ScheduleError> {
//! let store = Arc::new(ScheduleStore::open("scheduler.db")?);
//! let scheduler = Arc::new(Scheduler::new(store, Clock::system()));
//!
//! scheduler.register_direct_handler("system.dailyReview", |_payload| async move {
//!     // compose and deliver the daily review
//!     Ok(())
//! });
//!
//! scheduler.create(NewSchedule {
//!     description: "Morning daily review".into(),
//!     schedule_expression: "0 7 * * *".into(),
//!     payload: Vec::new(),
//!     task_key: "system.dailyReview".into(),
//!     handler_type: HandlerType::DirectHandler,
//!     execution_policy: ExecutionPolicy::RunOncePerPeriodCatchUp,
//! })?;
//!
//! scheduler.start().await?;
//! # Ok(())
//! # }
//! ```

mod clock;
mod error;
mod expression;
mod service;
mod store;
mod types;

pub use clock::{Clock, ClockProvider};
pub use error::ScheduleError;
pub use expression::{PeriodGranularity, ScheduleExpression};
pub use service::{Scheduler, TurnRunner};
pub use store::ScheduleStore;
pub use types::{
    ExecutionPolicy, ExecutionRecord, ExecutionStatus, HandlerType, NewSchedule, ScheduleItem,
};

#[cfg(any(test, feature = "test-utils"))]
pub use clock::MockClock;
