//! # Cadence Core Library
//!
//! The event-driven half of a todo application: recurring tasks regenerate
//! their next instance when completed, due dates turn into reminders, and
//! reminders become notifications with bounded retries.
//!
//! ## Features
//!
//! - **Recurrence Engine**: daily, weekly (by weekday) and monthly patterns with
//!   `never`, `after_occurrences` and `by_date` end conditions
//! - **Idempotent Regeneration**: at most one next instance per completed task,
//!   however often the completion event is delivered
//! - **Reminders**: one scheduled job per reminder, cancelled and re-created
//!   whenever the due date moves
//! - **Notification Dispatch**: pluggable per-channel senders with exponential backoff
//! - **Correlation**: one correlation id follows a causal chain across every event
//!
//! ## Core Modules
//!
//! - [`db`]: Database connection and migration management
//! - [`models`]: Core data structures and transfer objects
//! - [`repository`]: The task store, behind the Repository pattern
//! - [`recurrence`]: Next-due-date arithmetic
//! - [`events`]: Event envelopes, correlation ids and inbound decoding
//! - [`bus`] and [`jobs`]: Event bus and job scheduler seams with in-process implementations
//! - [`service`], [`orchestrator`], [`reminders`], [`notify`]: The pipeline components
//! - [`pipeline`]: Wiring and inbound message routing
//! - [`error`]: Error types and the outbound-call timeout helper
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cadence_core::{
//!     db, models::{NewPatternData, NewTaskData, PatternType, PipelineConfig},
//!     pipeline::Pipeline, repository::{Repository, SqliteRepository},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cadence_core::error::CoreError> {
//!     let pool = db::establish_connection("cadence.db").await?;
//!     let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::new(pool));
//!     let (pipeline, mut inbox, _bus) = Pipeline::in_process(repo, PipelineConfig::default());
//!
//!     let (task, _pattern) = pipeline
//!         .tasks()
//!         .add_task(NewTaskData {
//!             title: "Water the plants".to_string(),
//!             due_at: Some(chrono::Utc::now() + chrono::Duration::days(1)),
//!             recurrence: Some(NewPatternData {
//!                 pattern_type: PatternType::Weekly,
//!                 days_of_week: vec![0, 3],
//!                 ..Default::default()
//!             }),
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     pipeline.tasks().complete_task(task.id).await?;
//!     pipeline.drain(&mut inbox).await;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod db;
pub mod error;
pub mod events;
pub mod jobs;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod recurrence;
pub mod reminders;
pub mod repository;
pub mod service;
