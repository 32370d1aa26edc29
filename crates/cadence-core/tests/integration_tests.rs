use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use cadence_core::bus::InMemoryEventBus;
use cadence_core::db::establish_connection;
use cadence_core::error::CoreError;
use cadence_core::events::{
    decode_task_event, topics, CorrelationId, ReminderEvent, ReminderEventType, ReminderJobPayload,
    TaskEvent, TaskEventType,
};
use cadence_core::models::*;
use cadence_core::notify::{NotificationDispatcher, NotificationRequest, NotificationSender};
use cadence_core::orchestrator::{OrchestrationOutcome, RecurringTaskOrchestrator};
use cadence_core::pipeline::{Ack, Pipeline, PipelineInbox};
use cadence_core::repository::{
    LedgerRepository, PatternRepository, ReminderRepository, Repository, SqliteRepository, TaskRepository,
};
use cadence_core::service::LocalTaskService;
use chrono::{Duration, TimeZone, Utc};
use serde_json::Value;
use tempfile::TempDir;
use uuid::Uuid;

/// Helper function to create a test database
async fn setup_test_db() -> (Arc<dyn Repository>, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");

    let pool = establish_connection(&db_path.to_string_lossy())
        .await
        .expect("Failed to establish test database connection");

    (Arc::new(SqliteRepository::new(pool)), temp_dir)
}

async fn setup_pipeline() -> (Pipeline, PipelineInbox, Arc<InMemoryEventBus>, TempDir) {
    let (repo, temp_dir) = setup_test_db().await;
    let (pipeline, inbox, bus) = Pipeline::in_process(repo, PipelineConfig::default());
    (pipeline, inbox, bus, temp_dir)
}

fn task_events(bus: &InMemoryEventBus) -> Vec<TaskEvent> {
    bus.published(topics::TASK_EVENTS)
        .into_iter()
        .map(|m| decode_task_event(m.payload).expect("published task events decode"))
        .collect()
}

fn reminder_events(bus: &InMemoryEventBus) -> Vec<ReminderEvent> {
    bus.published(topics::REMINDERS)
        .into_iter()
        .map(|m| serde_json::from_value(m.payload).expect("published reminder events decode"))
        .collect()
}

fn last_completed_payload(bus: &InMemoryEventBus) -> Value {
    bus.published(topics::TASK_EVENTS)
        .into_iter()
        .rev()
        .find(|m| m.payload["event_type"] == "completed")
        .expect("a completed event was published")
        .payload
}

async fn children_of(repo: &Arc<dyn Repository>, parent: Uuid) -> Vec<Task> {
    repo.find_tasks(None)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.parent_task_id == Some(parent))
        .collect()
}

fn task_event_payload(bus: &InMemoryEventBus, event_type: &str, nth: usize) -> Value {
    bus.published(topics::TASK_EVENTS)
        .into_iter()
        .filter(|m| m.payload["event_type"] == event_type)
        .nth(nth)
        .expect("task event was published")
        .payload
}

async fn pending_reminders(repo: &Arc<dyn Repository>, task_id: Uuid) -> Vec<Reminder> {
    repo.find_reminders_for_task(task_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.delivery_status == DeliveryStatus::Pending)
        .collect()
}

fn job_payload(reminder: &Reminder) -> Value {
    serde_json::to_value(ReminderJobPayload {
        reminder_id: reminder.id,
        task_id: reminder.task_id,
        user_id: reminder.user_id.clone(),
        correlation_id: CorrelationId::new(),
    })
    .unwrap()
}

// ============================================================================
// Recurring task regeneration
// ============================================================================

#[tokio::test]
async fn test_completing_recurring_task_generates_next_instance() {
    let (pipeline, mut inbox, bus, _temp_dir) = setup_pipeline().await;
    let (root, _) = pipeline
        .tasks()
        .add_task(NewTaskData {
            title: "Gym".to_string(),
            description: Some("Leg day".to_string()),
            priority: Some(TaskPriority::High),
            due_at: Some(Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()),
            recurrence: Some(NewPatternData {
                pattern_type: PatternType::Weekly,
                days_of_week: vec![0, 2, 4],
                ..Default::default()
            }),
            ..Default::default()
        })
        .await
        .unwrap();

    pipeline.tasks().complete_task(root.id).await.unwrap();
    pipeline.drain(&mut inbox).await;

    let repo = pipeline.repository();
    let children = children_of(repo, root.id).await;
    assert_eq!(children.len(), 1);
    let child = &children[0];
    assert_eq!(child.due_at, Some(Utc.with_ymd_and_hms(2025, 1, 3, 9, 0, 0).unwrap()));
    assert_eq!(child.description.as_deref(), Some("Leg day"));
    assert_eq!(child.priority, TaskPriority::High);
    assert_eq!(child.status, TaskStatus::Todo);

    // The child's created event continues the completion's causal chain.
    let events = task_events(&bus);
    let completed = events.iter().find(|e| e.event_type == TaskEventType::Completed).unwrap();
    let child_created = events
        .iter()
        .find(|e| e.event_type == TaskEventType::Created && e.task_id == child.id)
        .unwrap();
    assert_eq!(child_created.correlation_id, completed.correlation_id);

    let pattern = repo.find_pattern_for_task(child.id).await.unwrap().unwrap();
    assert_eq!(pattern.task_id, root.id);
    assert_eq!(pattern.current_occurrence, 2);
}

#[tokio::test]
async fn test_redelivered_completion_creates_exactly_one_child() {
    let (pipeline, mut inbox, bus, _temp_dir) = setup_pipeline().await;
    let (root, _) = pipeline
        .tasks()
        .add_task(NewTaskData {
            title: "Water plants".to_string(),
            due_at: Some(Utc::now() + Duration::days(1)),
            recurrence: Some(NewPatternData::default()),
            ..Default::default()
        })
        .await
        .unwrap();
    pipeline.tasks().complete_task(root.id).await.unwrap();
    pipeline.drain(&mut inbox).await;

    let completed = last_completed_payload(&bus);
    let original = bus
        .published(topics::TASK_EVENTS)
        .into_iter()
        .find(|m| m.payload == completed)
        .unwrap();
    bus.redeliver(original);
    pipeline.drain(&mut inbox).await;

    // Bypass the ledger as well: the orchestrator's own guard must hold.
    let event = decode_task_event(completed).unwrap();
    let repo = pipeline.repository();
    let creator = Arc::new(LocalTaskService::new(
        repo.clone(),
        Arc::new(InMemoryEventBus::default()),
        StdDuration::from_secs(5),
    ));
    let orchestrator = RecurringTaskOrchestrator::new(repo.clone(), creator, StdDuration::from_secs(5));
    let outcome = orchestrator.handle_task_completed(&event).await.unwrap();
    assert!(matches!(outcome, OrchestrationOutcome::AlreadyGenerated(_)));

    assert_eq!(children_of(repo, root.id).await.len(), 1);
    let pattern = repo.find_pattern_for_task(root.id).await.unwrap().unwrap();
    assert_eq!(pattern.current_occurrence, 2);
}

#[tokio::test]
async fn test_concurrent_duplicate_completions_create_one_child() {
    let (pipeline, mut inbox, bus, _temp_dir) = setup_pipeline().await;
    let (root, _) = pipeline
        .tasks()
        .add_task(NewTaskData {
            title: "Standup".to_string(),
            due_at: Some(Utc::now() + Duration::days(1)),
            recurrence: Some(NewPatternData::default()),
            ..Default::default()
        })
        .await
        .unwrap();
    pipeline.tasks().complete_task(root.id).await.unwrap();
    let completed = last_completed_payload(&bus);

    let pipeline = Arc::new(pipeline);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            let payload = completed.clone();
            tokio::spawn(async move { pipeline.handle_task_event(payload).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }
    pipeline.drain(&mut inbox).await;

    assert_eq!(children_of(pipeline.repository(), root.id).await.len(), 1);
}

#[tokio::test]
async fn test_series_continues_through_lineage_until_occurrences_run_out() {
    let (pipeline, mut inbox, _bus, _temp_dir) = setup_pipeline().await;
    let start = Utc.with_ymd_and_hms(2025, 1, 31, 8, 0, 0).unwrap();
    let (root, _) = pipeline
        .tasks()
        .add_task(NewTaskData {
            title: "Pay invoice".to_string(),
            due_at: Some(start),
            recurrence: Some(NewPatternData {
                pattern_type: PatternType::Monthly,
                day_of_month: Some(31),
                end_condition: EndCondition::AfterOccurrences,
                occurrence_count: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        })
        .await
        .unwrap();

    let repo = pipeline.repository().clone();
    let mut current = root.id;
    let mut due_dates = vec![start];
    loop {
        pipeline.tasks().complete_task(current).await.unwrap();
        pipeline.drain(&mut inbox).await;
        match repo.find_child_of(current).await.unwrap() {
            Some(child) => {
                due_dates.push(child.due_at.unwrap());
                current = child.id;
            }
            None => break,
        }
    }

    assert_eq!(
        due_dates,
        vec![
            start,
            Utc.with_ymd_and_hms(2025, 2, 28, 8, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 31, 8, 0, 0).unwrap(),
        ]
    );
    let pattern = repo.find_pattern_for_task(current).await.unwrap().unwrap();
    assert_eq!(pattern.current_occurrence, 3);
}

#[tokio::test]
async fn test_by_date_series_stops_at_end_date() {
    let (pipeline, mut inbox, _bus, _temp_dir) = setup_pipeline().await;
    let start = Utc::now() + Duration::days(1);
    let (root, _) = pipeline
        .tasks()
        .add_task(NewTaskData {
            title: "Sprint review".to_string(),
            due_at: Some(start),
            recurrence: Some(NewPatternData {
                pattern_type: PatternType::Weekly,
                interval: 2,
                end_condition: EndCondition::ByDate,
                end_date: Some(start + Duration::days(20)),
                ..Default::default()
            }),
            ..Default::default()
        })
        .await
        .unwrap();

    pipeline.tasks().complete_task(root.id).await.unwrap();
    pipeline.drain(&mut inbox).await;
    let repo = pipeline.repository();
    let second = repo.find_child_of(root.id).await.unwrap().unwrap();
    assert_eq!(second.due_at, Some(start + Duration::weeks(2)));

    pipeline.tasks().complete_task(second.id).await.unwrap();
    pipeline.drain(&mut inbox).await;
    assert!(repo.find_child_of(second.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_deleting_earlier_instances_keeps_the_series() {
    let (pipeline, mut inbox, _bus, _temp_dir) = setup_pipeline().await;
    let (root, pattern) = pipeline
        .tasks()
        .add_task(NewTaskData {
            title: "Stretch".to_string(),
            due_at: Some(Utc::now() + Duration::days(1)),
            recurrence: Some(NewPatternData::default()),
            ..Default::default()
        })
        .await
        .unwrap();
    let pattern = pattern.unwrap();
    let repo = pipeline.repository().clone();

    pipeline.tasks().complete_task(root.id).await.unwrap();
    pipeline.drain(&mut inbox).await;
    let first = repo.find_child_of(root.id).await.unwrap().unwrap();
    pipeline.tasks().complete_task(first.id).await.unwrap();
    pipeline.drain(&mut inbox).await;
    let second = repo.find_child_of(first.id).await.unwrap().unwrap();

    // Remove the middle instance, then complete the one after it.
    pipeline.tasks().delete_task(first.id).await.unwrap();
    pipeline.drain(&mut inbox).await;
    let orphan = repo.find_task_by_id(second.id).await.unwrap().unwrap();
    assert_eq!(orphan.parent_task_id, None);
    assert_eq!(orphan.recurrence_pattern_id, Some(pattern.id));

    pipeline.tasks().complete_task(second.id).await.unwrap();
    pipeline.drain(&mut inbox).await;
    let third = repo.find_child_of(second.id).await.unwrap().expect("series continues");
    assert_eq!(third.due_at, Some(second.due_at.unwrap() + Duration::days(1)));

    // Removing the root must not take the pattern with it.
    pipeline.tasks().delete_task(root.id).await.unwrap();
    pipeline.drain(&mut inbox).await;
    assert!(repo.find_pattern_by_id(pattern.id).await.unwrap().is_some());

    pipeline.tasks().complete_task(third.id).await.unwrap();
    pipeline.drain(&mut inbox).await;
    let fourth = repo.find_child_of(third.id).await.unwrap().expect("series survives its root");
    let current = repo.find_pattern_for_task(fourth.id).await.unwrap().unwrap();
    assert_eq!(current.id, pattern.id);
    assert_eq!(current.current_occurrence, 5);

    // The pattern goes with the last task of the series.
    for id in [second.id, third.id, fourth.id] {
        pipeline.tasks().delete_task(id).await.unwrap();
    }
    assert!(repo.find_pattern_by_id(pattern.id).await.unwrap().is_none());
}

// ============================================================================
// Reminders
// ============================================================================

#[tokio::test]
async fn test_due_date_change_reschedules_reminders() {
    let (pipeline, mut inbox, _bus, _temp_dir) = setup_pipeline().await;
    let d1 = Utc::now() + Duration::days(1);
    let (task, _) = pipeline
        .tasks()
        .add_task(NewTaskData {
            title: "Submit report".to_string(),
            due_at: Some(d1),
            ..Default::default()
        })
        .await
        .unwrap();
    pipeline.drain(&mut inbox).await;

    let repo = pipeline.repository();
    let original = repo.find_reminders_for_task(task.id).await.unwrap();
    assert_eq!(original.len(), 2);
    assert!(original.iter().all(|r| r.delivery_status == DeliveryStatus::Pending));

    let d2 = d1 + Duration::days(2);
    pipeline.tasks().change_due_date(task.id, Some(d2)).await.unwrap();
    pipeline.drain(&mut inbox).await;

    let all = repo.find_reminders_for_task(task.id).await.unwrap();
    assert_eq!(all.len(), 4);
    for reminder in &all {
        if original.iter().any(|o| o.id == reminder.id) {
            assert_eq!(reminder.delivery_status, DeliveryStatus::Cancelled);
        } else {
            assert_eq!(reminder.delivery_status, DeliveryStatus::Pending);
            assert!(reminder.remind_at > d1);
            assert!(reminder.remind_at < d2);
        }
    }
}

#[tokio::test]
async fn test_past_offset_is_skipped_and_rest_scheduled() {
    let (pipeline, mut inbox, _bus, _temp_dir) = setup_pipeline().await;
    let due = Utc::now() + Duration::minutes(40);
    let (task, _) = pipeline
        .tasks()
        .add_task(NewTaskData {
            title: "Call the bank".to_string(),
            due_at: Some(due),
            ..Default::default()
        })
        .await
        .unwrap();
    pipeline.drain(&mut inbox).await;

    let reminders = pipeline.repository().find_reminders_for_task(task.id).await.unwrap();
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].remind_at, due - Duration::minutes(15));
}

#[tokio::test]
async fn test_completing_or_deleting_cancels_reminders() {
    let (pipeline, mut inbox, _bus, _temp_dir) = setup_pipeline().await;
    let mut ids = Vec::new();
    for title in ["Complete me", "Delete me"] {
        let (task, _) = pipeline
            .tasks()
            .add_task(NewTaskData {
                title: title.to_string(),
                due_at: Some(Utc::now() + Duration::days(2)),
                ..Default::default()
            })
            .await
            .unwrap();
        ids.push(task.id);
    }
    pipeline.drain(&mut inbox).await;

    pipeline.tasks().complete_task(ids[0]).await.unwrap();
    pipeline.tasks().delete_task(ids[1]).await.unwrap();
    pipeline.drain(&mut inbox).await;

    let repo = pipeline.repository();
    for id in ids {
        let reminders = repo.find_reminders_for_task(id).await.unwrap();
        assert_eq!(reminders.len(), 2);
        assert!(reminders.iter().all(|r| r.delivery_status == DeliveryStatus::Cancelled));
    }
    assert!(repo.find_pending_reminders().await.unwrap().is_empty());
    assert_eq!(pipeline.reminders().cancel_reminders(Uuid::now_v7()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_fired_reminder_is_delivered_once() {
    let (pipeline, mut inbox, bus, _temp_dir) = setup_pipeline().await;
    let (task, _) = pipeline
        .tasks()
        .add_task(NewTaskData {
            title: "Renew passport".to_string(),
            due_at: Some(Utc::now() + Duration::days(3)),
            ..Default::default()
        })
        .await
        .unwrap();
    pipeline.drain(&mut inbox).await;

    let repo = pipeline.repository();
    let reminder = repo.find_reminders_for_task(task.id).await.unwrap().remove(0);
    let payload = job_payload(&reminder);
    let correlation_id = payload["correlation_id"].clone();

    assert_eq!(pipeline.handle_reminder_due(payload.clone()).await, Ack::Processed);
    // The scheduler may fire the same job again.
    assert!(matches!(pipeline.handle_reminder_due(payload).await, Ack::Skipped(_)));

    let stored = repo.find_reminder_by_id(reminder.id).await.unwrap().unwrap();
    assert_eq!(stored.delivery_status, DeliveryStatus::Sent);
    assert_eq!(stored.retry_count, 0);

    let events = reminder_events(&bus);
    let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(kinds, vec![ReminderEventType::ReminderDue, ReminderEventType::ReminderSent]);
    assert!(events
        .iter()
        .all(|e| serde_json::to_value(e.correlation_id).unwrap() == correlation_id));

    let notifications: Vec<_> = bus
        .published(topics::TASK_UPDATES)
        .into_iter()
        .filter(|m| m.payload["event_type"] == "notification")
        .collect();
    assert_eq!(notifications.len(), 1);
}

#[tokio::test]
async fn test_cancelled_reminder_is_not_delivered() {
    let (pipeline, mut inbox, bus, _temp_dir) = setup_pipeline().await;
    let (task, _) = pipeline
        .tasks()
        .add_task(NewTaskData {
            title: "Book flights".to_string(),
            due_at: Some(Utc::now() + Duration::days(3)),
            ..Default::default()
        })
        .await
        .unwrap();
    pipeline.drain(&mut inbox).await;

    let repo = pipeline.repository();
    let reminder = repo.find_reminders_for_task(task.id).await.unwrap().remove(0);
    pipeline.reminders().cancel_reminders(task.id).await.unwrap();

    assert!(matches!(
        pipeline.handle_reminder_due(job_payload(&reminder)).await,
        Ack::Skipped(_)
    ));
    assert!(reminder_events(&bus).is_empty());
}

struct AlwaysFailing {
    calls: AtomicU32,
}

#[async_trait]
impl NotificationSender for AlwaysFailing {
    async fn send(&self, _request: &NotificationRequest) -> Result<(), CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CoreError::Channel("gateway unavailable".to_string()))
    }
}

#[tokio::test]
async fn test_exhausted_delivery_marks_reminder_failed() {
    let (repo, _temp_dir) = setup_test_db().await;
    let sender = Arc::new(AlwaysFailing {
        calls: AtomicU32::new(0),
    });
    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay: StdDuration::from_millis(1),
    };
    let dispatcher = NotificationDispatcher::new(retry, StdDuration::from_secs(10))
        .with_sender(NotificationChannel::InApp, sender.clone());
    let (pipeline, _inbox, bus) = Pipeline::in_process(repo.clone(), PipelineConfig::default());
    let pipeline = pipeline.with_dispatcher(dispatcher);

    let (task, _) = repo
        .add_task(NewTaskData {
            title: "Vote".to_string(),
            due_at: Some(Utc::now() + Duration::days(1)),
            ..Default::default()
        })
        .await
        .unwrap();
    let reminder = Reminder::pending(task.id, task.user_id.clone(), Utc::now(), NotificationChannel::InApp);
    repo.insert_reminder(&reminder).await.unwrap();

    let ack = pipeline.handle_reminder_due(job_payload(&reminder)).await;
    assert!(matches!(ack, Ack::Failed(ref msg) if msg.contains("gateway unavailable")));
    assert_eq!(sender.calls.load(Ordering::SeqCst), 3);

    let stored = repo.find_reminder_by_id(reminder.id).await.unwrap().unwrap();
    assert_eq!(stored.delivery_status, DeliveryStatus::Failed);
    assert_eq!(stored.retry_count, 2);
    assert!(stored.error_message.unwrap().contains("gateway unavailable"));

    let kinds: Vec<_> = reminder_events(&bus).iter().map(|e| e.event_type).collect();
    assert_eq!(kinds, vec![ReminderEventType::ReminderDue, ReminderEventType::ReminderFailed]);
}

#[tokio::test]
async fn test_email_reminder_goes_to_outbox() {
    let (pipeline, _inbox, _bus, _temp_dir) = setup_pipeline().await;
    let repo = pipeline.repository();
    let (task, _) = repo
        .add_task(NewTaskData {
            user_id: "bob".to_string(),
            title: "Dentist".to_string(),
            due_at: Some(Utc::now() + Duration::days(1)),
            ..Default::default()
        })
        .await
        .unwrap();
    let reminder = pipeline
        .reminders()
        .schedule_reminder(
            task.id,
            "bob",
            Utc::now() + Duration::hours(2),
            NotificationChannel::Email,
            CorrelationId::new(),
        )
        .await
        .unwrap();

    assert_eq!(pipeline.handle_reminder_due(job_payload(&reminder)).await, Ack::Processed);

    let outbox = repo.find_outbox_entries(task.id).await.unwrap();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].user_id, "bob");
    assert_eq!(outbox[0].channel, NotificationChannel::Email);
}

#[tokio::test]
async fn test_rearm_fires_overdue_reminders() {
    let (pipeline, mut inbox, _bus, _temp_dir) = setup_pipeline().await;
    let repo = pipeline.repository();
    let (task, _) = repo
        .add_task(NewTaskData {
            title: "Take medicine".to_string(),
            due_at: Some(Utc::now() + Duration::minutes(5)),
            ..Default::default()
        })
        .await
        .unwrap();
    let overdue = Reminder::pending(
        task.id,
        task.user_id.clone(),
        Utc::now() - Duration::minutes(1),
        NotificationChannel::InApp,
    );
    repo.insert_reminder(&overdue).await.unwrap();

    assert_eq!(pipeline.rearm_pending_reminders().await.unwrap(), 1);
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    pipeline.drain(&mut inbox).await;

    let stored = repo.find_reminder_by_id(overdue.id).await.unwrap().unwrap();
    assert_eq!(stored.delivery_status, DeliveryStatus::Sent);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_created_events_schedule_each_reminder_once() {
    let (pipeline, _inbox, bus, _temp_dir) = setup_pipeline().await;
    let (task, _) = pipeline
        .tasks()
        .add_task(NewTaskData {
            title: "File taxes".to_string(),
            due_at: Some(Utc::now() + Duration::days(2)),
            ..Default::default()
        })
        .await
        .unwrap();
    let created = task_event_payload(&bus, "created", 0);

    let pipeline = Arc::new(pipeline);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            let payload = created.clone();
            tokio::spawn(async move { pipeline.handle_task_event(payload).await })
        })
        .collect();
    for handle in handles {
        let ack = handle.await.unwrap();
        assert!(matches!(ack, Ack::Processed | Ack::Skipped(_)), "unexpected ack {:?}", ack);
    }

    let reminders = pipeline.repository().find_reminders_for_task(task.id).await.unwrap();
    assert_eq!(reminders.len(), 2);
    assert!(reminders.iter().all(|r| r.delivery_status == DeliveryStatus::Pending));
}

#[tokio::test]
async fn test_completed_event_arriving_before_created_leaves_no_reminders() {
    let (pipeline, _inbox, bus, _temp_dir) = setup_pipeline().await;
    let (task, _) = pipeline
        .tasks()
        .add_task(NewTaskData {
            title: "Return library books".to_string(),
            due_at: Some(Utc::now() + Duration::days(2)),
            ..Default::default()
        })
        .await
        .unwrap();
    pipeline.tasks().complete_task(task.id).await.unwrap();

    let completed = task_event_payload(&bus, "completed", 0);
    let created = task_event_payload(&bus, "created", 0);
    assert_eq!(pipeline.handle_task_event(completed).await, Ack::Processed);
    assert_eq!(pipeline.handle_task_event(created).await, Ack::Processed);

    assert!(pipeline.repository().find_reminders_for_task(task.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_due_date_updates_delivered_in_reverse_follow_the_stored_due_date() {
    let (pipeline, _inbox, bus, _temp_dir) = setup_pipeline().await;
    let d1 = Utc::now() + Duration::days(1);
    let (task, _) = pipeline
        .tasks()
        .add_task(NewTaskData {
            title: "Renew lease".to_string(),
            due_at: Some(d1),
            ..Default::default()
        })
        .await
        .unwrap();
    pipeline.tasks().change_due_date(task.id, Some(d1 + Duration::days(1))).await.unwrap();
    let latest = pipeline
        .tasks()
        .change_due_date(task.id, Some(d1 + Duration::days(2)))
        .await
        .unwrap();
    let d3 = latest.due_at.unwrap();

    for payload in [
        task_event_payload(&bus, "created", 0),
        task_event_payload(&bus, "updated", 1),
        task_event_payload(&bus, "updated", 0),
    ] {
        assert_eq!(pipeline.handle_task_event(payload).await, Ack::Processed);
    }

    let pending = pending_reminders(pipeline.repository(), task.id).await;
    let mut remind_at: Vec<_> = pending.iter().map(|r| r.remind_at).collect();
    remind_at.sort();
    assert_eq!(remind_at, vec![d3 - Duration::minutes(60), d3 - Duration::minutes(15)]);
}

#[tokio::test]
async fn test_reminder_of_completed_task_is_cancelled_not_sent() {
    let (pipeline, mut inbox, bus, _temp_dir) = setup_pipeline().await;
    let (task, _) = pipeline
        .tasks()
        .add_task(NewTaskData {
            title: "Buy a gift".to_string(),
            due_at: Some(Utc::now() + Duration::days(2)),
            ..Default::default()
        })
        .await
        .unwrap();
    pipeline.drain(&mut inbox).await;

    // Completed in the store, but its event has not been handled yet.
    let repo = pipeline.repository();
    repo.complete_task(task.id).await.unwrap();
    let reminder = repo.find_reminders_for_task(task.id).await.unwrap().remove(0);

    let ack = pipeline.handle_reminder_due(job_payload(&reminder)).await;
    assert!(matches!(ack, Ack::Skipped(_)));

    let stored = repo.find_reminder_by_id(reminder.id).await.unwrap().unwrap();
    assert_eq!(stored.delivery_status, DeliveryStatus::Cancelled);
    assert!(reminder_events(&bus).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_job_fired_twice_concurrently_sends_one_notification() {
    let (pipeline, _inbox, _bus, _temp_dir) = setup_pipeline().await;
    let (task, _) = pipeline
        .repository()
        .add_task(NewTaskData {
            user_id: "carol".to_string(),
            title: "Team lunch".to_string(),
            due_at: Some(Utc::now() + Duration::days(1)),
            ..Default::default()
        })
        .await
        .unwrap();
    let reminder = pipeline
        .reminders()
        .schedule_reminder(
            task.id,
            "carol",
            Utc::now() + Duration::hours(1),
            NotificationChannel::Email,
            CorrelationId::new(),
        )
        .await
        .unwrap();
    let payload = job_payload(&reminder);

    let pipeline = Arc::new(pipeline);
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            let payload = payload.clone();
            tokio::spawn(async move { pipeline.handle_reminder_due(payload).await })
        })
        .collect();
    let mut acks = Vec::new();
    for handle in handles {
        acks.push(handle.await.unwrap());
    }

    assert_eq!(acks.iter().filter(|a| **a == Ack::Processed).count(), 1);
    assert_eq!(acks.iter().filter(|a| matches!(a, Ack::Skipped(_))).count(), 1);

    let repo = pipeline.repository();
    assert_eq!(repo.find_outbox_entries(task.id).await.unwrap().len(), 1);
    let stored = repo.find_reminder_by_id(reminder.id).await.unwrap().unwrap();
    assert_eq!(stored.delivery_status, DeliveryStatus::Sent);
}

#[tokio::test]
async fn test_stale_delivery_claim_can_be_taken_over() {
    let (repo, _temp_dir) = setup_test_db().await;
    let (task, _) = repo
        .add_task(NewTaskData {
            title: "Water the garden".to_string(),
            due_at: Some(Utc::now() + Duration::days(1)),
            ..Default::default()
        })
        .await
        .unwrap();
    let reminder = Reminder::pending(
        task.id,
        task.user_id.clone(),
        Utc::now() + Duration::hours(1),
        NotificationChannel::InApp,
    );
    repo.insert_reminder(&reminder).await.unwrap();

    let lease = Duration::minutes(5);
    assert!(repo.claim_reminder(reminder.id, Utc::now() - lease).await.unwrap());
    assert!(!repo.claim_reminder(reminder.id, Utc::now() - lease).await.unwrap());

    // A worker that died mid-delivery leaves a claim that eventually goes stale.
    assert!(repo.claim_reminder(reminder.id, Utc::now() + lease).await.unwrap());

    let cancelled = DeliveryRecord {
        status: DeliveryStatus::Cancelled,
        retry_count: 0,
        error_message: None,
    };
    assert!(repo.record_delivery(reminder.id, cancelled).await.unwrap());
    assert!(!repo.claim_reminder(reminder.id, Utc::now() + lease).await.unwrap());
}

#[tokio::test]
async fn test_pending_slot_is_unique_per_task_time_and_channel() {
    let (repo, _temp_dir) = setup_test_db().await;
    let (task, _) = repo
        .add_task(NewTaskData {
            title: "Check the mail".to_string(),
            due_at: Some(Utc::now() + Duration::days(1)),
            ..Default::default()
        })
        .await
        .unwrap();
    let at = Utc::now() + Duration::hours(1);
    let first = Reminder::pending(task.id, task.user_id.clone(), at, NotificationChannel::InApp);
    repo.insert_reminder(&first).await.unwrap();

    let duplicate = Reminder::pending(task.id, task.user_id.clone(), at, NotificationChannel::InApp);
    assert!(matches!(repo.insert_reminder(&duplicate).await, Err(CoreError::Conflict(_))));
    let found = repo
        .find_pending_reminder(task.id, at, NotificationChannel::InApp)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, first.id);

    // Once the slot is no longer pending it can be taken again.
    assert_eq!(repo.cancel_pending_reminders(task.id).await.unwrap().len(), 1);
    repo.insert_reminder(&duplicate).await.unwrap();
}

// ============================================================================
// Ledger and transport
// ============================================================================

#[tokio::test]
async fn test_ledger_records_processed_events() {
    let (pipeline, mut inbox, bus, _temp_dir) = setup_pipeline().await;
    pipeline
        .tasks()
        .add_task(NewTaskData {
            title: "Read".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    pipeline.drain(&mut inbox).await;

    let event = task_events(&bus).remove(0);
    let entry = pipeline
        .repository()
        .find_event_outcome(&event.idempotency_key())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.outcome, LedgerOutcome::Processed);
    assert_eq!(entry.event_type, "created");
    assert_eq!(entry.correlation_id, event.correlation_id.to_string());
}

#[tokio::test]
async fn test_cloud_event_wrapped_delivery_is_unwrapped() {
    let (pipeline, mut inbox, _bus, _temp_dir) = setup_pipeline().await;
    let (root, _) = pipeline
        .tasks()
        .add_task(NewTaskData {
            title: "Laundry".to_string(),
            due_at: Some(Utc::now() + Duration::days(1)),
            recurrence: Some(NewPatternData::default()),
            ..Default::default()
        })
        .await
        .unwrap();
    pipeline.drain(&mut inbox).await;

    // Complete directly in the store and deliver the event wrapped as a transport would.
    let repo = pipeline.repository();
    let completed = repo.complete_task(root.id).await.unwrap();
    let snapshot = repo.capture_snapshot(&completed).await.unwrap();
    let event = TaskEvent::new(TaskEventType::Completed, snapshot, CorrelationId::new());
    let wrapped = serde_json::json!({
        "specversion": "1.0",
        "type": "com.dapr.event.sent",
        "data": serde_json::to_string(&event).unwrap(),
    });

    assert_eq!(pipeline.handle_task_event(wrapped).await, Ack::Processed);
    assert_eq!(children_of(repo, root.id).await.len(), 1);
}
