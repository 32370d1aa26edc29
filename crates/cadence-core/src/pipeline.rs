//! Wires the components together and routes inbound messages to them.
//!
//! Inbound handlers acknowledge every message. Failures are written to the
//! processed-events ledger and surfaced as `*_failed` events instead of being
//! returned to the transport, which would only redeliver them.

use std::future::Future;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::bus::{publish_event, BusMessage, EventBus, InMemoryEventBus};
use crate::error::{with_timeout, CoreError};
use crate::events::{
    decode_job_payload, decode_task_event, topics, CorrelationId, ReminderEvent, ReminderEventType,
    ReminderJobPayload, TaskEvent, TaskEventType,
};
use crate::jobs::{FiredJob, JobScheduler, TokioJobScheduler, REMINDER_CALLBACK_URL};
use crate::models::{DeliveryRecord, DeliveryStatus, LedgerOutcome, PipelineConfig, Reminder, Task, TaskStatus};
use crate::notify::{NotificationDispatcher, NotificationRequest};
use crate::orchestrator::{OrchestrationOutcome, RecurringTaskOrchestrator};
use crate::reminders::ReminderScheduler;
use crate::repository::{LedgerRepository, ReminderRepository, Repository, TaskRepository};
use crate::service::LocalTaskService;

/// How an inbound message was acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Processed,
    /// Nothing to do: a duplicate delivery or a reminder that is no longer pending
    Skipped(String),
    /// Handling failed; the failure was recorded
    Failed(String),
    /// The payload could not be decoded
    Malformed(String),
}

/// The receiving ends the pipeline consumes: bus messages and fired jobs.
pub struct PipelineInbox {
    messages: broadcast::Receiver<BusMessage>,
    fired: mpsc::UnboundedReceiver<FiredJob>,
}

impl PipelineInbox {
    pub fn new(messages: broadcast::Receiver<BusMessage>, fired: mpsc::UnboundedReceiver<FiredJob>) -> Self {
        Self { messages, fired }
    }
}

pub struct Pipeline {
    repo: Arc<dyn Repository>,
    bus: Arc<dyn EventBus>,
    tasks: Arc<LocalTaskService>,
    orchestrator: RecurringTaskOrchestrator,
    reminders: ReminderScheduler,
    dispatcher: NotificationDispatcher,
    config: PipelineConfig,
}

impl Pipeline {
    /// Builds every component once from explicitly passed clients.
    pub fn new(
        repo: Arc<dyn Repository>,
        bus: Arc<dyn EventBus>,
        jobs: Arc<dyn JobScheduler>,
        config: PipelineConfig,
    ) -> Self {
        let tasks = Arc::new(LocalTaskService::new(repo.clone(), bus.clone(), config.call_timeout));
        let orchestrator = RecurringTaskOrchestrator::new(repo.clone(), tasks.clone(), config.call_timeout);
        let reminders = ReminderScheduler::new(repo.clone(), jobs, config.call_timeout, config.default_channel);
        let dispatcher = NotificationDispatcher::with_default_senders(
            repo.clone(),
            bus.clone(),
            config.retry.clone(),
            config.call_timeout,
        );

        Self {
            repo,
            bus,
            tasks,
            orchestrator,
            reminders,
            dispatcher,
            config,
        }
    }

    /// A pipeline over the in-process bus and tokio job scheduler, plus the inbox feeding it.
    pub fn in_process(repo: Arc<dyn Repository>, config: PipelineConfig) -> (Self, PipelineInbox, Arc<InMemoryEventBus>) {
        let bus = Arc::new(InMemoryEventBus::default());
        let messages = bus.subscribe();
        let (jobs, fired) = TokioJobScheduler::new();
        let pipeline = Self::new(repo, bus.clone(), Arc::new(jobs), config);
        (pipeline, PipelineInbox::new(messages, fired), bus)
    }

    pub fn with_dispatcher(mut self, dispatcher: NotificationDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn tasks(&self) -> &LocalTaskService {
        &self.tasks
    }

    pub fn reminders(&self) -> &ReminderScheduler {
        &self.reminders
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Task events
    // ------------------------------------------------------------------------

    /// Entry point for a `task-events` delivery. Always acknowledges.
    pub async fn handle_task_event(&self, payload: Value) -> Ack {
        let event = match decode_task_event(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping undecodable task event");
                return Ack::Malformed(e.to_string());
            }
        };

        let span = info_span!(
            "task_event",
            correlation_id = %event.correlation_id,
            task_id = %event.task_id,
            event_type = %event.event_type,
        );
        self.process_task_event(event).instrument(span).await
    }

    async fn process_task_event(&self, event: TaskEvent) -> Ack {
        let key = event.idempotency_key();
        match with_timeout(self.config.call_timeout, self.repo.is_event_processed(&key)).await {
            Ok(true) => {
                info!(idempotency_key = %key, "event already processed, skipping");
                return Ack::Skipped(format!("{} already processed", key));
            }
            Ok(false) => {}
            // Handlers are idempotent on their own, so carry on.
            Err(e) => warn!(error = %e, "ledger lookup failed"),
        }

        let (outcome, detail, ack) = match self.route_task_event(&event).await {
            Ok(summary) => {
                debug!(%summary, "task event handled");
                (LedgerOutcome::Processed, summary, Ack::Processed)
            }
            Err(e) => {
                error!(error = %e, retryable = e.is_retryable(), "task event handling failed");
                (LedgerOutcome::Failed, e.to_string(), Ack::Failed(e.to_string()))
            }
        };

        if let Err(e) = with_timeout(
            self.config.call_timeout,
            self.repo.record_event_outcome(
                &key,
                &event.event_type.to_string(),
                event.correlation_id,
                outcome,
                Some(detail),
            ),
        )
        .await
        {
            warn!(error = %e, "failed to record event outcome");
        }
        ack
    }

    async fn route_task_event(&self, event: &TaskEvent) -> Result<String, CoreError> {
        let offsets = &self.config.reminder_offsets;
        match event.event_type {
            // Reminders follow the task as stored; events may arrive late or out of order.
            TaskEventType::Created => match self.open_task(event.task_id).await? {
                Some(Task { due_at: Some(due_at), .. }) => {
                    let scheduled = self
                        .reminders
                        .schedule_reminders_for_task(event.task_id, due_at, offsets, event.correlation_id)
                        .await?;
                    Ok(format!("scheduled {} reminders", scheduled.len()))
                }
                Some(_) => Ok("no due date, no reminders".to_string()),
                None => Ok("task is completed or gone, no reminders".to_string()),
            },
            TaskEventType::Updated if event.due_date_changed() => {
                match self.open_task(event.task_id).await?.and_then(|task| task.due_at) {
                    Some(due_at) => {
                        let (cancelled, scheduled) = self
                            .reminders
                            .reschedule_reminders(event.task_id, due_at, offsets, event.correlation_id)
                            .await?;
                        Ok(format!(
                            "cancelled {} reminders, scheduled {}",
                            cancelled,
                            scheduled.len()
                        ))
                    }
                    None => {
                        let cancelled = self.reminders.cancel_reminders(event.task_id).await?;
                        Ok(format!("nothing left to remind about, cancelled {} reminders", cancelled))
                    }
                }
            }
            TaskEventType::Updated => Ok("due date unchanged".to_string()),
            TaskEventType::Completed => {
                // Both steps run even if one fails; redelivery retries the failed one.
                let recurrence = self.orchestrator.handle_task_completed(event).await;
                let cancelled = self.reminders.cancel_reminders(event.task_id).await;
                let recurrence = recurrence?;
                let cancelled = cancelled?;
                Ok(format!(
                    "cancelled {} reminders, recurrence: {}",
                    cancelled,
                    describe(recurrence)
                ))
            }
            TaskEventType::Deleted => {
                let cancelled = self.reminders.cancel_reminders(event.task_id).await?;
                Ok(format!("cancelled {} reminders", cancelled))
            }
        }
    }

    /// The task as currently stored, or `None` once it is completed or deleted.
    async fn open_task(&self, task_id: Uuid) -> Result<Option<Task>, CoreError> {
        let task = with_timeout(self.config.call_timeout, self.repo.find_task_by_id(task_id)).await?;
        match task {
            Some(task) if task.status == TaskStatus::Completed => {
                debug!(%task_id, "task already completed");
                Ok(None)
            }
            Some(task) => Ok(Some(task)),
            None => {
                debug!(%task_id, "task no longer exists");
                Ok(None)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Reminder jobs
    // ------------------------------------------------------------------------

    /// Entry point for a fired reminder job. Always acknowledges.
    pub async fn handle_reminder_due(&self, payload: Value) -> Ack {
        let job = match decode_job_payload(payload) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "dropping undecodable reminder job payload");
                return Ack::Malformed(e.to_string());
            }
        };

        let span = info_span!(
            "reminder_due",
            correlation_id = %job.correlation_id,
            reminder_id = %job.reminder_id,
            task_id = %job.task_id,
        );
        self.process_reminder_due(job).instrument(span).await
    }

    async fn process_reminder_due(&self, job: ReminderJobPayload) -> Ack {
        let timeout = self.config.call_timeout;
        let reminder = match with_timeout(timeout, self.repo.find_reminder_by_id(job.reminder_id)).await {
            Ok(Some(reminder)) => reminder,
            Ok(None) => {
                warn!("fired reminder does not exist");
                return Ack::Skipped("reminder not found".to_string());
            }
            Err(e) => {
                error!(error = %e, "could not load fired reminder");
                return Ack::Failed(e.to_string());
            }
        };

        if reminder.delivery_status != DeliveryStatus::Pending {
            info!(status = %reminder.delivery_status, "reminder no longer pending, skipping");
            return Ack::Skipped(format!("reminder is {}", reminder.delivery_status));
        }

        let task = match with_timeout(timeout, self.repo.find_task_by_id(reminder.task_id)).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                let record = DeliveryRecord {
                    status: DeliveryStatus::Failed,
                    retry_count: 0,
                    error_message: Some("task no longer exists".to_string()),
                };
                return self.finish_delivery(reminder, record, job.correlation_id).await;
            }
            Err(e) => {
                error!(error = %e, "could not load task for reminder");
                return Ack::Failed(e.to_string());
            }
        };

        if task.status == TaskStatus::Completed {
            let record = DeliveryRecord {
                status: DeliveryStatus::Cancelled,
                retry_count: 0,
                error_message: None,
            };
            return match with_timeout(timeout, self.repo.record_delivery(reminder.id, record)).await {
                Ok(_) => {
                    info!("task already completed, reminder cancelled");
                    Ack::Skipped("task is completed".to_string())
                }
                Err(e) => {
                    error!(error = %e, "could not cancel reminder of completed task");
                    Ack::Failed(e.to_string())
                }
            };
        }

        // A job may fire more than once; only the worker holding the claim sends.
        let stale_before = Utc::now() - self.claim_lease();
        match with_timeout(timeout, self.repo.claim_reminder(reminder.id, stale_before)).await {
            Ok(true) => {}
            Ok(false) => {
                info!("reminder is being delivered elsewhere, skipping");
                return Ack::Skipped("reminder already claimed".to_string());
            }
            Err(e) => {
                error!(error = %e, "could not claim reminder");
                return Ack::Failed(e.to_string());
            }
        }

        self.emit_reminder_event(ReminderEventType::ReminderDue, &reminder, job.correlation_id)
            .await;

        let request = NotificationRequest {
            user_id: reminder.user_id.clone(),
            task_id: task.id,
            title: task.title.clone(),
            description: task.description.clone(),
            priority: task.priority,
            due_at: task.due_at,
            channel: reminder.notification_channel,
            correlation_id: job.correlation_id,
        };
        let report = self.dispatcher.deliver(&request).await;

        let record = DeliveryRecord {
            status: if report.delivered {
                DeliveryStatus::Sent
            } else {
                DeliveryStatus::Failed
            },
            retry_count: report.retries(),
            error_message: report.error_message,
        };
        self.finish_delivery(reminder, record, job.correlation_id).await
    }

    /// How long a delivery claim holds before another worker may take it over.
    fn claim_lease(&self) -> ChronoDuration {
        let lease = self
            .config
            .retry
            .worst_case(self.config.call_timeout)
            .saturating_add(self.config.call_timeout);
        ChronoDuration::from_std(lease).unwrap_or_else(|_| ChronoDuration::days(1))
    }

    /// Writes the terminal status and announces it, unless the reminder left
    /// `pending` while the notification was in flight.
    async fn finish_delivery(
        &self,
        mut reminder: Reminder,
        record: DeliveryRecord,
        correlation_id: CorrelationId,
    ) -> Ack {
        match with_timeout(
            self.config.call_timeout,
            self.repo.record_delivery(reminder.id, record.clone()),
        )
        .await
        {
            Ok(true) => {}
            Ok(false) => {
                info!("reminder changed state during delivery, outcome not recorded");
                return Ack::Skipped("reminder no longer pending".to_string());
            }
            Err(e) => {
                error!(error = %e, "failed to record delivery outcome");
                return Ack::Failed(e.to_string());
            }
        }

        reminder.delivery_status = record.status;
        reminder.retry_count = record.retry_count;
        reminder.error_message = record.error_message.clone();

        let event_type = if record.status == DeliveryStatus::Sent {
            ReminderEventType::ReminderSent
        } else {
            ReminderEventType::ReminderFailed
        };
        self.emit_reminder_event(event_type, &reminder, correlation_id).await;

        match record.status {
            DeliveryStatus::Sent => Ack::Processed,
            _ => Ack::Failed(record.error_message.unwrap_or_else(|| "delivery failed".to_string())),
        }
    }

    async fn emit_reminder_event(&self, event_type: ReminderEventType, reminder: &Reminder, correlation_id: CorrelationId) {
        let event = ReminderEvent::from_reminder(event_type, reminder, correlation_id);
        if let Err(e) = with_timeout(
            self.config.call_timeout,
            publish_event(self.bus.as_ref(), topics::REMINDERS, &event),
        )
        .await
        {
            warn!(%event_type, error = %e, "failed to publish reminder event");
        }
    }

    // ------------------------------------------------------------------------
    // Startup and message loop
    // ------------------------------------------------------------------------

    /// Registers jobs again for every pending reminder. Overdue ones fire immediately.
    ///
    /// Returns how many were re-armed.
    pub async fn rearm_pending_reminders(&self) -> Result<usize, CoreError> {
        let pending = with_timeout(self.config.call_timeout, self.repo.find_pending_reminders()).await?;
        let mut rearmed = 0;
        for reminder in &pending {
            let correlation_id = CorrelationId::new();
            match self.reminders.rearm(reminder, correlation_id).await {
                Ok(()) => rearmed += 1,
                Err(e) => warn!(reminder_id = %reminder.id, error = %e, "could not re-arm reminder"),
            }
        }
        if rearmed > 0 {
            info!(count = rearmed, "pending reminders re-armed");
        }
        Ok(rearmed)
    }

    pub async fn dispatch_message(&self, message: BusMessage) -> Option<Ack> {
        match message.topic.as_str() {
            topics::TASK_EVENTS => Some(self.handle_task_event(message.payload).await),
            // Reminder and live-update topics are outbound only.
            _ => None,
        }
    }

    pub async fn dispatch_fired(&self, job: FiredJob) -> Option<Ack> {
        if job.callback_url == REMINDER_CALLBACK_URL {
            Some(self.handle_reminder_due(job.payload).await)
        } else {
            warn!(job_id = %job.job_id, callback_url = %job.callback_url, "fired job has no handler");
            None
        }
    }

    /// Handles everything already queued, including messages produced while
    /// handling, and returns how many messages were dispatched.
    pub async fn drain(&self, inbox: &mut PipelineInbox) -> usize {
        let mut handled = 0;
        loop {
            let mut progressed = false;

            match inbox.messages.try_recv() {
                Ok(message) => {
                    self.dispatch_message(message).await;
                    handled += 1;
                    progressed = true;
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    error!(skipped, "bus subscriber lagged, messages lost");
                    progressed = true;
                }
                Err(_) => {}
            }

            if let Ok(job) = inbox.fired.try_recv() {
                self.dispatch_fired(job).await;
                handled += 1;
                progressed = true;
            }

            if !progressed {
                return handled;
            }
        }
    }

    /// Consumes the inbox until `shutdown` resolves, handling messages concurrently.
    ///
    /// Handlers still in flight at shutdown are awaited.
    pub async fn run<S>(self: Arc<Self>, mut inbox: PipelineInbox, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut inflight = JoinSet::new();
        info!("pipeline running");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                message = inbox.messages.recv() => match message {
                    Ok(message) => {
                        let pipeline = Arc::clone(&self);
                        inflight.spawn(async move {
                            pipeline.dispatch_message(message).await;
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        error!(skipped, "bus subscriber lagged, messages lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                job = inbox.fired.recv() => match job {
                    Some(job) => {
                        let pipeline = Arc::clone(&self);
                        inflight.spawn(async move {
                            pipeline.dispatch_fired(job).await;
                        });
                    }
                    None => break,
                },
                Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "handler task crashed");
                    }
                }
            }
        }

        info!(inflight = inflight.len(), "pipeline shutting down");
        while let Some(joined) = inflight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "handler task crashed");
            }
        }
    }
}

fn describe(outcome: OrchestrationOutcome) -> String {
    match outcome {
        OrchestrationOutcome::Ignored => "not recurring".to_string(),
        OrchestrationOutcome::PatternMissing => "pattern missing".to_string(),
        OrchestrationOutcome::SeriesEnded => "series ended".to_string(),
        OrchestrationOutcome::AlreadyGenerated(id) => format!("already generated {}", id),
        OrchestrationOutcome::Created(id) => format!("created {}", id),
    }
}
