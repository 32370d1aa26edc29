//! Notification delivery with bounded exponential backoff.
//!
//! A [`NotificationDispatcher`] owns one [`NotificationSender`] per channel and
//! always resolves to an outcome: sender errors, timeouts and panics are
//! counted as failed attempts and never escape.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{publish_event, EventBus};
use crate::error::CoreError;
use crate::events::{topics, CorrelationId, TaskUpdateEvent, TaskUpdateKind};
use crate::models::{NotificationChannel, OutboxEntry, RetryPolicy, TaskPriority};
use crate::repository::{ReminderRepository, Repository};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub user_id: String,
    pub task_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub due_at: Option<DateTime<Utc>>,
    pub channel: NotificationChannel,
    pub correlation_id: CorrelationId,
}

impl NotificationRequest {
    pub fn subject(&self) -> String {
        format!("Reminder: {}", self.title)
    }

    pub fn body(&self) -> String {
        let mut body = match self.due_at {
            Some(due) => format!(
                "'{}' is due {} (priority {}).",
                self.title,
                due.format("%Y-%m-%d %H:%M UTC"),
                self.priority
            ),
            None => format!("'{}' needs your attention (priority {}).", self.title, self.priority),
        };
        if let Some(description) = self.description.as_deref().filter(|d| !d.is_empty()) {
            body.push_str("\n\n");
            body.push_str(description);
        }
        body
    }
}

/// One delivery attempt over a single channel.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, request: &NotificationRequest) -> Result<(), CoreError>;
}

/// Delivers in-app notifications as live updates on the bus.
pub struct InAppSender {
    bus: Arc<dyn EventBus>,
}

impl InAppSender {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl NotificationSender for InAppSender {
    async fn send(&self, request: &NotificationRequest) -> Result<(), CoreError> {
        let update = TaskUpdateEvent::new(
            TaskUpdateKind::Notification,
            request.task_id,
            request.user_id.clone(),
            request.correlation_id,
        )
        .with_message(request.body());
        publish_event(self.bus.as_ref(), topics::TASK_UPDATES, &update).await
    }
}

/// Hands email and SMS notifications to an external relay through the outbox table.
pub struct OutboxSender {
    repo: Arc<dyn Repository>,
    channel: NotificationChannel,
}

impl OutboxSender {
    pub fn new(repo: Arc<dyn Repository>, channel: NotificationChannel) -> Self {
        Self { repo, channel }
    }
}

#[async_trait]
impl NotificationSender for OutboxSender {
    async fn send(&self, request: &NotificationRequest) -> Result<(), CoreError> {
        let entry = OutboxEntry {
            id: Uuid::now_v7(),
            user_id: request.user_id.clone(),
            task_id: request.task_id,
            channel: self.channel,
            subject: request.subject(),
            body: request.body(),
            correlation_id: Some(request.correlation_id.to_string()),
            created_at: Utc::now(),
        };
        self.repo.enqueue_outbox(&entry).await
    }
}

/// Result of a full delivery run, kept for the reminder record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: bool,
    pub attempts: u32,
    /// Cause of the last failed attempt
    pub error_message: Option<String>,
}

impl DeliveryReport {
    /// Attempts beyond the first one.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

pub struct NotificationDispatcher {
    senders: HashMap<NotificationChannel, Arc<dyn NotificationSender>>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(retry: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            senders: HashMap::new(),
            retry,
            call_timeout,
        }
    }

    /// Dispatcher with the standard senders: in-app over the bus, email and SMS via the outbox.
    pub fn with_default_senders(
        repo: Arc<dyn Repository>,
        bus: Arc<dyn EventBus>,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self::new(retry, call_timeout)
            .with_sender(NotificationChannel::InApp, Arc::new(InAppSender::new(bus)))
            .with_sender(
                NotificationChannel::Email,
                Arc::new(OutboxSender::new(repo.clone(), NotificationChannel::Email)),
            )
            .with_sender(
                NotificationChannel::Sms,
                Arc::new(OutboxSender::new(repo, NotificationChannel::Sms)),
            )
    }

    pub fn with_sender(mut self, channel: NotificationChannel, sender: Arc<dyn NotificationSender>) -> Self {
        self.senders.insert(channel, sender);
        self
    }

    /// `true` once any attempt succeeds, `false` after every attempt failed.
    pub async fn send_notification(&self, request: &NotificationRequest) -> bool {
        self.deliver(request).await.delivered
    }

    #[tracing::instrument(
        skip(self, request),
        fields(correlation_id = %request.correlation_id, task_id = %request.task_id, channel = %request.channel)
    )]
    pub async fn deliver(&self, request: &NotificationRequest) -> DeliveryReport {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let delay = self.retry.delay_before(attempt);
            if !delay.is_zero() {
                debug!(attempt, ?delay, "backing off before retry");
                tokio::time::sleep(delay).await;
            }

            match self.attempt(request).await {
                Ok(()) => {
                    info!(attempt, "notification delivered");
                    return DeliveryReport {
                        delivered: true,
                        attempts: attempt,
                        error_message: None,
                    };
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "notification attempt failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        warn!(max_attempts, "notification retries exhausted");
        DeliveryReport {
            delivered: false,
            attempts: max_attempts,
            error_message: last_error,
        }
    }

    /// Runs one send on its own task so a panicking sender only fails this attempt.
    async fn attempt(&self, request: &NotificationRequest) -> Result<(), CoreError> {
        let sender = self
            .senders
            .get(&request.channel)
            .cloned()
            .ok_or_else(|| CoreError::Channel(format!("no sender registered for {}", request.channel)))?;

        let owned = request.clone();
        let mut handle = tokio::spawn(async move { sender.send(&owned).await });

        match tokio::time::timeout(self.call_timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(CoreError::Channel(format!("sender crashed: {}", join_err))),
            Err(_) => {
                handle.abort();
                Err(CoreError::Timeout(self.call_timeout))
            }
        }
    }
}
