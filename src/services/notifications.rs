use std::sync::Arc;

use async_trait::async_trait;
use futures::{future::BoxFuture, stream, FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::Actor,
    clock::Clock,
    db::DbPool,
    error::AppError,
    models::{
        notification::{Inbox, Notification, NotificationKind, NotificationMeta},
        trip::normalize_optional,
    },
    services::users::UserStore,
};

const INBOX_LIMIT: i64 = 50;

/// Device push delivery. The stored notification exists whether or not this succeeds.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn deliver(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        meta: &NotificationMeta,
    ) -> Result<(), AppError>;
}

/// Push channel used when no device provider is configured: logs and reports success.
#[derive(Clone, Default)]
pub struct LogPushChannel;

#[async_trait]
impl PushChannel for LogPushChannel {
    async fn deliver(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        meta: &NotificationMeta,
    ) -> Result<(), AppError> {
        debug!(user_id, title, body, kind = ?meta.kind, "push delivery (log only)");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub user_id: String,
    pub notification_id: Option<String>,
    pub delivered: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastSummary {
    pub targeted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub outcomes: Vec<SendOutcome>,
}

/// Request for a test notification. Only administrators may target another user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestNotification {
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub send_to_all: bool,
    pub user_id: Option<String>,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    db: DbPool,
    users: UserStore,
    push: Arc<dyn PushChannel>,
    clock: Arc<dyn Clock>,
    concurrency: usize,
}

impl NotificationDispatcher {
    pub fn new(
        db: DbPool,
        users: UserStore,
        push: Arc<dyn PushChannel>,
        clock: Arc<dyn Clock>,
        concurrency: usize,
    ) -> Self {
        Self {
            db,
            users,
            push,
            clock,
            concurrency: concurrency.max(1),
        }
    }

    /// Stores one notification row for `user_id`, then tries to push it.
    /// Only a storage failure is an `Err`; delivery failures are reported in the outcome.
    pub async fn send_to_user(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        meta: &NotificationMeta,
    ) -> Result<SendOutcome, AppError> {
        let notification_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"INSERT INTO notifications (id, user_id, title, body, kind, data, related_trip, read, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)"#,
        )
        .bind(&notification_id)
        .bind(user_id)
        .bind(title.trim())
        .bind(body.trim())
        .bind(meta.kind)
        .bind(Json(&meta.data))
        .bind(&meta.trip_id)
        .bind(self.clock.now())
        .execute(&self.db)
        .await?;

        let outcome = match self.push.deliver(user_id, title, body, meta).await {
            Ok(()) => SendOutcome {
                user_id: user_id.to_string(),
                notification_id: Some(notification_id),
                delivered: true,
                error: None,
            },
            Err(err) => {
                warn!(user_id, error = %err, "push delivery failed, notification kept");
                SendOutcome {
                    user_id: user_id.to_string(),
                    notification_id: Some(notification_id),
                    delivered: false,
                    error: Some(err.to_string()),
                }
            }
        };
        Ok(outcome)
    }

    /// Sends to every active user except `excluded` (everyone when `None`).
    /// Individual failures are collected, never short-circuit the rest.
    pub async fn send_to_all_except(
        &self,
        excluded: Option<&str>,
        title: &str,
        body: &str,
        meta: &NotificationMeta,
    ) -> Result<BroadcastSummary, AppError> {
        let recipients = self.users.list_active_except(excluded).await?;
        let sends: Vec<BoxFuture<'static, SendOutcome>> = recipients
            .into_iter()
            .map(|user| {
                let dispatcher = self.clone();
                let (title, body, meta) = (title.to_string(), body.to_string(), meta.clone());
                async move {
                    match dispatcher.send_to_user(&user.id, &title, &body, &meta).await {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            warn!(user_id = %user.id, error = %err, "could not store notification");
                            SendOutcome {
                                user_id: user.id,
                                notification_id: None,
                                delivered: false,
                                error: Some(err.to_string()),
                            }
                        }
                    }
                }
                .boxed()
            })
            .collect();
        let outcomes: Vec<SendOutcome> = stream::iter(sends)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let delivered = outcomes.iter().filter(|outcome| outcome.delivered).count();
        let summary = BroadcastSummary {
            targeted: outcomes.len(),
            delivered,
            failed: outcomes.len() - delivered,
            outcomes,
        };
        info!(
            kind = ?meta.kind,
            targeted = summary.targeted,
            failed = summary.failed,
            "broadcast sent"
        );
        Ok(summary)
    }

    /// Sends a `test` notification to the actor, to a chosen user (admins only),
    /// or to everyone but the actor.
    pub async fn send_test(
        &self,
        actor: &Actor,
        request: TestNotification,
    ) -> Result<BroadcastSummary, AppError> {
        let title =
            normalize_optional(request.title).unwrap_or_else(|| "Test notification".to_string());
        let body = normalize_optional(request.body)
            .unwrap_or_else(|| format!("This is a test notification from {}", actor.name));
        let meta = NotificationMeta::new(NotificationKind::Test)
            .with("generatedBy", actor.name.as_str())
            .with("generatedByRole", actor.role.as_str());

        if request.send_to_all {
            return self
                .send_to_all_except(Some(&actor.id), &title, &body, &meta)
                .await;
        }

        let target = match (request.user_id, actor.role.is_admin()) {
            (Some(user_id), true) => self.users.require(&user_id).await?.id,
            _ => actor.id.clone(),
        };
        let outcome = self.send_to_user(&target, &title, &body, &meta).await?;
        info!(actor = %actor.name, target = %target, delivered = outcome.delivered, "test notification sent");
        let delivered = usize::from(outcome.delivered);
        Ok(BroadcastSummary {
            targeted: 1,
            delivered,
            failed: 1 - delivered,
            outcomes: vec![outcome],
        })
    }

    pub async fn inbox(&self, actor: &Actor, unread_only: bool) -> Result<Inbox, AppError> {
        let notifications = sqlx::query_as::<_, Notification>(
            r#"SELECT * FROM notifications
            WHERE user_id = ?1 AND (?2 = 0 OR read = 0)
            ORDER BY created_at DESC
            LIMIT ?3"#,
        )
        .bind(&actor.id)
        .bind(unread_only)
        .bind(INBOX_LIMIT)
        .fetch_all(&self.db)
        .await?;
        let unread_count = self.unread_count(&actor.id).await?;
        Ok(Inbox {
            notifications,
            unread_count,
        })
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<i64, AppError> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    pub async fn for_trip(&self, trip_id: &str) -> Result<Vec<Notification>, AppError> {
        let notifications = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE related_trip = ?1 ORDER BY created_at",
        )
        .bind(trip_id)
        .fetch_all(&self.db)
        .await?;
        Ok(notifications)
    }

    /// Marks one of the actor's own notifications as read.
    pub async fn mark_read(&self, actor: &Actor, notification_id: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"UPDATE notifications SET read = 1, read_at = COALESCE(read_at, ?3)
            WHERE id = ?1 AND user_id = ?2"#,
        )
        .bind(notification_id)
        .bind(&actor.id)
        .bind(self.clock.now())
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    pub async fn mark_all_read(&self, actor: &Actor) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE notifications SET read = 1, read_at = ?2 WHERE user_id = ?1 AND read = 0",
        )
        .bind(&actor.id)
        .bind(self.clock.now())
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }
}
