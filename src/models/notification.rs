use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{types::Json, FromRow};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NotificationKind {
    TripAssigned,
    TripConfirmed,
    TripUpdated,
    TripCancelled,
    TripCompleted,
    TripReminder,
    TripStarted,
    TripEdited,
    #[default]
    System,
    Test,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub data: Json<Value>,
    pub related_trip: Option<String>,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Context attached to every dispatched notification.
#[derive(Debug, Clone, Default)]
pub struct NotificationMeta {
    pub kind: NotificationKind,
    pub trip_id: Option<String>,
    pub data: Value,
}

impl NotificationMeta {
    pub fn new(kind: NotificationKind) -> Self {
        Self {
            kind,
            trip_id: None,
            data: Value::Object(Default::default()),
        }
    }

    pub fn for_trip(kind: NotificationKind, trip_id: impl Into<String>) -> Self {
        Self {
            trip_id: Some(trip_id.into()),
            ..Self::new(kind)
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.data {
            map.insert(key.to_string(), value.into());
        }
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbox {
    pub notifications: Vec<Notification>,
    pub unread_count: i64,
}
