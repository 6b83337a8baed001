//! Push-notification payloads.
//!
//! The backing store publishes UTF-8 JSON on the notification channel:
//!
//! ```json
//! {"runId": "0190...", "id": 42, "type": "page_scraped", "data": {"url": "..."}}
//! ```
//!
//! `runId` and `id` are required. `type` defaults to `"progress"`. When no
//! `data` key is present, every other field becomes the data object.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::RunId;

/// One progress event for a run. Ids are strictly increasing within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub run_id: RunId,
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPayload {
    run_id: RunId,
    id: i64,
    #[serde(rename = "type")]
    kind: Option<String>,
    data: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Notification {
    pub fn new(run_id: RunId, id: i64, kind: impl Into<String>, data: Value) -> Self {
        Self {
            run_id,
            id,
            kind: kind.into(),
            data,
        }
    }

    /// Parse a raw notification payload.
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        let raw: RawPayload = serde_json::from_str(payload)?;
        Ok(Self {
            run_id: raw.run_id,
            id: raw.id,
            kind: raw.kind.unwrap_or_else(|| "progress".to_string()),
            data: raw.data.unwrap_or(Value::Object(raw.extra)),
        })
    }
}

/// Observer receiving parsed notifications, in arrival order.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: Notification);
}
