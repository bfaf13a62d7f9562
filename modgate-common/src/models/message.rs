use serde::{Deserialize, Serialize};

/// One inbound user message submitted for moderation.
///
/// The pipeline never mutates the caller's message; classification works on
/// a copy whose `data` may be truncated to the configured size cap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialog_id: Option<String>,
    pub user: i64,
    pub data: String,
}
