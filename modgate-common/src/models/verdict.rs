use serde::de::{Deserializer, Error as DeError};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Moderation decision code returned by the classifier.
///
/// Codes outside `1..=6` never survive deserialization; they are coerced to
/// [`StatusCode::HumanReview`] at the wire boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatusCode {
    Clean = 1,
    NonCriticalAbuse = 2,
    HumanReview = 3,
    Suspicious = 4,
    CommercialOffPlatform = 5,
    DangerousIllegal = 6,
}

impl StatusCode {
    pub const ALL: [StatusCode; 6] = [
        StatusCode::Clean,
        StatusCode::NonCriticalAbuse,
        StatusCode::HumanReview,
        StatusCode::Suspicious,
        StatusCode::CommercialOffPlatform,
        StatusCode::DangerousIllegal,
    ];

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(StatusCode::Clean),
            2 => Some(StatusCode::NonCriticalAbuse),
            3 => Some(StatusCode::HumanReview),
            4 => Some(StatusCode::Suspicious),
            5 => Some(StatusCode::CommercialOffPlatform),
            6 => Some(StatusCode::DangerousIllegal),
            _ => None,
        }
    }

    /// Maps any wire value onto a valid code, falling back to `HumanReview`.
    pub fn coerce(code: i64) -> Self {
        Self::from_code(code).unwrap_or(StatusCode::HumanReview)
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i64::deserialize(deserializer)?;
        Ok(StatusCode::coerce(code))
    }
}

/// Normalized classifier response for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub status: StatusCode,
    pub reason: String,
    pub confidence: f64,
    pub trigger_tokens: Vec<String>,
    pub violator_user_id: i64,
    pub message_id: i64,
}

#[derive(Deserialize)]
struct FullWire {
    status_code: StatusCode,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    trigger_tokens: Vec<String>,
    #[serde(default)]
    violator_user_id: i64,
    #[serde(default)]
    message_id: i64,
}

#[derive(Deserialize)]
struct CompactWire {
    a: StatusCode,
    #[serde(default)]
    b: String,
    #[serde(default)]
    c: f64,
    #[serde(default)]
    d: Vec<String>,
    #[serde(default)]
    e: i64,
    #[serde(default)]
    f: i64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VerdictWire {
    Full(FullWire),
    Compact(CompactWire),
}

/// Accepts both the full field names and the compact single-letter shape.
impl<'de> Deserialize<'de> for Verdict {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match VerdictWire::deserialize(deserializer) {
            Ok(VerdictWire::Full(w)) => Ok(Verdict {
                status: w.status_code,
                reason: w.reason,
                confidence: w.confidence,
                trigger_tokens: w.trigger_tokens,
                violator_user_id: w.violator_user_id,
                message_id: w.message_id,
            }),
            Ok(VerdictWire::Compact(w)) => Ok(Verdict {
                status: w.a,
                reason: w.b,
                confidence: w.c,
                trigger_tokens: w.d,
                violator_user_id: w.e,
                message_id: w.f,
            }),
            Err(_) => Err(D::Error::custom("unsupported verdict format")),
        }
    }
}

/// Emits the compact shape to keep classifier payloads small.
impl Serialize for Verdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = 4
            + usize::from(self.violator_user_id != 0)
            + usize::from(self.message_id != 0);
        let mut state = serializer.serialize_struct("Verdict", fields)?;
        state.serialize_field("a", &self.status)?;
        state.serialize_field("b", &self.reason)?;
        state.serialize_field("c", &self.confidence)?;
        state.serialize_field("d", &self.trigger_tokens)?;
        if self.violator_user_id != 0 {
            state.serialize_field("e", &self.violator_user_id)?;
        } else {
            state.skip_field("e")?;
        }
        if self.message_id != 0 {
            state.serialize_field("f", &self.message_id)?;
        } else {
            state.skip_field("f")?;
        }
        state.end()
    }
}

/// Final moderation decision for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub message: Message,
    pub verdict: Verdict,
    /// True when the in-memory trigger pre-filter fired for this message.
    pub triggered_by_rule: bool,
}

/// Flattened decision payload delivered to subscribed event handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationEvent {
    pub dialog_id: Option<String>,
    pub message_id: i64,
    pub violator_user_id: i64,
    pub reason: String,
    pub confidence: f64,
    pub trigger_tokens: Vec<String>,
    pub status: StatusCode,
    pub triggered_by_rule: bool,
}

impl From<&Violation> for ViolationEvent {
    fn from(violation: &Violation) -> Self {
        ViolationEvent {
            dialog_id: violation.message.dialog_id.clone(),
            message_id: violation.message.id,
            violator_user_id: violation.verdict.violator_user_id,
            reason: violation.verdict.reason.clone(),
            confidence: violation.verdict.confidence,
            trigger_tokens: violation.verdict.trigger_tokens.clone(),
            status: violation.verdict.status,
            triggered_by_rule: violation.triggered_by_rule,
        }
    }
}
