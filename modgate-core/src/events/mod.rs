//! Named moderation events and the subscriber registry.
//!
//! Each decision code maps to one event name. Dispatch snapshots the
//! subscriber list under the read lock and then invokes handlers in
//! registration order, so a handler may register further handlers without
//! deadlocking. Handler errors are logged and never stop later handlers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use modgate_common::models::{StatusCode, ViolationEvent};
use modgate_common::traits::EventHandler;
use tracing::warn;

/// Named dispatch channel, one per decision code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    AllowClean,
    MarkAbuse,
    HumanReview,
    AutoRestrict,
    AutoBanEscalate,
    CriticalEscalate,
}

impl EventName {
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::AllowClean => "allow_clean",
            EventName::MarkAbuse => "mark_abuse",
            EventName::HumanReview => "human_review",
            EventName::AutoRestrict => "auto_restrict",
            EventName::AutoBanEscalate => "auto_ban_escalate",
            EventName::CriticalEscalate => "critical_escalate",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<StatusCode> for EventName {
    fn from(status: StatusCode) -> Self {
        match status {
            StatusCode::Clean => EventName::AllowClean,
            StatusCode::NonCriticalAbuse => EventName::MarkAbuse,
            StatusCode::HumanReview => EventName::HumanReview,
            StatusCode::Suspicious => EventName::AutoRestrict,
            StatusCode::CommercialOffPlatform => EventName::AutoBanEscalate,
            StatusCode::DangerousIllegal => EventName::CriticalEscalate,
        }
    }
}

/// Subscription table: event name to handlers in registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<EventName, Vec<Arc<dyn EventHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, event: EventName, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event)
            .or_default()
            .push(handler);
    }

    fn snapshot(&self, event: EventName) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn dispatch(&self, event: EventName, payload: &ViolationEvent) {
        for handler in self.snapshot(event) {
            if let Err(error) = handler.handle(payload).await {
                warn!(%error, event = %event, "event handler failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use modgate_common::error::{Error, Result};

    use super::*;

    struct Counting {
        calls: AtomicU64,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle(&self, _event: &ViolationEvent) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Internal("handler exploded".into()));
            }
            Ok(())
        }
    }

    fn event(status: StatusCode) -> ViolationEvent {
        ViolationEvent {
            dialog_id: None,
            message_id: 1,
            violator_user_id: 2,
            reason: String::new(),
            confidence: 1.0,
            trigger_tokens: Vec::new(),
            status,
            triggered_by_rule: false,
        }
    }

    #[test]
    fn status_maps_to_event_in_order() {
        assert_eq!(EventName::from(StatusCode::Clean), EventName::AllowClean);
        assert_eq!(EventName::from(StatusCode::NonCriticalAbuse), EventName::MarkAbuse);
        assert_eq!(EventName::from(StatusCode::HumanReview), EventName::HumanReview);
        assert_eq!(EventName::from(StatusCode::Suspicious), EventName::AutoRestrict);
        assert_eq!(
            EventName::from(StatusCode::CommercialOffPlatform),
            EventName::AutoBanEscalate
        );
        assert_eq!(
            EventName::from(StatusCode::DangerousIllegal),
            EventName::CriticalEscalate
        );
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_later_ones() {
        let registry = HandlerRegistry::new();
        let failing = Arc::new(Counting { calls: AtomicU64::new(0), fail: true });
        let passing = Arc::new(Counting { calls: AtomicU64::new(0), fail: false });
        registry.on(EventName::CriticalEscalate, failing.clone());
        registry.on(EventName::CriticalEscalate, passing.clone());

        registry
            .dispatch(EventName::CriticalEscalate, &event(StatusCode::DangerousIllegal))
            .await;

        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(passing.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_hits_only_the_named_event() {
        let registry = HandlerRegistry::new();
        let handler = Arc::new(Counting { calls: AtomicU64::new(0), fail: false });
        registry.on(EventName::MarkAbuse, handler.clone());

        registry
            .dispatch(EventName::AllowClean, &event(StatusCode::Clean))
            .await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

        registry
            .dispatch(EventName::MarkAbuse, &event(StatusCode::NonCriticalAbuse))
            .await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
