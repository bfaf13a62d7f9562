// modgate-common/src/traits/mod.rs
//
// Narrow seams the pipeline consumes. Implementations are injected; the
// core never constructs a concrete analyzer or store itself.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Message, Verdict, Violation, ViolationEvent};

/// Remote classifier for message content.
#[async_trait]
pub trait AiAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, message: &Message) -> Result<Verdict>;

    /// Classifies a batch in one round trip when the backend supports it.
    ///
    /// The default delegates to [`analyze`](Self::analyze) per message, so
    /// overriding this method is the batching capability probe.
    async fn analyze_batch(&self, messages: &[Message]) -> Result<Vec<Verdict>> {
        let mut out = Vec::with_capacity(messages.len());
        for message in messages {
            let mut verdict = self.analyze(message).await?;
            if verdict.message_id == 0 {
                verdict.message_id = message.id;
            }
            if verdict.violator_user_id == 0 {
                verdict.violator_user_id = message.user;
            }
            out.push(verdict);
        }
        Ok(out)
    }
}

/// Persistent trigger-token store.
///
/// `add_token` must be idempotent for duplicate inserts.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    async fn add_token(&self, token: &str) -> Result<()>;
    async fn remove_token(&self, token: &str) -> Result<()>;
    async fn get_tokens(&self) -> Result<Vec<String>>;
    async fn token_exists(&self, token: &str) -> Result<bool>;
}

/// Fixed per-status callback surface, routed by decision code 1..6 in
/// declaration order. All methods default to no-ops so a handler only
/// implements the statuses it cares about.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    async fn on_clean(&self, _violation: &Violation) -> Result<()> {
        Ok(())
    }
    async fn on_non_critical_abuse(&self, _violation: &Violation) -> Result<()> {
        Ok(())
    }
    async fn on_suspicious(&self, _violation: &Violation) -> Result<()> {
        Ok(())
    }
    async fn on_commercial_off_platform(&self, _violation: &Violation) -> Result<()> {
        Ok(())
    }
    async fn on_dangerous_illegal(&self, _violation: &Violation) -> Result<()> {
        Ok(())
    }
    async fn on_critical(&self, _violation: &Violation) -> Result<()> {
        Ok(())
    }
}

/// Optional catch-all invoked for every decision after the fixed callback.
#[async_trait]
pub trait ProcessedHandler: Send + Sync {
    async fn on_processed(&self, violation: &Violation) -> Result<()>;
}

/// Subscriber for a named moderation event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &ViolationEvent) -> Result<()>;
}
