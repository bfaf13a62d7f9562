// src/lib.rs
//
// Facade crate: re-exports the moderation pipeline API so callers depend
// on one crate.

pub use modgate_common::error::{Error, Result};
pub use modgate_common::models::{Message, StatusCode, Verdict, Violation, ViolationEvent};
pub use modgate_common::traits::{
    AiAnalyzer, CallbackHandler, EventHandler, ProcessedHandler, TokenStorage,
};

pub use modgate_core::cache::VerdictCache;
pub use modgate_core::engine::{EngineStats, TriggerEngine};
pub use modgate_core::events::EventName;
pub use modgate_core::pipeline::{Pipeline, PipelineOptions, ProcessOptions};
pub use modgate_core::storage::{MemoryTokenStore, PostgresTokenStore};

pub use modgate_ai::{ChatAnalyzer, ChatAnalyzerOptions};
