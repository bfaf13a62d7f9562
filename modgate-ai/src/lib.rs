// modgate-ai/src/lib.rs

mod analyzer;

pub use analyzer::{ChatAnalyzer, ChatAnalyzerOptions};
