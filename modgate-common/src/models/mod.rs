// modgate-common/src/models/mod.rs

pub mod message;
pub mod verdict;

pub use message::Message;
pub use verdict::{StatusCode, Verdict, Violation, ViolationEvent};
