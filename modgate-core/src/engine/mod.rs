//! In-memory trigger pre-filter.
//!
//! Stores normalized trigger tokens and finds them in message text with a
//! two-pass lookup: a hashed word probe over alphanumeric runs, then a
//! substring scan over multi-word phrases. Lookups take the read lock only;
//! metrics live in atomics outside the lock.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

/// Runtime engine metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub token_count: u64,
    pub last_lookup_nanos: u64,
    pub total_lookups: u64,
    pub total_token_hits: u64,
    pub last_reload_nanos: u64,
    pub total_reloads: u64,
}

#[derive(Default)]
struct EngineState {
    tokens: HashSet<String>,
    phrases: Vec<String>,
}

/// Trigger token store with case-insensitive lookup.
#[derive(Default)]
pub struct TriggerEngine {
    state: RwLock<EngineState>,

    last_lookup_nanos: AtomicU64,
    total_lookups: AtomicU64,
    total_token_hits: AtomicU64,
    last_reload_nanos: AtomicU64,
    total_reloads: AtomicU64,
}

fn normalize_token(token: &str) -> String {
    token.trim().to_lowercase()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

impl TriggerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one token. Returns false for empty or duplicate tokens.
    pub fn add_token(&self, token: &str) -> bool {
        let token = normalize_token(token);
        if token.is_empty() {
            return false;
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.tokens.contains(&token) {
            return false;
        }
        if token.contains(char::is_whitespace) {
            state.phrases.push(token.clone());
        }
        state.tokens.insert(token);
        true
    }

    /// Deletes one token. Returns false when it was not present.
    pub fn remove_token(&self, token: &str) -> bool {
        let token = normalize_token(token);
        if token.is_empty() {
            return false;
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.tokens.remove(&token) {
            return false;
        }
        if token.contains(char::is_whitespace) {
            state.phrases.retain(|p| p != &token);
        }
        true
    }

    /// Replaces the whole token set atomically. Concurrent lookups observe
    /// either the old state or the new one, never a partial rebuild.
    pub fn replace_all<I, S>(&self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let started = Instant::now();
        let mut next = EngineState::default();
        for token in tokens {
            let token = normalize_token(token.as_ref());
            if token.is_empty() || next.tokens.contains(&token) {
                continue;
            }
            if token.contains(char::is_whitespace) {
                next.phrases.push(token.clone());
            }
            next.tokens.insert(token);
        }

        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;

        self.last_reload_nanos
            .store(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.total_reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = EngineState::default();
    }

    pub fn count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tokens
            .len()
    }

    /// Returns the unique trigger tokens found in `text`.
    ///
    /// Pass 1 probes every maximal run of letters, digits, or underscores
    /// against the token set. Pass 2 scans the remaining phrases by
    /// substring, which can over-match inside longer words ("is now" also
    /// hits "this nowhere"); callers accept that.
    pub fn find_triggers(&self, text: &str) -> Vec<String> {
        let started = Instant::now();
        let lower = text.to_lowercase();
        let mut found: Vec<String> = Vec::new();

        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if !state.tokens.is_empty() && !lower.is_empty() {
                for word in lower.split(|c: char| !is_word_char(c)) {
                    if word.is_empty() {
                        continue;
                    }
                    if state.tokens.contains(word) && !found.iter().any(|f| f == word) {
                        found.push(word.to_string());
                    }
                }

                for phrase in &state.phrases {
                    if found.iter().any(|f| f == phrase) {
                        continue;
                    }
                    if lower.contains(phrase.as_str()) {
                        found.push(phrase.clone());
                    }
                }
            }
        }

        if !found.is_empty() {
            self.total_token_hits
                .fetch_add(found.len() as u64, Ordering::Relaxed);
        }
        self.last_lookup_nanos
            .store(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.total_lookups.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            token_count: self.count() as u64,
            last_lookup_nanos: self.last_lookup_nanos.load(Ordering::Relaxed),
            total_lookups: self.total_lookups.load(Ordering::Relaxed),
            total_token_hits: self.total_token_hits.load(Ordering::Relaxed),
            last_reload_nanos: self.last_reload_nanos.load(Ordering::Relaxed),
            total_reloads: self.total_reloads.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn add_remove_branches() {
        let engine = TriggerEngine::new();
        assert!(!engine.add_token("  "), "blank token must be rejected");
        assert!(engine.add_token("hello world"));
        assert!(!engine.add_token("hello world"), "duplicate must be rejected");
        assert!(engine.remove_token("hello world"));
        assert!(!engine.remove_token("hello world"), "missing token must not remove");
        assert_eq!(engine.count(), 0);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let engine = TriggerEngine::new();
        engine.add_token("BaD");
        engine.add_token("buy now");

        let found = engine.find_triggers("This is BAD. Please BUY NOW!");
        assert_eq!(found.len(), 2, "expected both triggers: {found:?}");
        assert!(found.contains(&"bad".to_string()));
        assert!(found.contains(&"buy now".to_string()));
    }

    #[test]
    fn word_probe_requires_exact_runs() {
        let engine = TriggerEngine::new();
        engine.add_token("spam");
        assert!(engine.find_triggers("spammer").is_empty());
        assert_eq!(engine.find_triggers("spam, again"), vec!["spam".to_string()]);
    }

    #[test]
    fn phrase_scan_over_matches_inside_longer_words() {
        let engine = TriggerEngine::new();
        engine.add_token("is now");
        // Documented over-match: the phrase matches as a plain substring.
        assert_eq!(
            engine.find_triggers("this nowhere"),
            vec!["is now".to_string()]
        );
    }

    #[test]
    fn replace_all_dedupes_and_clear_empties() {
        let engine = TriggerEngine::new();
        engine.replace_all(["a", "b", "b", " "]);
        assert_eq!(engine.count(), 2);
        engine.clear();
        assert_eq!(engine.count(), 0);
    }

    #[test]
    fn removing_phrase_keeps_other_phrase_order() {
        let engine = TriggerEngine::new();
        engine.add_token("first phrase");
        engine.add_token("second phrase");
        engine.add_token("third phrase");
        assert!(engine.remove_token("second phrase"));

        let found = engine.find_triggers("first phrase then third phrase");
        assert_eq!(found, vec!["first phrase".to_string(), "third phrase".to_string()]);
    }

    #[test]
    fn empty_inputs_yield_nothing() {
        let engine = TriggerEngine::new();
        assert!(engine.find_triggers("").is_empty());
        engine.add_token("abc");
        assert!(engine.find_triggers("zzz").is_empty());
    }

    #[test]
    fn stats_track_lookups() {
        let engine = TriggerEngine::new();
        engine.add_token("x");
        let _ = engine.find_triggers("x marks the spot");
        let stats = engine.stats();
        assert_eq!(stats.token_count, 1);
        assert_eq!(stats.total_lookups, 1);
        assert_eq!(stats.total_token_hits, 1);
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let engine = Arc::new(TriggerEngine::new());
        engine.add_token("spam");

        let mut handles = Vec::new();
        for _ in 0..100 {
            let engine = Arc::clone(&engine);
            handles.push(std::thread::spawn(move || {
                let _ = engine.find_triggers("SPAM spam");
                let _ = engine.add_token("x");
                let _ = engine.remove_token("x");
            }));
        }
        for handle in handles {
            handle.join().expect("worker panicked");
        }
        assert_eq!(engine.count(), 1);
    }

    #[test]
    fn unicode_words_match() {
        let engine = TriggerEngine::new();
        engine.add_token("Запрещено");
        assert_eq!(
            engine.find_triggers("это ЗАПРЕЩЕНО здесь"),
            vec!["запрещено".to_string()]
        );
    }
}
