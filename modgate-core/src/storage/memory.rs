use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use modgate_common::error::Result;
use modgate_common::traits::TokenStorage;

/// In-memory token store, mainly for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashSet<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: RwLock::new(tokens.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl TokenStorage for MemoryTokenStore {
    async fn add_token(&self, token: &str) -> Result<()> {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.to_string());
        Ok(())
    }

    async fn remove_token(&self, token: &str) -> Result<()> {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
        Ok(())
    }

    async fn get_tokens(&self) -> Result<Vec<String>> {
        Ok(self
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect())
    }

    async fn token_exists(&self, token: &str) -> Result<bool> {
        Ok(self
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(token))
    }
}
