//! Generator wrappers: response caching and fixed-output stand-ins.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::cache::{cache_key, ResponseCache};
use crate::provider::{LlmError, TextGenerator};

/// Serve repeated prompts from a [`ResponseCache`] before calling `inner`.
///
/// Only successful responses are cached.
pub struct CachedGenerator<G> {
    inner: G,
    cache: Arc<dyn ResponseCache>,
}

impl<G: TextGenerator> CachedGenerator<G> {
    pub fn new(inner: G, cache: Arc<dyn ResponseCache>) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

#[async_trait]
impl<G: TextGenerator> TextGenerator for CachedGenerator<G> {
    async fn generate_text(&self, prompt: &str, model: &str) -> Result<String, LlmError> {
        let key = cache_key(model, prompt);
        if let Some(hit) = self.cache.get(&key) {
            debug!(model, "ai response served from cache");
            return Ok(hit);
        }
        let response = self.inner.generate_text(prompt, model).await?;
        self.cache.put(key, response.clone());
        Ok(response)
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Fixed(String),
    Echo,
    Fail(LlmError),
}

/// Deterministic generator for local runs and tests.
#[derive(Debug)]
pub struct StaticGenerator {
    reply: Reply,
    calls: AtomicUsize,
}

impl StaticGenerator {
    /// Always answer with `response`.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::with_reply(Reply::Fixed(response.into()))
    }

    /// Answer with the prompt itself.
    pub fn echo() -> Self {
        Self::with_reply(Reply::Echo)
    }

    /// Always fail with `error`.
    pub fn failing(error: LlmError) -> Self {
        Self::with_reply(Reply::Fail(error))
    }

    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `generate_text` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for StaticGenerator {
    async fn generate_text(&self, prompt: &str, _model: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Reply::Fixed(text) => Ok(text.clone()),
            Reply::Echo => Ok(prompt.to_string()),
            Reply::Fail(err) => Err(err.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::LruResponseCache;

    #[tokio::test]
    async fn repeated_prompt_hits_cache() {
        let cache = Arc::new(LruResponseCache::new(8, Duration::from_secs(60)));
        let gen = CachedGenerator::new(StaticGenerator::echo(), cache.clone());

        assert_eq!(gen.generate_text("hello", "m").await.unwrap(), "hello");
        assert_eq!(gen.generate_text("hello", "m").await.unwrap(), "hello");
        assert_eq!(gen.inner().calls(), 1);

        gen.generate_text("hello", "other-model").await.unwrap();
        assert_eq!(gen.inner().calls(), 2);
        assert_eq!(cache.hits(), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = Arc::new(LruResponseCache::new(8, Duration::from_secs(60)));
        let gen = CachedGenerator::new(
            StaticGenerator::failing(LlmError::Timeout),
            cache.clone(),
        );

        assert_eq!(gen.generate_text("p", "m").await, Err(LlmError::Timeout));
        assert_eq!(gen.generate_text("p", "m").await, Err(LlmError::Timeout));
        assert_eq!(gen.inner().calls(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn retryable_classification() {
        assert!(LlmError::Timeout.is_retryable());
        assert!(LlmError::Provider("503".into()).is_retryable());
        assert!(!LlmError::NotConfigured("no key".into()).is_retryable());
    }
}
