use async_trait::async_trait;

/// The text-generation capability consumed by AI workflow steps.
///
/// Provider selection, credentials and transport live behind this trait.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Return the model's completion for `prompt`.
    async fn generate_text(&self, prompt: &str, model: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("provider timed out")]
    Timeout,
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl LlmError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Provider(_) | LlmError::Timeout | LlmError::RateLimited(_)
        )
    }
}
