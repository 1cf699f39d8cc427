pub mod openai;

use thiserror::Error;

pub use openai::{OpenAiBackend, OpenAiSettings};

/// One completion call: a system instruction plus the composed user document.
#[derive(Clone, Copy, Debug)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub user: &'a str,
    pub model: &'a str,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("network: {0}")]
    Network(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// A text-completion service. Implementations block until the reply (or a failure) arrives
/// and enforce their own request timeout.
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &str;

    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, BackendError>;
}

impl<B: CompletionBackend + ?Sized> CompletionBackend for &B {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, BackendError> {
        (**self).complete(request)
    }
}

impl<B: CompletionBackend + ?Sized> CompletionBackend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, BackendError> {
        (**self).complete(request)
    }
}
