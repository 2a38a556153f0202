//! Question answering over a generation backend.
//!
//! A [`QaSession`] builds the backend's index handle once, on first use, and
//! forwards each non-blank question together with that handle.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OnceCell;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("failed to build index handle: {0}")]
    Initialization(String),
    #[error("failed to generate answer: {0}")]
    Generation(String),
}

/// A retrieval-augmented generation service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Whatever the backend needs to answer questions (a vector index, a
    /// client, a search index name).
    type Handle: Send + Sync;

    async fn build_index(&self) -> Result<Self::Handle, BackendError>;

    async fn answer(&self, handle: &Self::Handle, question: &str) -> Result<String, BackendError>;
}

pub struct QaSession<B: GenerationBackend> {
    backend: B,
    handle: OnceCell<B::Handle>,
}

impl<B: GenerationBackend> QaSession<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            handle: OnceCell::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.initialized()
    }

    /// Build the handle if this session has none yet. A failed build is not
    /// cached; the next call tries again.
    pub async fn handle(&self) -> Result<&B::Handle, BackendError> {
        self.handle
            .get_or_try_init(|| async {
                tracing::info!("building answer index handle");
                self.backend.build_index().await
            })
            .await
    }

    /// Answer `question`. A blank question sends nothing and returns `None`.
    pub async fn ask(&self, question: &str) -> Result<Option<String>, BackendError> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(None);
        }
        let handle = self.handle().await?;
        let answer = self.backend.answer(handle, question).await?;
        tracing::debug!(question_len = question.len(), answer_len = answer.len(), "question answered");
        Ok(Some(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct EchoBackend {
        builds: AtomicUsize,
        questions: AtomicUsize,
        fail_builds: AtomicUsize,
    }

    #[async_trait]
    impl GenerationBackend for EchoBackend {
        type Handle = String;

        async fn build_index(&self) -> Result<String, BackendError> {
            if self.fail_builds.load(Ordering::SeqCst) > 0 {
                self.fail_builds.fetch_sub(1, Ordering::SeqCst);
                return Err(BackendError::Initialization("store offline".into()));
            }
            let n = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("hr-index-{n}"))
        }

        async fn answer(&self, handle: &String, question: &str) -> Result<String, BackendError> {
            self.questions.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{handle}: {question}"))
        }
    }

    #[tokio::test]
    async fn handle_is_built_once() {
        let session = QaSession::new(EchoBackend::default());
        assert!(!session.is_initialized());

        let first = session.ask("What is the leave policy?").await.unwrap();
        let second = session.ask("  Who approves expenses? ").await.unwrap();
        assert_eq!(first.as_deref(), Some("hr-index-1: What is the leave policy?"));
        assert_eq!(second.as_deref(), Some("hr-index-1: Who approves expenses?"));
        assert_eq!(session.backend().builds.load(Ordering::SeqCst), 1);
        assert!(session.is_initialized());
    }

    #[tokio::test]
    async fn blank_questions_are_not_sent() {
        let session = QaSession::new(EchoBackend::default());
        assert_eq!(session.ask("").await.unwrap(), None);
        assert_eq!(session.ask("   ").await.unwrap(), None);
        assert_eq!(session.backend().questions.load(Ordering::SeqCst), 0);
        assert!(!session.is_initialized());
    }

    #[tokio::test]
    async fn failed_build_is_retried() {
        let backend = EchoBackend::default();
        backend.fail_builds.store(1, Ordering::SeqCst);
        let session = QaSession::new(backend);

        let err = session.ask("hello").await.unwrap_err();
        assert!(matches!(err, BackendError::Initialization(_)));
        assert!(!session.is_initialized());

        assert_eq!(session.handle().await.unwrap(), "hr-index-1");
    }
}
