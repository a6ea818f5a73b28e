//! The [`Backend`] trait every model backend implements.
//!
//! The gateway never speaks a vendor protocol itself. A backend exposes its
//! static [`BackendDescriptor`], executes one-shot generations, and may
//! stream chunks and answer out-of-band health checks.

use async_trait::async_trait;
use tokio::sync::mpsc;

use relaygate_types::{
    BackendDescriptor, Credential, GenerationRequest, GenerationResponse, HealthCheckResult,
    StreamChunk,
};

use crate::error::BackendError;

/// A model backend the gateway can route to.
///
/// # Example
///
/// ```rust,ignore
/// use relaygate_core::{Backend, BackendError};
///
/// struct Echo(BackendDescriptor);
///
/// #[async_trait]
/// impl Backend for Echo {
///     fn descriptor(&self) -> &BackendDescriptor { &self.0 }
///
///     async fn execute(&self, req: &GenerationRequest, _: Option<&Credential>)
///         -> Result<GenerationResponse, BackendError>
///     {
///         Ok(GenerationResponse::text(&self.0.id, req.prompt.clone()))
///     }
/// }
/// ```
#[async_trait]
pub trait Backend: Send + Sync {
    /// Static description: id, capabilities, cost and declared latency.
    fn descriptor(&self) -> &BackendDescriptor;

    /// Shorthand for `descriptor().id`.
    fn id(&self) -> &str {
        &self.descriptor().id
    }

    /// Execute a one-shot generation.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] whose `retryable` flag tells the executor
    /// whether another attempt may succeed.
    async fn execute(
        &self,
        request: &GenerationRequest,
        credential: Option<&Credential>,
    ) -> Result<GenerationResponse, BackendError>;

    /// Stream a generation, sending chunks through `tx`.
    ///
    /// The default implementation runs [`execute`](Backend::execute) and
    /// emits the whole response as a single delta followed by `Done`.
    async fn stream(
        &self,
        request: &GenerationRequest,
        credential: Option<&Credential>,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<(), BackendError> {
        let response = self.execute(request, credential).await?;
        let backend = response.backend.clone();
        if tx
            .send(StreamChunk::text(backend.clone(), response.content))
            .await
            .is_err()
        {
            return Ok(());
        }
        let _ = tx
            .send(StreamChunk::Done {
                backend,
                finish_reason: response.finish_reason,
                usage: response.usage,
            })
            .await;
        Ok(())
    }

    /// Whether [`health_check`](Backend::health_check) does anything useful.
    fn supports_health_check(&self) -> bool {
        false
    }

    /// Probe the backend out of band.
    async fn health_check(&self) -> HealthCheckResult {
        HealthCheckResult::unknown()
    }
}

/// A backend known only by its descriptor.
///
/// Used for dry-run routing from a config file: it participates in routing
/// decisions but refuses to execute.
#[derive(Debug, Clone)]
pub struct DescriptorOnly {
    descriptor: BackendDescriptor,
}

impl DescriptorOnly {
    pub fn new(descriptor: BackendDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl Backend for DescriptorOnly {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        _request: &GenerationRequest,
        _credential: Option<&Credential>,
    ) -> Result<GenerationResponse, BackendError> {
        Err(BackendError::fatal(
            "not_executable",
            format!("backend {} is declared for routing only", self.descriptor.id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use relaygate_types::Capability;

    use super::*;

    struct Echo(BackendDescriptor);

    #[async_trait]
    impl Backend for Echo {
        fn descriptor(&self) -> &BackendDescriptor {
            &self.0
        }

        async fn execute(
            &self,
            request: &GenerationRequest,
            _credential: Option<&Credential>,
        ) -> Result<GenerationResponse, BackendError> {
            Ok(GenerationResponse::text(&self.0.id, request.prompt.clone()))
        }
    }

    #[tokio::test]
    async fn default_stream_emits_delta_then_done() {
        let backend = Echo(BackendDescriptor::new("echo", [Capability::Streaming]));
        let (tx, mut rx) = mpsc::channel(4);
        backend
            .stream(&GenerationRequest::new("hi there"), None, tx)
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first, StreamChunk::text("echo", "hi there"));
        let second = rx.recv().await.unwrap();
        assert!(second.is_done());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn default_health_check_is_unknown() {
        let backend = Echo(BackendDescriptor::new("echo", []));
        assert!(!backend.supports_health_check());
        assert_eq!(
            backend.health_check().await.status,
            relaygate_types::HealthStatus::Unknown
        );
        assert_eq!(backend.id(), "echo");
    }

    #[tokio::test]
    async fn descriptor_only_refuses_to_execute() {
        let backend = DescriptorOnly::new(BackendDescriptor::new("dry", []));
        let err = backend
            .execute(&GenerationRequest::new("x"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, "not_executable");
        assert!(!err.retryable);
    }
}
