//! Placeholder for instances whose construction failed.
//!
//! Every operation logs the original construction error and returns
//! [`ClientError::Unavailable`] naming the instance, so the failure shows up
//! on first use instead of aborting startup.

use std::sync::Arc;

use crate::client::error::{ClientError, ConstructionError};
use crate::client::instrument::ClientKind;
use crate::logging::logger::Logger;
use crate::logging::metadata::Metadata;
use crate::logging::serializers::ERROR_KEY;

#[derive(Clone)]
pub struct FailingClient {
    kind: ClientKind,
    instance: String,
    cause: Arc<ConstructionError>,
    logger: Arc<Logger>,
}

impl FailingClient {
    pub(crate) fn new(
        kind: ClientKind,
        instance: impl Into<String>,
        cause: ConstructionError,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            kind,
            instance: instance.into(),
            cause: Arc::new(cause),
            logger,
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    pub fn cause(&self) -> &ConstructionError {
        &self.cause
    }

    /// Log the construction error and build the error for `operation`.
    pub(crate) async fn fail(&self, operation: &str) -> ClientError {
        let metadata = Metadata::new()
            .with("client", self.kind)
            .with("instance", &self.instance)
            .with("operation", operation)
            .with_shared_error(ERROR_KEY, self.cause.clone());
        self.logger
            .error_with(
                metadata,
                format!("{} client '{}' is unavailable", self.kind, self.instance),
            )
            .await;
        ClientError::Unavailable {
            instance: self.instance.clone(),
            reason: self.cause.to_string(),
        }
    }
}

impl std::fmt::Debug for FailingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailingClient")
            .field("kind", &self.kind)
            .field("instance", &self.instance)
            .field("cause", &self.cause.to_string())
            .finish()
    }
}
