//! Task Descriptor Resolver (spec §4.B): turns a qualified task name into
//! the descriptor the rest of the pipeline operates on.

use pta_transport::{HttpTransport, TaskListEntry, TaskServerClient, TransportError};
use thiserror::Error;

use crate::model::TaskDescriptor;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("error fetching task metadata: {0}")]
    Transport(#[from] TransportError),
    #[error("task metadata did not match the expected descriptor shape: {0}")]
    MalformedDescriptor(#[from] serde_json::Error),
}

/// Resolves qualified task names to descriptors and enumerates tasks
/// published by an environment, on top of a `TaskServerClient`.
pub struct TaskResolver<T: HttpTransport> {
    client: TaskServerClient<T>,
}

impl<T: HttpTransport> TaskResolver<T> {
    pub fn new(client: TaskServerClient<T>) -> Self {
        Self { client }
    }

    /// Fetch and parse the descriptor for `qname` in `environment`.
    pub async fn resolve(&self, qname: &str, environment: &str) -> Result<TaskDescriptor, ResolverError> {
        let raw = self.client.metadata(qname, environment).await?;
        Ok(serde_json::from_value(raw)?)
    }

    pub async fn list(&self, environment: &str) -> Result<Vec<TaskListEntry>, ResolverError> {
        Ok(self.client.list(environment).await?)
    }
}
