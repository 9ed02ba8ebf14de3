use std::future::Future;
use std::pin::Pin;

use uuid::Uuid;

use crate::error::Result;
use crate::workflow::{WorkflowInstance, WorkflowStatus};

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Persistence port for workflow instances.
///
/// The engine saves after starting, after every layer, on completion, on
/// failure and after compensation. Implementations live in the runtime
/// crate; this trait keeps the engine independent of any storage backend.
pub trait InstanceStore: Send + Sync {
    /// Insert or replace an instance.
    fn save<'a>(&'a self, instance: &'a WorkflowInstance) -> StoreFuture<'a, ()>;

    fn find_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<WorkflowInstance>>;

    fn find_by_workflow_name<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Vec<WorkflowInstance>>;

    fn find_by_status(&self, status: WorkflowStatus) -> StoreFuture<'_, Vec<WorkflowInstance>>;

    /// Returns whether an instance was removed.
    fn delete_by_id(&self, id: Uuid) -> StoreFuture<'_, bool>;

    fn exists_by_id(&self, id: Uuid) -> StoreFuture<'_, bool>;

    fn count(&self) -> StoreFuture<'_, u64>;

    fn count_by_status(&self, status: WorkflowStatus) -> StoreFuture<'_, u64>;
}
