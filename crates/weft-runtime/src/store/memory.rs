use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;
use weft_core::{
    InstanceSnapshot, InstanceStore, Result, StoreFuture, WorkflowInstance, WorkflowStatus,
};

/// Process-local instance store.
///
/// Instances are held as snapshots and restored through the validated
/// snapshot path on every read, just as a durable store would.
#[derive(Debug, Default)]
pub struct InMemoryInstanceStore {
    instances: RwLock<HashMap<Uuid, InstanceSnapshot>>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn find_where<F>(&self, predicate: F) -> Result<Vec<WorkflowInstance>>
    where
        F: Fn(&InstanceSnapshot) -> bool,
    {
        let instances = self.instances.read().await;
        let mut matching: Vec<&InstanceSnapshot> =
            instances.values().filter(|s| predicate(s)).collect();
        matching.sort_by_key(|s| (s.created_at, s.id));
        matching
            .into_iter()
            .map(|s| WorkflowInstance::from_snapshot(s.clone()))
            .collect()
    }
}

impl InstanceStore for InMemoryInstanceStore {
    fn save<'a>(&'a self, instance: &'a WorkflowInstance) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let snapshot = instance.to_snapshot();
            self.instances.write().await.insert(snapshot.id, snapshot);
            Ok(())
        })
    }

    fn find_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<WorkflowInstance>> {
        Box::pin(async move {
            let snapshot = self.instances.read().await.get(&id).cloned();
            snapshot.map(WorkflowInstance::from_snapshot).transpose()
        })
    }

    fn find_by_workflow_name<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Vec<WorkflowInstance>> {
        Box::pin(async move { self.find_where(|s| s.workflow_name == name).await })
    }

    fn find_by_status(&self, status: WorkflowStatus) -> StoreFuture<'_, Vec<WorkflowInstance>> {
        Box::pin(async move { self.find_where(|s| s.status == status).await })
    }

    fn delete_by_id(&self, id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(async move { Ok(self.instances.write().await.remove(&id).is_some()) })
    }

    fn exists_by_id(&self, id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(async move { Ok(self.instances.read().await.contains_key(&id)) })
    }

    fn count(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move { Ok(self.instances.read().await.len() as u64) })
    }

    fn count_by_status(&self, status: WorkflowStatus) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let instances = self.instances.read().await;
            Ok(instances.values().filter(|s| s.status == status).count() as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use weft_core::WorkflowContext;

    use super::*;

    fn instance(name: &str) -> WorkflowInstance {
        WorkflowInstance::new(name, WorkflowContext::new().put("user", 7u32).unwrap())
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let store = InMemoryInstanceStore::new();
        let mut instance = instance("ingest");
        store.save(&instance).await.unwrap();

        instance.start().unwrap();
        store.save(&instance).await.unwrap();

        let found = store.find_by_id(instance.id()).await.unwrap().unwrap();
        assert_eq!(found, instance);
        assert_eq!(found.context().get::<u32>("user").unwrap(), Some(7));
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queries() {
        let store = InMemoryInstanceStore::new();
        let a = instance("ingest");
        let mut b = instance("ingest");
        let c = instance("report");
        b.start().unwrap();
        for i in [&a, &b, &c] {
            store.save(i).await.unwrap();
        }

        let ingest = store.find_by_workflow_name("ingest").await.unwrap();
        assert_eq!(ingest.len(), 2);
        assert!(ingest.iter().all(|i| i.workflow_name() == "ingest"));

        let running = store.find_by_status(WorkflowStatus::Running).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id(), b.id());

        assert_eq!(store.count_by_status(WorkflowStatus::Pending).await.unwrap(), 2);
        assert!(store.exists_by_id(c.id()).await.unwrap());
        assert!(store.delete_by_id(c.id()).await.unwrap());
        assert!(!store.delete_by_id(c.id()).await.unwrap());
        assert!(!store.exists_by_id(c.id()).await.unwrap());
    }
}
