use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Control handles for one in-flight run.
#[derive(Debug, Clone)]
pub struct RunControl {
    cancel: CancellationToken,
    pause: Arc<AtomicBool>,
    done: CancellationToken,
}

impl RunControl {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            pause: Arc::new(AtomicBool::new(false)),
            done: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }
}

/// Registry of runs currently executing in this process.
///
/// Each entry lives exactly as long as its [`RunGuard`].
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    runs: Arc<RwLock<HashMap<Uuid, RunControl>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run. Returns `None` if the instance is already running.
    pub fn register(&self, instance_id: Uuid) -> Option<RunGuard> {
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        if runs.contains_key(&instance_id) {
            return None;
        }
        let control = RunControl::new();
        runs.insert(instance_id, control.clone());
        Some(RunGuard {
            registry: self.clone(),
            instance_id,
            control,
        })
    }

    fn get(&self, instance_id: Uuid) -> Option<RunControl> {
        self.runs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&instance_id)
            .cloned()
    }

    pub fn is_running(&self, instance_id: Uuid) -> bool {
        self.get(instance_id).is_some()
    }

    pub fn running_ids(&self) -> Vec<Uuid> {
        self.runs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    /// Ask a running instance to pause at its next layer boundary.
    /// Returns false if the instance is not running here.
    pub fn request_pause(&self, instance_id: Uuid) -> bool {
        match self.get(instance_id) {
            Some(control) => {
                control.request_pause();
                true
            }
            None => false,
        }
    }

    /// Cancel a running instance. Returns false if it is not running here.
    pub fn request_cancel(&self, instance_id: Uuid) -> bool {
        match self.get(instance_id) {
            Some(control) => {
                control.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait until the run finishes. Returns immediately if it is not
    /// running.
    pub async fn wait(&self, instance_id: Uuid) {
        if let Some(control) = self.get(instance_id) {
            control.done.cancelled().await;
        }
    }

    fn remove(&self, instance_id: Uuid) {
        self.runs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&instance_id);
    }
}

/// Keeps a run registered; dropping it deregisters the run and wakes
/// waiters.
#[derive(Debug)]
pub struct RunGuard {
    registry: RunRegistry,
    instance_id: Uuid,
    control: RunControl,
}

impl RunGuard {
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.remove(self.instance_id);
        self.control.done.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_guard_lifecycle() {
        let registry = RunRegistry::new();
        let id = Uuid::new_v4();

        let guard = registry.register(id).unwrap();
        assert!(registry.is_running(id));
        assert!(registry.register(id).is_none());
        assert_eq!(registry.running_ids(), vec![id]);

        drop(guard);
        assert!(!registry.is_running(id));
        assert!(registry.register(id).is_some());
    }

    #[test]
    fn test_requests_reach_control() {
        let registry = RunRegistry::new();
        let id = Uuid::new_v4();
        let guard = registry.register(id).unwrap();

        assert!(registry.request_pause(id));
        assert!(guard.control().is_pause_requested());
        assert!(registry.request_cancel(id));
        assert!(guard.control().is_cancelled());

        assert!(!registry.request_pause(Uuid::new_v4()));
        assert!(!registry.request_cancel(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn test_wait_returns_when_guard_drops() {
        let registry = RunRegistry::new();
        let id = Uuid::new_v4();
        let guard = registry.register(id).unwrap();

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait(id).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        registry.wait(Uuid::new_v4()).await;
    }
}
