use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};

use crate::error::{Error, Result};
use crate::lord::coordinator::JobCoordinator;
use crate::lord::proxy::VassalLink;

struct Vassals {
    by_id: HashMap<u64, Arc<dyn VassalLink>>,
    /// Registration order, for picking job participants deterministically.
    order: Vec<u64>,
}

/// All vassals known to this lord. Registration is idempotent by id.
pub struct VassalRegistry {
    inner: RwLock<Vassals>,
    count_tx: watch::Sender<usize>,
}

impl Default for VassalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VassalRegistry {
    pub fn new() -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            inner: RwLock::new(Vassals {
                by_id: HashMap::new(),
                order: Vec::new(),
            }),
            count_tx,
        }
    }

    /// Adds a vassal. A duplicate id is logged and ignored. Every
    /// successful registration bumps the count channel, waking quorum
    /// waiters.
    pub async fn register(&self, vassal: Arc<dyn VassalLink>) -> bool {
        let id = vassal.vassal_id();
        let mut inner = self.inner.write().await;
        if inner.by_id.contains_key(&id) {
            tracing::warn!(vassal_id = id, "Vassal already registered");
            return false;
        }
        tracing::info!(vassal_id = id, "Registering vassal");
        inner.by_id.insert(id, vassal);
        inner.order.push(id);
        let count = inner.order.len();
        drop(inner);
        let _ = self.count_tx.send(count);
        true
    }

    pub async fn get(&self, vassal_id: u64) -> Result<Arc<dyn VassalLink>> {
        self.inner
            .read()
            .await
            .by_id
            .get(&vassal_id)
            .cloned()
            .ok_or(Error::VassalNotFound(vassal_id))
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.order.len()
    }

    /// Watches the registered-vassal count. Replaces polling a condition
    /// variable: the receiver resolves on every registration.
    pub fn subscribe_count(&self) -> watch::Receiver<usize> {
        self.count_tx.subscribe()
    }

    /// The first `n` vassals in registration order.
    pub async fn first_n(&self, n: usize) -> Vec<Arc<dyn VassalLink>> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .take(n)
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect()
    }
}

/// All live jobs on this lord, keyed by job id.
pub struct JobRegistry {
    jobs: RwLock<HashMap<u64, Arc<JobCoordinator>>>,
    next_job_id: AtomicU64,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            next_job_id: AtomicU64::new(0),
        }
    }

    pub fn allocate_id(&self) -> u64 {
        self.next_job_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn insert(&self, coordinator: Arc<JobCoordinator>) {
        let job_id = coordinator.job_id();
        let mut jobs = self.jobs.write().await;
        if jobs.insert(job_id, coordinator).is_some() {
            tracing::warn!(job_id, "Replaced an existing coordinator for job id");
        }
    }

    pub async fn get(&self, job_id: u64) -> Result<Arc<JobCoordinator>> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(Error::JobNotFound(job_id))
    }

    /// Tears a finished job down. Callers that keep a handle can still use
    /// it; the registry just stops routing RPCs to it.
    pub async fn remove(&self, job_id: u64) -> Option<Arc<JobCoordinator>> {
        self.jobs.write().await.remove(&job_id)
    }
}
