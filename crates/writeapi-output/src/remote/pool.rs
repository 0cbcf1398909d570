//! Per-project client sharing.
//!
//! Sessions for the same project share one [`WriteClient`]. The pool counts leases and
//! closes a client when its last lease is released.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::error::RemoteError;
use super::traits::WriteClient;

/// Opens client connections for a project.
#[async_trait]
pub trait ClientConnector: Send + Sync {
    async fn connect(&self, project: &str) -> Result<Arc<dyn WriteClient>, RemoteError>;
}

struct PooledClient {
    client: Arc<dyn WriteClient>,
    leases: usize,
}

pub struct ConnectionPool {
    connector: Arc<dyn ClientConnector>,
    clients: Mutex<HashMap<String, PooledClient>>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn ClientConnector>) -> Self {
        Self {
            connector,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Lease the client for `project`, connecting if no session holds one yet. The connect
    /// runs outside the pool lock so other projects are not held up behind it.
    pub async fn acquire(self: &Arc<Self>, project: &str) -> Result<ClientLease, RemoteError> {
        if let Some(client) = self.lease_existing(project).await {
            return Ok(self.lease(project, client));
        }

        let fresh = self.connector.connect(project).await?;
        let mut clients = self.clients.lock().await;
        let client = match clients.get_mut(project) {
            Some(pooled) => {
                pooled.leases += 1;
                let shared = Arc::clone(&pooled.client);
                drop(clients);
                debug!(project, "another session connected first; dropping the extra client");
                if let Err(err) = fresh.close().await {
                    warn!(project, error = %err, "closing extra write client");
                }
                shared
            }
            None => {
                debug!(project, "opened write client");
                clients.insert(
                    project.to_string(),
                    PooledClient {
                        client: Arc::clone(&fresh),
                        leases: 1,
                    },
                );
                fresh
            }
        };
        Ok(self.lease(project, client))
    }

    async fn lease_existing(&self, project: &str) -> Option<Arc<dyn WriteClient>> {
        let mut clients = self.clients.lock().await;
        let pooled = clients.get_mut(project)?;
        pooled.leases += 1;
        Some(Arc::clone(&pooled.client))
    }

    fn lease(self: &Arc<Self>, project: &str, client: Arc<dyn WriteClient>) -> ClientLease {
        ClientLease {
            pool: Arc::clone(self),
            project: project.to_string(),
            client,
        }
    }

    /// Number of projects with a live client.
    pub async fn active_clients(&self) -> usize {
        self.clients.lock().await.len()
    }

    async fn release(&self, project: &str) -> Result<(), RemoteError> {
        let retired = {
            let mut clients = self.clients.lock().await;
            match clients.get_mut(project) {
                Some(pooled) if pooled.leases > 1 => {
                    pooled.leases -= 1;
                    None
                }
                Some(_) => clients.remove(project).map(|pooled| pooled.client),
                None => {
                    warn!(project, "released a client lease the pool does not know");
                    None
                }
            }
        };
        if let Some(client) = retired {
            debug!(project, "closing write client");
            client.close().await?;
        }
        Ok(())
    }
}

/// One session's share of a pooled client. Give it back with [`ClientLease::release`].
pub struct ClientLease {
    pool: Arc<ConnectionPool>,
    project: String,
    client: Arc<dyn WriteClient>,
}

impl ClientLease {
    pub fn client(&self) -> &Arc<dyn WriteClient> {
        &self.client
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Return the lease; closes the client if this was the last one.
    pub async fn release(self) -> Result<(), RemoteError> {
        self.pool.release(&self.project).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryWriteService;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Holds connects for `gated` projects until permits are added.
    struct GatedConnector {
        inner: MemoryWriteService,
        gated: &'static str,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl ClientConnector for GatedConnector {
        async fn connect(&self, project: &str) -> Result<Arc<dyn WriteClient>, RemoteError> {
            if project == self.gated {
                self.gate.acquire().await.expect("gate open").forget();
            }
            self.inner.connect(project).await
        }
    }

    fn gated_pool(service: &MemoryWriteService) -> (Arc<ConnectionPool>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let connector = GatedConnector {
            inner: service.clone(),
            gated: "slow",
            gate: Arc::clone(&gate),
        };
        (Arc::new(ConnectionPool::new(Arc::new(connector))), gate)
    }

    async fn let_tasks_run() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn shares_one_client_per_project() {
        let service = MemoryWriteService::new();
        let pool = Arc::new(ConnectionPool::new(Arc::new(service.clone())));

        let a = pool.acquire("p1").await.unwrap();
        let b = pool.acquire("p1").await.unwrap();
        let c = pool.acquire("p2").await.unwrap();
        assert_eq!(service.connects(), 2);
        assert!(Arc::ptr_eq(a.client(), b.client()));
        assert_eq!(pool.active_clients().await, 2);

        a.release().await.unwrap();
        assert_eq!(service.client_closes(), 0);
        b.release().await.unwrap();
        assert_eq!(service.client_closes(), 1);
        c.release().await.unwrap();
        assert_eq!(service.client_closes(), 2);
        assert_eq!(pool.active_clients().await, 0);
    }

    #[tokio::test]
    async fn reconnects_after_last_release() {
        let service = MemoryWriteService::new();
        let pool = Arc::new(ConnectionPool::new(Arc::new(service.clone())));
        pool.acquire("p").await.unwrap().release().await.unwrap();
        let lease = pool.acquire("p").await.unwrap();
        assert_eq!(service.connects(), 2);
        lease.release().await.unwrap();
    }

    #[tokio::test]
    async fn slow_connect_does_not_block_other_projects() {
        let service = MemoryWriteService::new();
        let (pool, gate) = gated_pool(&service);

        let slow = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.acquire("slow").await }
        });
        let_tasks_run().await;

        let fast = tokio::time::timeout(Duration::from_secs(5), pool.acquire("fast"))
            .await
            .expect("acquire for another project waited on the slow connect")
            .unwrap();
        assert_eq!(fast.project(), "fast");

        gate.add_permits(1);
        let slow = slow.await.unwrap().unwrap();
        assert_eq!(pool.active_clients().await, 2);
        slow.release().await.unwrap();
        fast.release().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_connects_for_one_project_share_a_client() {
        let service = MemoryWriteService::new();
        let (pool, gate) = gated_pool(&service);

        let first = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.acquire("slow").await }
        });
        let second = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.acquire("slow").await }
        });
        let_tasks_run().await;
        gate.add_permits(2);

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(first.client(), second.client()));
        assert_eq!(service.connects(), 2);
        assert_eq!(service.client_closes(), 1);
        assert_eq!(pool.active_clients().await, 1);

        first.release().await.unwrap();
        second.release().await.unwrap();
        assert_eq!(service.client_closes(), 2);
    }
}
