//! Bounded client pool.
//!
//! Subagents each get their own scoped protocol client, but the number
//! of simultaneously open connections is capped: checkout acquires a
//! semaphore permit before dialing, and the permit is released when the
//! pooled client drops (which also closes its connection).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::client::RpcClient;
use crate::errors::RpcError;

/// Dials new connections to the backend.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh connection and hand back a running client.
    async fn connect(&self) -> Result<Arc<RpcClient>, RpcError>;
}

/// A checkout from the pool. Derefs to the client; dropping it closes
/// the connection and releases the pool slot.
pub struct PooledClient {
    client: Arc<RpcClient>,
    _permit: OwnedSemaphorePermit,
}

impl PooledClient {
    /// The underlying client handle.
    #[must_use]
    pub fn client(&self) -> &Arc<RpcClient> {
        &self.client
    }
}

impl std::fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledClient")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl std::ops::Deref for PooledClient {
    type Target = RpcClient;
    fn deref(&self) -> &RpcClient {
        &self.client
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        self.client.close();
    }
}

/// Bounded pool of protocol clients.
pub struct ClientPool {
    connector: Arc<dyn Connector>,
    permits: Arc<Semaphore>,
    max_clients: usize,
}

impl ClientPool {
    /// Create a pool that allows at most `max_clients` live connections.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, max_clients: usize) -> Self {
        let max_clients = max_clients.max(1);
        Self {
            connector,
            permits: Arc::new(Semaphore::new(max_clients)),
            max_clients,
        }
    }

    /// Open a pooled connection, waiting for a free slot if the pool is
    /// at capacity.
    pub async fn checkout(&self) -> Result<PooledClient, RpcError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RpcError::PoolClosed)?;
        debug!(available = self.permits.available_permits(), "pool checkout");
        let client = self.connector.connect().await?;
        Ok(PooledClient {
            client,
            _permit: permit,
        })
    }

    /// Stop handing out connections. In-flight checkouts keep working.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_clients
    }

    /// Currently free slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::NullToolHandler;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Connector backed by in-memory duplex pipes; the far ends are
    /// dropped, which is fine for tests that never do I/O.
    struct DuplexConnector {
        dialed: AtomicUsize,
    }

    impl DuplexConnector {
        fn new() -> Self {
            Self {
                dialed: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Connector for DuplexConnector {
        async fn connect(&self) -> Result<Arc<RpcClient>, RpcError> {
            let _ = self.dialed.fetch_add(1, Ordering::SeqCst);
            let (near, _far) = tokio::io::duplex(1024);
            Ok(RpcClient::connect(near, Arc::new(NullToolHandler)))
        }
    }

    #[tokio::test]
    async fn checkout_dials_and_releases_on_drop() {
        let connector = Arc::new(DuplexConnector::new());
        let pool = ClientPool::new(connector.clone(), 2);

        let first = pool.checkout().await.unwrap();
        assert_eq!(pool.available(), 1);
        drop(first);
        assert_eq!(pool.available(), 2);
        assert_eq!(connector.dialed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pool_blocks_at_capacity() {
        let pool = Arc::new(ClientPool::new(Arc::new(DuplexConnector::new()), 1));
        let held = pool.checkout().await.unwrap();

        let waiter = tokio::spawn({
            let pool = pool.clone();
            async move { pool.checkout().await }
        });

        // The waiter cannot proceed until the held client drops.
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn shutdown_rejects_new_checkouts() {
        let pool = ClientPool::new(Arc::new(DuplexConnector::new()), 2);
        pool.shutdown();
        assert_matches!(pool.checkout().await, Err(RpcError::PoolClosed));
    }

    #[tokio::test]
    async fn dropping_pooled_client_closes_connection() {
        let pool = ClientPool::new(Arc::new(DuplexConnector::new()), 1);
        let pooled = pool.checkout().await.unwrap();
        let client = pooled.client().clone();
        drop(pooled);
        assert!(client.is_closed());
    }
}
