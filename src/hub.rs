use crate::error::{Result, SkywatchError};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifier for a connected client within one hub.
pub type ClientId = u64;

/// A freshly registered client: its id plus the receiving end of its bounded
/// outbound queue. The hub keeps the sending end; dropping a client from the
/// registry closes the queue and signals the connection's writer task to
/// exit.
pub struct RegisteredClient {
    pub id: ClientId,
    pub receiver: mpsc::Receiver<Bytes>,
}

struct ClientEntry {
    sender: mpsc::Sender<Bytes>,
    key: Option<Uuid>,
}

impl ClientEntry {
    fn matches(&self, key: Option<Uuid>) -> bool {
        match key {
            // Un-keyed broadcasts go to every client
            None => true,
            Some(key) => self.key == Some(key),
        }
    }
}

enum HubCommand {
    Register {
        key: Option<Uuid>,
        reply: oneshot::Sender<RegisteredClient>,
    },
    Unregister {
        id: ClientId,
    },
    Broadcast {
        payload: Bytes,
        key: Option<Uuid>,
    },
    Shutdown,
}

/// Handle to a fan-out hub.
///
/// One hub implementation serves all three deployments: the detection hub
/// routes by camera id, the video and attack hubs broadcast to everyone. All
/// registry mutation is serialized through a single worker task; this handle
/// only posts control events and reads the registry for diagnostics.
#[derive(Clone)]
pub struct Hub {
    name: String,
    control: mpsc::Sender<HubCommand>,
    registry: Arc<RwLock<HashMap<ClientId, ClientEntry>>>,
}

impl Hub {
    /// Spawn a hub worker and return a cloneable handle to it.
    ///
    /// `client_queue_capacity` bounds each client's outbound queue;
    /// `control_queue_capacity` bounds the worker's control channel, which
    /// only carries control events and should be sized generously.
    pub fn spawn(
        name: impl Into<String>,
        client_queue_capacity: usize,
        control_queue_capacity: usize,
    ) -> Self {
        let name = name.into();
        let registry = Arc::new(RwLock::new(HashMap::new()));
        let (control, commands) = mpsc::channel(control_queue_capacity);

        let worker = HubWorker {
            name: name.clone(),
            registry: Arc::clone(&registry),
            client_queue_capacity,
            next_id: 0,
        };
        tokio::spawn(worker.run(commands));

        Self {
            name,
            control,
            registry,
        }
    }

    /// Register a new client, optionally bound to a routing key.
    ///
    /// Completes once the worker has added the client, so every subsequent
    /// broadcast is visible to it.
    pub async fn register(&self, key: Option<Uuid>) -> Result<RegisteredClient> {
        let (reply, registered) = oneshot::channel();
        self.control
            .send(HubCommand::Register { key, reply })
            .await
            .map_err(|_| SkywatchError::hub(format!("{} hub is not running", self.name)))?;

        registered
            .await
            .map_err(|_| SkywatchError::hub(format!("{} hub dropped registration", self.name)))
    }

    /// Remove a client and close its outbound queue. Idempotent.
    pub async fn unregister(&self, id: ClientId) {
        if self.control.send(HubCommand::Unregister { id }).await.is_err() {
            debug!("{} hub already stopped, unregister({}) ignored", self.name, id);
        }
    }

    /// Fan a payload out to matching clients.
    ///
    /// A `None` key reaches every client; a `Some` key reaches only clients
    /// registered with that key. Delivery to each client is a non-blocking
    /// enqueue; clients with a full queue are disconnected instead of
    /// stalling the hub.
    pub async fn broadcast(&self, payload: Bytes, key: Option<Uuid>) -> Result<()> {
        self.control
            .send(HubCommand::Broadcast { payload, key })
            .await
            .map_err(|_| SkywatchError::hub(format!("{} hub is not running", self.name)))
    }

    /// Serialize a value to JSON and broadcast it.
    pub async fn broadcast_json<T: Serialize>(&self, value: &T, key: Option<Uuid>) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.broadcast(Bytes::from(payload), key).await
    }

    /// Stop the worker and close every client queue.
    pub async fn shutdown(&self) {
        let _ = self.control.send(HubCommand::Shutdown).await;
    }

    /// Number of currently connected clients. Diagnostics only.
    pub async fn client_count(&self) -> usize {
        self.registry.read().await.len()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Sequential worker owning all registry mutation for one hub.
struct HubWorker {
    name: String,
    registry: Arc<RwLock<HashMap<ClientId, ClientEntry>>>,
    client_queue_capacity: usize,
    next_id: ClientId,
}

impl HubWorker {
    async fn run(mut self, mut commands: mpsc::Receiver<HubCommand>) {
        debug!("{} hub worker started", self.name);

        while let Some(command) = commands.recv().await {
            match command {
                HubCommand::Register { key, reply } => self.add_client(key, reply).await,
                HubCommand::Unregister { id } => self.remove_client(id).await,
                HubCommand::Broadcast { payload, key } => self.dispatch(payload, key).await,
                HubCommand::Shutdown => break,
            }
        }

        let mut registry = self.registry.write().await;
        let remaining = registry.len();
        registry.clear();
        debug!(
            "{} hub worker stopped, closed {} client queues",
            self.name, remaining
        );
    }

    async fn add_client(&mut self, key: Option<Uuid>, reply: oneshot::Sender<RegisteredClient>) {
        let id = self.next_id;
        self.next_id += 1;

        let (sender, receiver) = mpsc::channel(self.client_queue_capacity);

        let mut registry = self.registry.write().await;
        registry.insert(id, ClientEntry { sender, key });
        let total = registry.len();
        drop(registry);

        if reply.send(RegisteredClient { id, receiver }).is_err() {
            // Caller went away before registration completed
            self.remove_client(id).await;
            return;
        }

        match key {
            Some(key) => info!(
                "{} client connected. Key: {}. Total clients: {}",
                self.name, key, total
            ),
            None => info!("{} client connected. Total clients: {}", self.name, total),
        }
    }

    async fn remove_client(&mut self, id: ClientId) {
        let mut registry = self.registry.write().await;
        if registry.remove(&id).is_some() {
            info!(
                "{} client disconnected. Total clients: {}",
                self.name,
                registry.len()
            );
        }
    }

    async fn dispatch(&mut self, payload: Bytes, key: Option<Uuid>) {
        let mut dropped = Vec::new();

        {
            let registry = self.registry.read().await;
            if registry.is_empty() {
                return;
            }

            for (id, entry) in registry.iter() {
                if !entry.matches(key) {
                    continue;
                }

                match entry.sender.try_send(payload.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            "{} client {} queue full, scheduling disconnect",
                            self.name, id
                        );
                        dropped.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => dropped.push(*id),
                }
            }
        }

        // The read lock is released before the registry is mutated; drop
        // candidates retire through the worker's own serialized path.
        for id in dropped {
            self.remove_client(id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(text: &str) -> Bytes {
        Bytes::copy_from_slice(text.as_bytes())
    }

    #[tokio::test]
    async fn test_register_unregister_net_effect() {
        let hub = Hub::spawn("test", 8, 32);

        let a = hub.register(None).await.unwrap();
        let b = hub.register(None).await.unwrap();
        assert_eq!(hub.client_count().await, 2);

        hub.unregister(a.id).await;
        // Duplicate unregister is a no-op
        hub.unregister(a.id).await;

        // Registration acts as an ordering barrier for prior commands
        let c = hub.register(None).await.unwrap();
        assert_eq!(hub.client_count().await, 2);

        hub.unregister(b.id).await;
        hub.unregister(c.id).await;
        let d = hub.register(None).await.unwrap();
        assert_eq!(hub.client_count().await, 1);
        drop(d);
    }

    #[tokio::test]
    async fn test_keyed_broadcast_reaches_only_matching_clients() {
        let hub = Hub::spawn("detect", 8, 32);
        let key_a = Uuid::new_v4();
        let key_b = Uuid::new_v4();

        let mut a1 = hub.register(Some(key_a)).await.unwrap();
        let mut a2 = hub.register(Some(key_a)).await.unwrap();
        let mut b = hub.register(Some(key_b)).await.unwrap();

        hub.broadcast(payload("for-a"), Some(key_a)).await.unwrap();

        assert_eq!(a1.receiver.recv().await.unwrap(), payload("for-a"));
        assert_eq!(a2.receiver.recv().await.unwrap(), payload("for-a"));

        // Barrier, then confirm the non-matching client saw nothing
        let _barrier = hub.register(None).await.unwrap();
        assert!(b.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unkeyed_broadcast_reaches_all_clients() {
        let hub = Hub::spawn("video", 8, 32);

        let mut first = hub.register(None).await.unwrap();
        let mut second = hub.register(None).await.unwrap();

        hub.broadcast(payload("frame"), None).await.unwrap();

        assert_eq!(first.receiver.recv().await.unwrap(), payload("frame"));
        assert_eq!(second.receiver.recv().await.unwrap(), payload("frame"));
    }

    #[tokio::test]
    async fn test_slow_client_is_dropped_on_saturation() {
        let hub = Hub::spawn("video", 2, 32);

        let mut slow = hub.register(None).await.unwrap();

        hub.broadcast(payload("one"), None).await.unwrap();
        hub.broadcast(payload("two"), None).await.unwrap();
        // Queue is full; this broadcast disconnects the client instead
        hub.broadcast(payload("three"), None).await.unwrap();

        let _barrier = hub.register(None).await.unwrap();
        assert_eq!(hub.client_count().await, 1);

        assert_eq!(slow.receiver.recv().await.unwrap(), payload("one"));
        assert_eq!(slow.receiver.recv().await.unwrap(), payload("two"));
        // Queue was closed on disconnect; "three" never arrives
        assert!(slow.receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_on_empty_hub_is_noop() {
        let hub = Hub::spawn("empty", 8, 32);
        hub.broadcast(payload("nobody"), None).await.unwrap();

        let _barrier = hub.register(None).await.unwrap();
        assert_eq!(hub.client_count().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_client_queues() {
        let hub = Hub::spawn("stopping", 8, 32);
        let mut client = hub.register(None).await.unwrap();

        hub.shutdown().await;

        assert!(client.receiver.recv().await.is_none());
        assert!(hub.register(None).await.is_err());
    }

    #[tokio::test]
    async fn test_broadcast_json_serializes_payload() {
        let hub = Hub::spawn("json", 8, 32);
        let mut client = hub.register(None).await.unwrap();

        hub.broadcast_json(&serde_json::json!({"status": "ok"}), None)
            .await
            .unwrap();

        let raw = client.receiver.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["status"], "ok");
    }
}
