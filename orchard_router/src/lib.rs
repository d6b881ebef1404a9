//! ORCHARD Router
//!
//! Central registry and message broker for a mesh. Nodes keep one command
//! connection for key/value and publish requests, plus one connection per
//! subscription. The router forwards every published message to all
//! subscribers of its channel.

use orchard_core::communication::protocol::{read_frame, write_frame, Request, Response};
use orchard_core::OrchardError;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

/// How long a closing connection may take to flush its queued replies
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A client connection
#[derive(Debug)]
struct Client {
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Response>,
}

/// Registry contents and subscriptions of a running router
#[derive(Debug, Default)]
pub struct RouterState {
    /// Key/value registry
    store: RwLock<HashMap<String, Vec<u8>>>,

    /// Map of channel -> clients subscribed to that channel
    subscriptions: RwLock<HashMap<String, Vec<Arc<Client>>>>,

    /// Map of client address -> client info (for cleanup on disconnect)
    clients: RwLock<HashMap<SocketAddr, Arc<Client>>>,
}

impl RouterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.store.read().await.get(key).cloned()
    }

    pub async fn set(&self, key: String, value: Vec<u8>) {
        self.store.write().await.insert(key, value);
    }

    /// Number of clients currently connected
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    async fn subscribe(&self, channels: &[String], client: Arc<Client>) {
        let mut subs = self.subscriptions.write().await;
        for channel in channels {
            let subscribers = subs.entry(channel.clone()).or_default();
            if !subscribers.iter().any(|c| c.addr == client.addr) {
                subscribers.push(client.clone());
            }
        }
        debug!("Client {} subscribed to {:?}", client.addr, channels);
    }

    /// Forward a message to every subscriber; returns how many received it
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> u64 {
        let subs = self.subscriptions.read().await;
        let Some(clients) = subs.get(channel) else {
            return 0;
        };

        let mut delivered = 0;
        for client in clients {
            let message = Response::Message {
                channel: channel.to_string(),
                payload: payload.clone(),
            };
            match client.tx.send(message) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Failed to send to client {}: {}", client.addr, e),
            }
        }
        debug!("Published on '{}' to {} subscribers", channel, delivered);
        delivered
    }

    async fn numsub(&self, channels: &[String]) -> Vec<(String, u64)> {
        let subs = self.subscriptions.read().await;
        channels
            .iter()
            .map(|channel| {
                let count = subs.get(channel).map_or(0, |clients| clients.len() as u64);
                (channel.clone(), count)
            })
            .collect()
    }

    async fn channels(&self) -> Vec<String> {
        let subs = self.subscriptions.read().await;
        let mut channels: Vec<String> = subs
            .iter()
            .filter(|(_, clients)| !clients.is_empty())
            .map(|(channel, _)| channel.clone())
            .collect();
        channels.sort();
        channels
    }

    async fn register_client(&self, client: Arc<Client>) {
        let mut clients = self.clients.write().await;
        clients.insert(client.addr, client);
    }

    /// Remove a client and all its subscriptions
    async fn remove_client(&self, addr: SocketAddr) {
        self.clients.write().await.remove(&addr);

        let mut subs = self.subscriptions.write().await;
        for clients in subs.values_mut() {
            clients.retain(|c| c.addr != addr);
        }
        subs.retain(|_, clients| !clients.is_empty());

        debug!("Removed client {}", addr);
    }

    /// Reply to one request; `None` when the reply was already queued
    async fn respond(&self, request: Request, client: &Arc<Client>) -> Option<Response> {
        let response = match request {
            Request::Ping => Response::Pong,
            Request::Get { key } => Response::Value(self.get(&key).await),
            Request::Set { key, value } => {
                self.set(key, value).await;
                Response::Ok
            }
            Request::Publish { channel, payload } => {
                Response::Published(self.publish(&channel, payload).await)
            }
            Request::Subscribe { channels } => {
                // Acknowledge before registering so no pushed message overtakes it
                let ack = Response::Subscribed(channels.len() as u64);
                if client.tx.send(ack).is_ok() {
                    self.subscribe(&channels, client.clone()).await;
                }
                return None;
            }
            Request::NumSub { channels } => Response::NumSub(self.numsub(&channels).await),
            Request::Channels => Response::Channels(self.channels().await),
        };
        Some(response)
    }
}

/// Serve one client connection until it disconnects
pub async fn handle_client<S>(stream: S, addr: SocketAddr, state: Arc<RouterState>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    debug!("New client connected: {}", addr);

    let (mut read_half, mut write_half) = tokio::io::split(stream);

    // Replies and pushed messages share one ordered queue
    let (tx, mut rx) = mpsc::unbounded_channel::<Response>();

    let client = Arc::new(Client { addr, tx });
    state.register_client(client.clone()).await;

    let mut write_task = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            if let Err(e) = write_frame(&mut write_half, &response).await {
                debug!("Write to {} failed: {}", addr, e);
                break;
            }
        }
    });

    loop {
        match read_frame::<_, Request>(&mut read_half).await {
            Ok(request) => {
                let Some(response) = state.respond(request, &client).await else {
                    continue;
                };
                if client.tx.send(response).is_err() {
                    break;
                }
            }
            Err(OrchardError::Transport(e)) => {
                debug!("Client {} disconnected: {}", addr, e);
                break;
            }
            Err(e) => {
                warn!("Dropping client {}: {}", addr, e);
                let _ = client.tx.send(Response::Error(e.to_string()));
                break;
            }
        }
    }

    state.remove_client(addr).await;
    // Last sender gone: the writer drains the queue, then stops
    drop(client);
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut write_task).await.is_err() {
        write_task.abort();
    }
}

/// Accept connections forever
pub async fn serve(listener: TcpListener, state: Arc<RouterState>) -> std::io::Result<()> {
    info!("ORCHARD Router listening on {}", listener.local_addr()?);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let _ = stream.set_nodelay(true);
                let state = state.clone();
                tokio::spawn(async move {
                    handle_client(stream, addr, state).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn client(port: u16) -> (Arc<Client>, mpsc::UnboundedReceiver<Response>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        (Arc::new(Client { addr, tx }), rx)
    }

    #[tokio::test]
    async fn test_publish_counts_receivers() {
        let state = RouterState::new();
        let (first, mut first_rx) = client(1000);
        let (second, _second_rx) = client(1001);

        state.subscribe(&["a".to_string()], first).await;
        state.subscribe(&["a".to_string(), "b".to_string()], second).await;

        assert_eq!(state.publish("a", vec![1]).await, 2);
        assert_eq!(state.publish("b", vec![2]).await, 1);
        assert_eq!(state.publish("c", vec![3]).await, 0);

        assert_eq!(
            first_rx.try_recv().unwrap(),
            Response::Message {
                channel: "a".to_string(),
                payload: vec![1]
            }
        );
        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_client_drops_empty_channels() {
        let state = RouterState::new();
        let (first, _rx1) = client(1000);
        let (second, _rx2) = client(1001);
        state.register_client(first.clone()).await;
        state.register_client(second.clone()).await;

        state.subscribe(&["a".to_string()], first.clone()).await;
        state.subscribe(&["a".to_string(), "b".to_string()], second.clone()).await;
        assert_eq!(state.channels().await, vec!["a", "b"]);

        state.remove_client(second.addr).await;
        assert_eq!(state.channels().await, vec!["a"]);
        assert_eq!(
            state.numsub(&["a".to_string(), "b".to_string()]).await,
            vec![("a".to_string(), 1), ("b".to_string(), 0)]
        );
        assert_eq!(state.client_count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_subscription_is_counted_once() {
        let state = RouterState::new();
        let (first, _rx) = client(1000);

        state.subscribe(&["a".to_string(), "a".to_string()], first).await;
        assert_eq!(state.numsub(&["a".to_string()]).await[0].1, 1);
    }

    #[tokio::test]
    async fn test_subscribe_acknowledges_before_messages() {
        let state = RouterState::new();
        let (first, mut rx) = client(1000);

        let request = Request::Subscribe {
            channels: vec!["a".to_string()],
        };
        assert_eq!(state.respond(request, &first).await, None);
        state.publish("a", vec![9]).await;

        assert_eq!(rx.try_recv().unwrap(), Response::Subscribed(1));
        assert!(matches!(rx.try_recv().unwrap(), Response::Message { .. }));
    }

    #[tokio::test]
    async fn test_registry_requests() {
        let state = RouterState::new();
        let (first, _rx) = client(1000);

        let set = Request::Set {
            key: "k".to_string(),
            value: b"v".to_vec(),
        };
        assert_eq!(state.respond(set, &first).await, Some(Response::Ok));

        let get = Request::Get {
            key: "k".to_string(),
        };
        assert_eq!(
            state.respond(get, &first).await,
            Some(Response::Value(Some(b"v".to_vec())))
        );
        assert_eq!(
            state.respond(Request::Ping, &first).await,
            Some(Response::Pong)
        );
    }

    #[tokio::test]
    async fn test_protocol_error_reaches_client_before_disconnect() {
        let state = Arc::new(RouterState::new());
        let (mut peer, stream) = tokio::io::duplex(1024);
        let addr = SocketAddr::from(([127, 0, 0, 1], 2000));
        let server = tokio::spawn(handle_client(stream, addr, state.clone()));

        // Length prefix beyond the frame cap
        peer.write_all(&u32::MAX.to_le_bytes()).await.unwrap();

        let reply: Response = read_frame(&mut peer).await.unwrap();
        assert!(matches!(reply, Response::Error(_)));
        assert!(read_frame::<_, Response>(&mut peer).await.is_err());

        server.await.unwrap();
        assert_eq!(state.client_count().await, 0);
    }
}
