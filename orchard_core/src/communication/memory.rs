/// In-process registry and bus
///
/// A [`MemoryBroker`] plays the role of the router inside one process. It is
/// used by tests and by single-process meshes. Transport failures can be
/// injected with [`MemoryBroker::sever`] and [`MemoryBroker::set_reachable`].
use super::backend::{Backend, Connector, Message, Subscription};
use crate::error::{OrchardError, OrchardResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

struct SubscriberEntry {
    id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

struct BrokerState {
    store: HashMap<String, Vec<u8>>,
    /// channel -> subscribers of that channel
    subscriptions: HashMap<String, Vec<SubscriberEntry>>,
    /// Bumped on every severance; handles of older generations are dead
    generation: u64,
    reachable: bool,
    next_subscriber: u64,
}

/// Shared broker; clones refer to the same registry and channels
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    connects: Arc<AtomicU64>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                store: HashMap::new(),
                subscriptions: HashMap::new(),
                generation: 0,
                reachable: true,
                next_subscriber: 0,
            })),
            connects: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            broker: self.clone(),
        }
    }

    /// Drop every live connection: existing handles and subscriptions fail
    /// with a transport error, messages not yet polled are lost
    pub fn sever(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.subscriptions.clear();
    }

    /// While unreachable, new connections are refused
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Number of successful connections handed out so far
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    fn remove_subscriber(&self, id: u64) {
        let mut state = self.state.lock();
        for entries in state.subscriptions.values_mut() {
            entries.retain(|entry| entry.id != id);
        }
        state.subscriptions.retain(|_, entries| !entries.is_empty());
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryBroker")
            .field("keys", &state.store.len())
            .field("channels", &state.subscriptions.len())
            .field("generation", &state.generation)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> OrchardResult<Arc<dyn Backend>> {
        let generation = {
            let state = self.broker.state.lock();
            if !state.reachable {
                return Err(OrchardError::transport("in-memory broker unreachable"));
            }
            state.generation
        };
        self.broker.connects.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MemoryBackend {
            broker: self.broker.clone(),
            generation,
            closed: AtomicBool::new(false),
        }))
    }
}

/// One connection to a [`MemoryBroker`]
#[derive(Debug)]
pub struct MemoryBackend {
    broker: MemoryBroker,
    generation: u64,
    closed: AtomicBool,
}

impl MemoryBackend {
    fn check_alive(&self) -> OrchardResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(OrchardError::transport("connection closed"));
        }
        if self.broker.generation() != self.generation {
            return Err(OrchardError::transport("connection severed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn ping(&self) -> OrchardResult<()> {
        self.check_alive()
    }

    async fn get(&self, key: &str) -> OrchardResult<Option<Vec<u8>>> {
        self.check_alive()?;
        Ok(self.broker.state.lock().store.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> OrchardResult<()> {
        self.check_alive()?;
        self.broker
            .state
            .lock()
            .store
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> OrchardResult<u64> {
        self.check_alive()?;
        let state = self.broker.state.lock();
        let mut receivers = 0;
        if let Some(entries) = state.subscriptions.get(channel) {
            for entry in entries {
                let message = Message {
                    channel: channel.to_string(),
                    payload: payload.clone(),
                };
                if entry.tx.send(message).is_ok() {
                    receivers += 1;
                }
            }
        }
        Ok(receivers)
    }

    async fn subscribe(&self, channels: &[String]) -> OrchardResult<Box<dyn Subscription>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.broker.state.lock();
        if self.closed.load(Ordering::Relaxed) || state.generation != self.generation {
            return Err(OrchardError::transport("connection severed"));
        }

        let id = state.next_subscriber;
        state.next_subscriber += 1;
        for channel in channels {
            state
                .subscriptions
                .entry(channel.clone())
                .or_default()
                .push(SubscriberEntry { id, tx: tx.clone() });
        }

        Ok(Box::new(MemorySubscription {
            broker: self.broker.clone(),
            generation: self.generation,
            id,
            rx,
        }))
    }

    async fn numsub(&self, channels: &[String]) -> OrchardResult<Vec<(String, u64)>> {
        self.check_alive()?;
        let state = self.broker.state.lock();
        Ok(channels
            .iter()
            .map(|channel| {
                let count = state
                    .subscriptions
                    .get(channel)
                    .map(|entries| entries.len() as u64)
                    .unwrap_or(0);
                (channel.clone(), count)
            })
            .collect())
    }

    async fn channels(&self) -> OrchardResult<Vec<String>> {
        self.check_alive()?;
        let mut channels: Vec<String> = self
            .broker
            .state
            .lock()
            .subscriptions
            .keys()
            .cloned()
            .collect();
        channels.sort();
        Ok(channels)
    }

    async fn close(&self) -> OrchardResult<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemorySubscription {
    broker: MemoryBroker,
    generation: u64,
    id: u64,
    rx: mpsc::UnboundedReceiver<Message>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn try_next(&mut self) -> OrchardResult<Option<Message>> {
        if self.broker.generation() != self.generation {
            return Err(OrchardError::transport("subscription severed"));
        }
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(OrchardError::transport("subscription disconnected"))
            }
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.broker.remove_subscriber(self.id);
    }
}
