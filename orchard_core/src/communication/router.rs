/// Router client backend
///
/// Connects to a central ORCHARD router that holds the registry and fans
/// out published messages. Commands share one request/response connection;
/// every subscription gets its own connection whose reader task forwards
/// pushed messages into a local queue.
///
/// Usage: `RouterConnector::new("127.0.0.1:7777")`
use super::backend::{Backend, Connector, Message, Subscription};
use super::protocol::{read_frame, write_frame, Request, Response};
use crate::error::{OrchardError, OrchardResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RouterConnector {
    addr: String,
}

impl RouterConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Connector for RouterConnector {
    async fn connect(&self) -> OrchardResult<Arc<dyn Backend>> {
        let backend = RouterBackend::connect(&self.addr).await?;
        Ok(Arc::new(backend))
    }
}

async fn dial(addr: &str) -> OrchardResult<TcpStream> {
    let stream = TcpStream::connect(addr).await.map_err(|e| {
        OrchardError::transport(format!("Failed to connect to router at {}: {}", addr, e))
    })?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Command connection to the router
#[derive(Debug)]
pub struct RouterBackend {
    addr: String,
    connection: Mutex<Option<TcpStream>>,
}

impl RouterBackend {
    pub async fn connect(addr: &str) -> OrchardResult<Self> {
        let stream = dial(addr).await?;
        let backend = Self {
            addr: addr.to_string(),
            connection: Mutex::new(Some(stream)),
        };
        backend.ping().await?;
        Ok(backend)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn request(&self, request: &Request) -> OrchardResult<Response> {
        let mut connection = self.connection.lock().await;
        // Taken while in flight: a cancelled or failed exchange leaves the slot empty
        let mut stream = connection
            .take()
            .ok_or_else(|| OrchardError::transport("Not connected to router"))?;

        let response = async {
            write_frame(&mut stream, request).await?;
            read_frame::<_, Response>(&mut stream).await
        }
        .await;

        match response {
            Ok(response) => {
                *connection = Some(stream);
                match response {
                    Response::Error(message) => Err(OrchardError::protocol(format!(
                        "router rejected request: {}",
                        message
                    ))),
                    response => Ok(response),
                }
            }
            Err(e) => {
                debug!(addr = %self.addr, "Dropping router connection: {}", e);
                Err(e)
            }
        }
    }
}

fn unexpected(response: Response) -> OrchardError {
    OrchardError::protocol(format!("unexpected router response: {:?}", response))
}

#[async_trait]
impl Backend for RouterBackend {
    async fn ping(&self) -> OrchardResult<()> {
        match self.request(&Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn get(&self, key: &str) -> OrchardResult<Option<Vec<u8>>> {
        let request = Request::Get {
            key: key.to_string(),
        };
        match self.request(&request).await? {
            Response::Value(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> OrchardResult<()> {
        let request = Request::Set {
            key: key.to_string(),
            value,
        };
        match self.request(&request).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> OrchardResult<u64> {
        let request = Request::Publish {
            channel: channel.to_string(),
            payload,
        };
        match self.request(&request).await? {
            Response::Published(receivers) => Ok(receivers),
            other => Err(unexpected(other)),
        }
    }

    async fn subscribe(&self, channels: &[String]) -> OrchardResult<Box<dyn Subscription>> {
        let mut stream = dial(&self.addr).await?;
        let request = Request::Subscribe {
            channels: channels.to_vec(),
        };
        write_frame(&mut stream, &request).await?;

        match read_frame::<_, Response>(&mut stream).await? {
            Response::Subscribed(count) => {
                debug!(channels = count, router = %self.addr, "Subscribed");
            }
            Response::Error(message) => {
                return Err(OrchardError::protocol(format!(
                    "router rejected subscription: {}",
                    message
                )))
            }
            other => return Err(unexpected(other)),
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            loop {
                match read_frame::<_, Response>(&mut stream).await {
                    Ok(Response::Message { channel, payload }) => {
                        if tx.send(Message { channel, payload }).is_err() {
                            break;
                        }
                    }
                    Ok(other) => {
                        warn!("Ignoring unexpected frame on subscription: {:?}", other);
                    }
                    Err(e) => {
                        debug!("Subscription connection ended: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Box::new(RouterSubscription { rx, reader }))
    }

    async fn numsub(&self, channels: &[String]) -> OrchardResult<Vec<(String, u64)>> {
        let request = Request::NumSub {
            channels: channels.to_vec(),
        };
        match self.request(&request).await? {
            Response::NumSub(counts) => Ok(counts),
            other => Err(unexpected(other)),
        }
    }

    async fn channels(&self) -> OrchardResult<Vec<String>> {
        match self.request(&Request::Channels).await? {
            Response::Channels(channels) => Ok(channels),
            other => Err(unexpected(other)),
        }
    }

    async fn close(&self) -> OrchardResult<()> {
        self.connection.lock().await.take();
        Ok(())
    }
}

/// Subscription connection; the reader task ends when the router goes away
#[derive(Debug)]
pub struct RouterSubscription {
    rx: mpsc::UnboundedReceiver<Message>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl Subscription for RouterSubscription {
    async fn try_next(&mut self) -> OrchardResult<Option<Message>> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(OrchardError::transport("router closed the subscription"))
            }
        }
    }
}

impl Drop for RouterSubscription {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
