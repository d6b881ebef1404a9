/// Wire protocol between nodes and the ORCHARD router
///
/// Every frame is a 4-byte little-endian length followed by a bincode
/// encoded [`Request`] (client to router) or [`Response`] (router to client).
use crate::error::{OrchardError, OrchardResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_PORT: u16 = 7777;
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Client to router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Ping,
    Get { key: String },
    Set { key: String, value: Vec<u8> },
    Publish { channel: String, payload: Vec<u8> },
    /// Turns the connection into a subscription connection
    Subscribe { channels: Vec<String> },
    NumSub { channels: Vec<String> },
    Channels,
}

/// Router to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Pong,
    Value(Option<Vec<u8>>),
    Ok,
    /// Number of subscribers the message was handed to
    Published(u64),
    Subscribed(u64),
    NumSub(Vec<(String, u64)>),
    Channels(Vec<String>),
    /// Pushed on subscription connections
    Message { channel: String, payload: Vec<u8> },
    Error(String),
}

/// Encode and write one frame
pub async fn write_frame<W, T>(writer: &mut W, packet: &T) -> OrchardResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = bincode::serialize(packet)?;
    if data.len() > MAX_FRAME_SIZE {
        return Err(OrchardError::protocol(format!(
            "frame of {} bytes exceeds limit of {}",
            data.len(),
            MAX_FRAME_SIZE
        )));
    }

    let len_bytes = (data.len() as u32).to_le_bytes();
    writer
        .write_all(&len_bytes)
        .await
        .map_err(|e| OrchardError::transport(format!("send error (len): {}", e)))?;
    writer
        .write_all(&data)
        .await
        .map_err(|e| OrchardError::transport(format!("send error (data): {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| OrchardError::transport(format!("flush error: {}", e)))?;
    Ok(())
}

/// Read and decode one frame; EOF is a transport error
pub async fn read_frame<R, T>(reader: &mut R) -> OrchardResult<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buffer = [0u8; 4];
    reader
        .read_exact(&mut len_buffer)
        .await
        .map_err(|e| OrchardError::transport(format!("read error (len): {}", e)))?;

    let packet_len = u32::from_le_bytes(len_buffer) as usize;
    if packet_len > MAX_FRAME_SIZE {
        return Err(OrchardError::protocol(format!(
            "packet too large: {} bytes",
            packet_len
        )));
    }

    let mut buffer = vec![0u8; packet_len];
    reader
        .read_exact(&mut buffer)
        .await
        .map_err(|e| OrchardError::transport(format!("read error (data): {}", e)))?;

    Ok(bincode::deserialize(&buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let request = Request::Set {
            key: "mesh:name:pid".to_string(),
            value: b"42".to_vec(),
        };
        write_frame(&mut client, &request).await.unwrap();

        let received: Request = read_frame(&mut server).await.unwrap();
        assert_eq!(received, request);
    }

    #[tokio::test]
    async fn test_eof_is_transport_error() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let err = read_frame::<_, Response>(&mut server).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let bogus = ((MAX_FRAME_SIZE + 1) as u32).to_le_bytes();
        client.write_all(&bogus).await.unwrap();

        let err = read_frame::<_, Response>(&mut server).await.unwrap_err();
        assert!(matches!(err, OrchardError::Protocol(_)));
    }
}
