//! # TCP Transport
//!
//! Concrete request/response transport for diagnostics. Every exchange uses
//! a fresh TCP connection carrying exactly one request frame and one
//! response frame.
//!
//! ## Framing
//!
//! ```text
//! request:  len (u32 BE) || sender identity (32) || envelope (len - 32)
//! response: len (u32 BE) || envelope (len)
//! ```
//!
//! A zero-length response frame means the responder had nothing to send
//! back (it rejected the request). Request frames shorter than an identity
//! are delivered to the engine with neither sender nor payload, and a frame
//! holding only an identity is delivered without a payload.
//!
//! ## Limits
//!
//! - Request frames are capped at `MAX_REQUEST_SIZE`, response frames at
//!   `MAX_RESPONSE_FRAME`.
//! - Inbound reads and processing are bounded by timeouts.
//! - Concurrent inbound connections are capped by a semaphore.
//!
//! The measured TCP connect time is recorded in the address book as the
//! peer's latency.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::directory::AddressBook;
use crate::gather::GatherEngine;
use crate::identity::{Identity, IDENTITY_LEN};
use crate::messages::MAX_DESERIALIZE_SIZE;
use crate::protocols::{InboundMessage, NetworkDirectory, Transport};

/// Maximum size of an inbound request frame.
pub const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// Maximum size of a response frame.
pub const MAX_RESPONSE_FRAME: usize = MAX_DESERIALIZE_SIZE as usize;

/// Timeout for establishing an outbound connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for reading an inbound request frame.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on handling one inbound request, fan-out included.
const REQUEST_PROCESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum concurrently served inbound connections.
pub const MAX_INBOUND_CONNECTIONS: usize = 256;

/// Outbound side: sends diagnostic envelopes to peers in the address book.
pub struct TcpTransport {
    identity: Identity,
    book: AddressBook,
}

impl TcpTransport {
    pub fn new(identity: Identity, book: AddressBook) -> Self {
        Self { identity, book }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send_request(&self, to: &Identity, envelope: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let addr = self
            .book
            .addr_of(to)
            .with_context(|| format!("no address known for peer {}", to.short()))?;

        let start = Instant::now();
        let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .with_context(|| format!("connection to {} timed out", addr))?
            .with_context(|| format!("failed to connect to {}", addr))?;
        self.book.record_latency(to, start.elapsed());
        trace!(peer = %to.short(), addr = %addr, "connected");

        write_frame(&mut stream, &[&self.identity.as_bytes()[..], &envelope[..]])
            .await
            .context("failed to send request")?;

        let reply = read_frame(&mut stream, MAX_RESPONSE_FRAME)
            .await
            .context("failed to read response")?;

        if reply.is_empty() { Ok(None) } else { Ok(Some(reply)) }
    }
}

/// Accept inbound diagnostic requests on `listener` and answer them with
/// `engine`. Runs until accepting fails.
pub async fn serve<D, T>(listener: TcpListener, engine: GatherEngine<D, T>) -> Result<()>
where
    D: NetworkDirectory,
    T: Transport,
{
    let limiter = Arc::new(Semaphore::new(MAX_INBOUND_CONNECTIONS));

    loop {
        let (stream, remote) = listener.accept().await.context("failed to accept connection")?;

        let Ok(permit) = limiter.clone().try_acquire_owned() else {
            warn!(remote = %remote, max = MAX_INBOUND_CONNECTIONS, "too many inbound connections, dropping");
            continue;
        };

        let engine = engine.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = handle_stream(engine, stream, remote).await {
                debug!(remote = %remote, error = ?e, "stream error");
            }
        });
    }
}

async fn handle_stream<D, T>(engine: GatherEngine<D, T>, mut stream: TcpStream, remote: SocketAddr) -> Result<()>
where
    D: NetworkDirectory,
    T: Transport,
{
    let frame = tokio::time::timeout(REQUEST_READ_TIMEOUT, read_frame(&mut stream, MAX_REQUEST_SIZE))
        .await
        .map_err(|_| anyhow::anyhow!("request read timed out"))??;

    let inbound = split_request_frame(frame);

    let reply = match tokio::time::timeout(REQUEST_PROCESS_TIMEOUT, engine.handle_message(inbound)).await {
        Ok(Ok(outbound)) => outbound.payload,
        Ok(Err(e)) => {
            warn!(remote = %remote, error = %e, "rejecting diagnostic request");
            Vec::new()
        }
        Err(_) => {
            warn!(remote = %remote, "request processing timed out");
            Vec::new()
        }
    };

    write_frame(&mut stream, &[&reply[..]]).await?;
    stream.shutdown().await.ok();
    Ok(())
}

fn split_request_frame(mut frame: Vec<u8>) -> InboundMessage {
    if frame.len() < IDENTITY_LEN {
        return InboundMessage::default();
    }
    let payload = frame.split_off(IDENTITY_LEN);
    let mut id = [0u8; IDENTITY_LEN];
    id.copy_from_slice(&frame);

    InboundMessage {
        sender: Some(Identity::from_bytes(id)),
        payload: if payload.is_empty() { None } else { Some(payload) },
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, parts: &[&[u8]]) -> Result<()> {
    let len: usize = parts.iter().map(|p| p.len()).sum();
    let len = u32::try_from(len).context("frame too large")?;
    writer.write_all(&len.to_be_bytes()).await?;
    for part in parts {
        writer.write_all(part).await?;
    }
    writer.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max: usize) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max {
        anyhow::bail!("frame too large: {} bytes (max {})", len, max);
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gather::GatherConfig;
    use crate::messages::{self, DiagnosticRequest};

    type TcpEngine = GatherEngine<AddressBook, TcpTransport>;

    async fn spawn_node(seed: u8) -> (TcpEngine, AddressBook, SocketAddr) {
        let identity = Identity::from_bytes([seed; 32]);
        let book = AddressBook::new(identity);
        let transport = Arc::new(TcpTransport::new(identity, book.clone()));
        let engine = GatherEngine::new(Arc::new(book.clone()), transport, GatherConfig::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, engine.clone()));
        (engine, book, addr)
    }

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &[b"head", b"tail"]).await.unwrap();
        let frame = read_frame(&mut b, 64).await.unwrap();
        assert_eq!(frame, b"headtail");
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &[&[0u8; 65]]).await.unwrap();
        assert!(read_frame(&mut b, 64).await.is_err());
    }

    #[test]
    fn short_frames_lack_sender_or_payload() {
        let inbound = split_request_frame(vec![1u8; 5]);
        assert!(inbound.sender.is_none() && inbound.payload.is_none());

        let inbound = split_request_frame(vec![2u8; IDENTITY_LEN]);
        assert_eq!(inbound.sender, Some(Identity::from_bytes([2u8; 32])));
        assert!(inbound.payload.is_none());

        let mut frame = vec![3u8; IDENTITY_LEN];
        frame.extend_from_slice(b"xyz");
        let inbound = split_request_frame(frame);
        assert_eq!(inbound.payload.as_deref(), Some(&b"xyz"[..]));
    }

    #[tokio::test]
    async fn two_nodes_gather_over_tcp() {
        let (a, a_book, a_addr) = spawn_node(1).await;
        let (b, b_book, b_addr) = spawn_node(2).await;
        a_book.add_peer(b.identity(), b_addr);
        b_book.add_peer(a.identity(), a_addr);

        let result = a.initiate(Duration::from_secs(5)).await.unwrap();
        let ids: Vec<String> = result.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec![a.identity().to_hex(), b.identity().to_hex()]);

        // b reports its link back to a
        assert_eq!(result[1].connections.len(), 1);
        assert_eq!(result[1].connections[0].id, a.identity().to_hex());
    }

    #[tokio::test]
    async fn unknown_peer_is_an_error() {
        let identity = Identity::from_bytes([1; 32]);
        let transport = TcpTransport::new(identity, AddressBook::new(identity));
        let err = transport
            .send_request(&Identity::from_bytes([2; 32]), vec![1, 2, 3])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no address"));
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let identity = Identity::from_bytes([1; 32]);
        let peer = Identity::from_bytes([2; 32]);
        let book = AddressBook::new(identity);
        book.add_peer(peer, addr);
        let transport = TcpTransport::new(identity, book);
        assert!(transport.send_request(&peer, vec![1]).await.is_err());
    }

    #[tokio::test]
    async fn rejected_request_gets_empty_frame() {
        let (_engine, _book, addr) = spawn_node(1).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, &[b"short"]).await.unwrap();
        let reply = read_frame(&mut stream, MAX_RESPONSE_FRAME).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn valid_request_gets_response_with_same_id() {
        let (engine, _book, addr) = spawn_node(1).await;
        let peer = Identity::from_bytes([9; 32]);
        let book = AddressBook::new(peer);
        book.add_peer(engine.identity(), addr);
        let transport = TcpTransport::new(peer, book.clone());

        let request = DiagnosticRequest::fresh();
        let envelope = messages::encode_request(&request).unwrap();
        let reply = transport
            .send_request(&engine.identity(), envelope)
            .await
            .unwrap()
            .expect("non-empty reply");
        let response = messages::decode_response(&reply).unwrap();
        assert_eq!(response.request_id, request.request_id);
        assert!(!response.data.is_empty());
    }
}
