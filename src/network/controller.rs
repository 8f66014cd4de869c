//! Controller link
//!
//! The TCP connection a sink keeps to the SDN controller. Frames cross it
//! back-to-back in the same binary format as the sensor network; the
//! declared-length header byte delimits them on the stream.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::ControllerAddr;
use crate::protocol::{FrameError, PacketBuffer, HEADER_LEN};

/// Controller link errors
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connecting to {addr} timed out after {timeout:?}")]
    Timeout { addr: ControllerAddr, timeout: Duration },

    #[error("controller {addr} unreachable after {attempts} attempts")]
    Exhausted { addr: ControllerAddr, attempts: u32 },

    #[error("malformed controller frame: {0}")]
    Frame(#[from] FrameError),

    #[error("controller closed the connection")]
    Closed,
}

pub type ControllerResult<T> = Result<T, ControllerError>;

/// Connection-establishment policy
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Per-attempt connect timeout
    pub connect_timeout: Duration,
    /// How many attempts before giving up at startup
    pub attempts: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// An established connection to the controller
pub struct ControllerLink {
    stream: TcpStream,
    remote_addr: SocketAddr,
    read_buf: BytesMut,
}

impl ControllerLink {
    /// Connect, retrying with backoff up to the configured attempt count.
    ///
    /// Every attempt gets its own timeout, so an unplugged controller
    /// surfaces as a startup error instead of an indefinite hang.
    pub async fn connect(addr: &ControllerAddr, config: &LinkConfig) -> ControllerResult<Self> {
        let mut last_error: Option<ControllerError> = None;

        for attempt in 1..=config.attempts {
            if attempt > 1 {
                tokio::time::sleep(config.backoff).await;
            }

            match Self::connect_once(addr, config.connect_timeout).await {
                Ok(link) => {
                    tracing::info!("connected to controller {} ({})", addr, link.remote_addr);
                    return Ok(link);
                }
                Err(e) => {
                    tracing::warn!(
                        "controller connection attempt {}/{} failed: {}",
                        attempt,
                        config.attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(ControllerError::Exhausted {
            addr: addr.clone(),
            attempts: config.attempts,
        }))
    }

    async fn connect_once(addr: &ControllerAddr, timeout: Duration) -> ControllerResult<Self> {
        let remote_addr = super::resolve_host(&addr.host, addr.port).await?;

        let stream = tokio::time::timeout(timeout, TcpStream::connect(remote_addr))
            .await
            .map_err(|_| ControllerError::Timeout {
                addr: addr.clone(),
                timeout,
            })??;

        Ok(Self {
            stream,
            remote_addr,
            read_buf: BytesMut::with_capacity(1024),
        })
    }

    /// Wrap an already-established stream (test harnesses)
    pub fn from_stream(stream: TcpStream, remote_addr: SocketAddr) -> Self {
        Self {
            stream,
            remote_addr,
            read_buf: BytesMut::with_capacity(1024),
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Write one frame to the controller
    pub async fn send_frame(&mut self, frame: &[u8]) -> ControllerResult<()> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read the next frame (returns None on a clean close)
    pub async fn recv_frame(&mut self) -> ControllerResult<Option<PacketBuffer>> {
        loop {
            if let Some(frame) = self.decode_frame()? {
                return Ok(Some(frame));
            }

            let mut buf = [0u8; 1024];
            let n = self.stream.read(&mut buf).await?;

            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                } else {
                    return Err(ControllerError::Closed);
                }
            }

            self.read_buf.extend_from_slice(&buf[..n]);
        }
    }

    /// Split the next declared-length frame off the stream buffer, if a
    /// whole one has arrived.
    fn decode_frame(&mut self) -> ControllerResult<Option<PacketBuffer>> {
        if self.read_buf.len() < 2 {
            return Ok(None);
        }

        let declared = self.read_buf[1] as usize;
        if declared < HEADER_LEN {
            // The stream is desynchronized; there is no way to find the
            // next frame boundary, so fail the link.
            return Err(ControllerError::Frame(FrameError::TooShort {
                expected: HEADER_LEN,
                actual: declared,
            }));
        }

        if self.read_buf.len() < declared {
            return Ok(None);
        }

        let bytes = self.read_buf.split_to(declared);
        Ok(Some(PacketBuffer::from_bytes(&bytes)?))
    }
}
