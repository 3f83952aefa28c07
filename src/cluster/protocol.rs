//! Framed message exchange between two nodes during a cluster join.
//!
//! Every message is a `u32` little-endian length followed by a MessagePack
//! body. Reads are bounded by a timeout and a maximum frame size so that a
//! misbehaving peer cannot stall or exhaust the node.

use super::result::JoinCheckResult;
use crate::config::MigrationSettings;
use crate::core::{MigrationError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bidirectional byte stream a join handshake runs over.
pub trait JoinStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> JoinStream for T {}

/// Which end of the handshake this node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRole {
    Acceptor,
    Initiator,
}

/// One join attempt: the stream to the peer plus the limits applied to it.
pub struct JoinRequest {
    stream: Box<dyn JoinStream>,
    role: JoinRole,
    local_node: String,
    read_timeout: Duration,
    max_frame_bytes: u32,
}

impl JoinRequest {
    pub fn new(stream: impl JoinStream + 'static, role: JoinRole, local_node: impl Into<String>) -> Self {
        let defaults = MigrationSettings::default();
        Self {
            stream: Box::new(stream),
            role,
            local_node: local_node.into(),
            read_timeout: defaults.join_read_timeout(),
            max_frame_bytes: defaults.max_frame_bytes,
        }
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn max_frame_bytes(mut self, max: u32) -> Self {
        self.max_frame_bytes = max;
        self
    }

    pub fn with_settings(self, settings: &MigrationSettings) -> Self {
        self.read_timeout(settings.join_read_timeout())
            .max_frame_bytes(settings.max_frame_bytes)
    }

    pub fn role(&self) -> JoinRole {
        self.role
    }

    pub fn local_node(&self) -> &str {
        &self.local_node
    }

    /// Encodes `message` and writes it as one frame.
    pub async fn send<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<()> {
        let body = rmp_serde::to_vec_named(message)?;
        let len = u32::try_from(body.len())
            .ok()
            .filter(|len| *len <= self.max_frame_bytes)
            .ok_or_else(|| {
                MigrationError::Transport(format!(
                    "Outgoing frame of {} bytes exceeds limit of {}",
                    body.len(),
                    self.max_frame_bytes
                ))
            })?;

        self.stream
            .write_all(&len.to_le_bytes())
            .await
            .map_err(transport_error)?;
        self.stream.write_all(&body).await.map_err(transport_error)?;
        self.stream.flush().await.map_err(transport_error)
    }

    /// Reads one frame and decodes it.
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<T> {
        let body = self.receive_frame().await?;
        Ok(rmp_serde::from_slice(&body)?)
    }

    async fn receive_frame(&mut self) -> Result<Vec<u8>> {
        let timeout = self.read_timeout;
        let max = self.max_frame_bytes;
        let stream = &mut self.stream;

        let read = async move {
            let mut len_bytes = [0u8; 4];
            stream.read_exact(&mut len_bytes).await.map_err(transport_error)?;
            let len = u32::from_le_bytes(len_bytes);
            if len > max {
                return Err(MigrationError::Transport(format!(
                    "Incoming frame of {len} bytes exceeds limit of {max}"
                )));
            }
            let mut body = vec![0u8; len as usize];
            stream.read_exact(&mut body).await.map_err(transport_error)?;
            Ok(body)
        };

        match tokio::time::timeout(timeout, read).await {
            Ok(result) => result,
            Err(_) => Err(MigrationError::Transport(format!(
                "Peer did not answer within {timeout:?}"
            ))),
        }
    }
}

fn transport_error(err: std::io::Error) -> MigrationError {
    MigrationError::Transport(err.to_string())
}

/// A pluggable check run on both ends when two nodes attempt to merge.
///
/// `accept` runs on the node that received the connection, `connect` on the
/// node that opened it. The two sides of the same check talk to each other
/// through the request and must agree on the order of messages.
#[async_trait]
pub trait ClusterJoinCheck: Send + Sync {
    fn name(&self) -> &str;

    /// Checks run in ascending `order`, ties broken by name.
    fn order(&self) -> i32;

    async fn accept(&self, request: &mut JoinRequest) -> Result<JoinCheckResult>;

    async fn connect(&self, request: &mut JoinRequest) -> Result<JoinCheckResult>;

    /// Called instead of `accept`/`connect` when the peer does not know this
    /// check. Nothing is exchanged on the wire.
    async fn on_unknown(&self, _request: &mut JoinRequest) -> Result<JoinCheckResult> {
        Ok(JoinCheckResult::passivate(
            super::PassivationTarget::AnyNode,
            format!("Peer does not support join check '{}'", self.name()),
        ))
    }
}
