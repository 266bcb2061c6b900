//! Client connection to a Paxos proposer.
//!
//! The client frames each value with the submission codec and writes it to
//! the proposer's TCP connection. The proposer does not acknowledge
//! submissions; a value is known to be decided only once a learner delivers
//! it.
//!
//! ## Usage
//!
//! ```ignore
//! let mut client = ProposerClient::connect(&config, 0).await?;
//! client.submit(b"Hello").await?;
//! client.submit(b"World").await?;
//! ```

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::codec::SubmitEncoder;
use crate::config::PaxosConfig;
use crate::error::ProposerError;

/// Connection to a single proposer.
#[derive(Debug)]
pub struct ProposerClient<W = TcpStream> {
    /// Id of the proposer this client talks to.
    id: u32,

    writer: W,
    encoder: SubmitEncoder,

    /// Reused across submissions so each value is written with one buffer.
    buf: Vec<u8>,
}

impl ProposerClient<TcpStream> {
    /// Connect to proposer `id` from `config`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the proposer is unknown or its address is invalid,
    /// and `Connect` if the TCP connection fails.
    pub async fn connect(config: &PaxosConfig, id: u32) -> Result<Self, ProposerError> {
        let addr = config.proposer(id)?.socket_addr()?;

        let stream = TcpStream::connect(addr).await.map_err(|source| {
            warn!(proposer = id, %addr, error = %source, "could not connect to proposer");
            ProposerError::Connect {
                addr: addr.to_string(),
                source,
            }
        })?;
        // Submissions are small and latency-bound.
        stream.set_nodelay(true).map_err(ProposerError::Io)?;

        info!(proposer = id, %addr, "connected to proposer");
        Ok(Self::from_writer(id, stream, SubmitEncoder::default()))
    }
}

impl<W: AsyncWrite + Unpin> ProposerClient<W> {
    /// Wrap an already established connection.
    pub fn from_writer(id: u32, writer: W, encoder: SubmitEncoder) -> Self {
        Self {
            id,
            writer,
            encoder,
            buf: Vec::new(),
        }
    }

    /// The proposer id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The encoder used for submissions.
    pub fn encoder(&self) -> SubmitEncoder {
        self.encoder
    }

    /// Submit `value` to the proposer.
    ///
    /// Resolves once the whole message has been written and flushed. There is
    /// no retry; on error the connection should be considered broken.
    ///
    /// # Errors
    ///
    /// Returns `Codec` if the value cannot be framed and `Io` if the write fails.
    pub async fn submit(&mut self, value: impl AsRef<[u8]>) -> Result<(), ProposerError> {
        let value = value.as_ref();
        self.buf.clear();
        self.encoder.encode(value, &mut self.buf)?;

        debug!(proposer = self.id, len = value.len(), "submitting value");
        self.writer
            .write_all(&self.buf)
            .await
            .map_err(ProposerError::Io)?;
        self.writer.flush().await.map_err(ProposerError::Io)?;
        Ok(())
    }

    /// Shut down the write side of the connection.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the shutdown fails.
    pub async fn close(mut self) -> Result<(), ProposerError> {
        self.writer.shutdown().await.map_err(ProposerError::Io)
    }

    /// Take back the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
