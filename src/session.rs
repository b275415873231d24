//! Session loop for one peer connection.
//!
//! The session owns the stream for its whole lifetime and handles commands
//! strictly one at a time: a `DATA` request is read in full, processed and
//! answered in full before the next command tag is read. `STOP` and any
//! transport fault end the session; the stream is shut down exactly once on
//! the way out, whatever the reason.

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::pipeline::Pipeline;
use crate::transport::{self, Command, TransportError};

/// How a session ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Number of `DATA` requests answered.
    pub requests_served: u64,
}

/// A single-peer, sequential request/response session.
pub struct Session<S> {
    stream: S,
    pipeline: Pipeline,
    max_message_size: usize,
    requests_served: u64,
}

impl Session<TcpStream> {
    /// Dial the peer and set up a session on the new connection.
    pub async fn connect(
        config: &ConnectionConfig,
        pipeline: Pipeline,
        max_message_size: usize,
    ) -> Result<Self> {
        info!(host = %config.host, port = config.port, "Connecting to peer");

        let stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .with_context(|| format!("Failed to connect to {}:{}", config.host, config.port))?;
        stream
            .set_nodelay(true)
            .context("Failed to set TCP_NODELAY")?;

        Ok(Self::new(stream, pipeline, max_message_size))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    /// Set up a session on an already-established stream.
    pub fn new(stream: S, pipeline: Pipeline, max_message_size: usize) -> Self {
        Self {
            stream,
            pipeline,
            max_message_size,
            requests_served: 0,
        }
    }

    /// Serve until `STOP` or a transport fault, then release the stream.
    pub async fn run(mut self) -> Result<SessionSummary, TransportError> {
        info!("Worker is ready");

        let result = self.serve().await;
        match &result {
            Ok(()) => info!(requests = self.requests_served, "Session stopped by peer"),
            Err(e) if e.is_connection_fault() => {
                warn!(error = %e, requests = self.requests_served, "Connection lost");
            }
            Err(e) => warn!(error = %e, requests = self.requests_served, "Protocol violation"),
        }

        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "Error shutting down connection");
        }

        result.map(|()| SessionSummary {
            requests_served: self.requests_served,
        })
    }

    async fn serve(&mut self) -> Result<(), TransportError> {
        loop {
            match transport::read_command(&mut self.stream).await? {
                Command::Stop => return Ok(()),
                Command::Data => self.handle_data().await?,
            }
        }
    }

    async fn handle_data(&mut self) -> Result<(), TransportError> {
        let body = transport::read_message(&mut self.stream, self.max_message_size).await?;
        let payload = self.pipeline.process(&body).await;
        transport::write_frame(&mut self.stream, &payload).await?;

        self.requests_served += 1;
        debug!(size = payload.len(), "Sent all data");
        Ok(())
    }
}
