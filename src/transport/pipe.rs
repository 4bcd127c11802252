//! In-memory transport
//!
//! [`PipeTransport`] stands in for an agent process; the matching
//! [`PipePeer`] plays the agent side. Useful for embedding a scripted agent
//! and for tests.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

use super::{ProcessIo, Transport};
use crate::error::{AgentError, Result};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Transport backed by in-memory pipes
#[derive(Debug)]
pub struct PipeTransport {
    io: Option<ProcessIo>,
    ready: bool,
}

/// Agent side of a [`PipeTransport`]
#[derive(Debug)]
pub struct PipePeer {
    input: Lines<BufReader<DuplexStream>>,
    output: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
}

impl PipeTransport {
    /// Create a connected transport/peer pair
    pub fn new() -> (Self, PipePeer) {
        let (stdin_engine, stdin_peer) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdout_engine, stdout_peer) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_engine, stderr_peer) = tokio::io::duplex(PIPE_CAPACITY);

        let transport = Self {
            io: Some(ProcessIo {
                stdin: Box::new(stdin_engine),
                stdout: Box::new(stdout_engine),
                stderr: Some(Box::new(stderr_engine)),
            }),
            ready: false,
        };
        let peer = PipePeer {
            input: BufReader::new(stdin_peer).lines(),
            output: Some(stdout_peer),
            stderr: Some(stderr_peer),
        };
        (transport, peer)
    }
}

#[async_trait]
impl Transport for PipeTransport {
    async fn connect(&mut self) -> Result<ProcessIo> {
        let io = self
            .io
            .take()
            .ok_or_else(|| AgentError::connection("Pipe transport already connected"))?;
        self.ready = true;
        Ok(io)
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn close(&mut self) -> Result<()> {
        self.ready = false;
        self.io = None;
        Ok(())
    }
}

impl PipePeer {
    /// Emit one raw output line
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| AgentError::transport("Peer output already finished"))?;
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
        Ok(())
    }

    /// Emit one JSON value as an output line
    pub async fn send_value(&mut self, value: &serde_json::Value) -> Result<()> {
        let line = serde_json::to_string(value)?;
        self.send_line(&line).await
    }

    /// Emit one stderr line
    pub async fn send_stderr(&mut self, line: &str) -> Result<()> {
        let stderr = self
            .stderr
            .as_mut()
            .ok_or_else(|| AgentError::transport("Peer stderr already finished"))?;
        stderr.write_all(line.as_bytes()).await?;
        stderr.write_all(b"\n").await?;
        stderr.flush().await?;
        Ok(())
    }

    /// Next line written by the engine, `None` once stdin is closed
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.input.next_line().await?)
    }

    /// Next line written by the engine, parsed as JSON
    pub async fn next_value(&mut self) -> Result<Option<serde_json::Value>> {
        match self.next_line().await? {
            Some(line) => Ok(Some(serde_json::from_str(&line)?)),
            None => Ok(None),
        }
    }

    /// End stdout and stderr, as if the process exited
    pub fn finish_output(&mut self) {
        self.output = None;
        self.stderr = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_peer_round_trip() {
        let (mut transport, mut peer) = PipeTransport::new();
        let mut io = transport.connect().await.unwrap();
        assert!(transport.is_ready());
        assert!(transport.connect().await.is_err());

        io.stdin.write_all(b"{\"a\":1}\n").await.unwrap();
        assert_eq!(
            peer.next_value().await.unwrap(),
            Some(serde_json::json!({"a": 1}))
        );

        peer.send_line("hello").await.unwrap();
        peer.finish_output();
        let mut out = String::new();
        io.stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello\n");
    }

    #[tokio::test]
    async fn test_usable_as_boxed_transport() {
        let (transport, _peer) = PipeTransport::new();
        let mut boxed: Box<dyn Transport> = Box::new(transport);
        let handle = tokio::spawn(async move {
            let io = boxed.connect().await?;
            boxed.close().await?;
            Ok::<_, AgentError>(io.stderr.is_some())
        });
        assert!(handle.await.unwrap().unwrap());
    }
}
