//! Transport layer for talking to an agent process
//!
//! A [`Transport`] yields the raw byte streams of one agent process. The
//! [`StreamReader`] turns its output into typed responses on a
//! [`Broadcaster`], and the [`LineWriter`] serializes outgoing JSON lines.

pub mod broadcast;
pub mod pipe;
pub mod reader;
pub mod subprocess;
pub mod writer;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Boxed process input
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Boxed process output
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Byte streams of a connected agent process
pub struct ProcessIo {
    /// Process stdin
    pub stdin: BoxedWriter,
    /// Process stdout, one JSON value per line
    pub stdout: BoxedReader,
    /// Process stderr, if captured
    pub stderr: Option<BoxedReader>,
}

impl std::fmt::Debug for ProcessIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessIo")
            .field("stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

/// Transport trait for reaching an agent process
///
/// `connect` hands the process streams to the caller exactly once; the
/// transport keeps ownership of the process itself so that `close` can reap
/// it.
#[async_trait]
pub trait Transport: Send {
    /// Start the process and take its streams
    ///
    /// # Errors
    /// Returns error if the process cannot be started or was already connected
    async fn connect(&mut self) -> Result<ProcessIo>;

    /// Check if transport is ready for communication
    fn is_ready(&self) -> bool;

    /// Close the transport and clean up resources
    ///
    /// # Errors
    /// Returns error if cleanup fails
    async fn close(&mut self) -> Result<()>;
}

pub use broadcast::{Broadcaster, Subscription};
pub use pipe::{PipePeer, PipeTransport};
pub use reader::{LineFramer, StreamReader, DEFAULT_MAX_LINE_LENGTH};
pub use subprocess::SubprocessTransport;
pub use writer::LineWriter;
