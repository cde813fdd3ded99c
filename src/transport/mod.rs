//! Transport layer for communicating with Claude Code CLI
//!
//! A [`Transport`] is a line-oriented duplex pipe to the CLI. Outbound lines
//! are written as-is with a trailing newline; inbound lines are decoded into
//! [`Message`]s and delivered on a bounded channel. The transport also keeps
//! a sticky first error, so a failure reported on a background reader can
//! be inspected after the message channel has closed.

pub mod command;
pub mod discovery;
mod stderr;
pub mod subprocess;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{ClaudeError, Result};
use crate::types::Message;

/// Capacity of the decoded message channel
pub const MESSAGE_CHANNEL_CAPACITY: usize = 10;

/// Transport trait for communicating with Claude Code
///
/// All methods take `&self` so one transport can be shared between the
/// control router's reader and writers; implementations use interior
/// mutability.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the underlying process. Calling it again while connected is a
    /// no-op.
    ///
    /// # Errors
    /// Returns a connection error if the process or its pipes cannot be set up
    async fn connect(&self) -> Result<()>;

    /// Write one line; the transport appends the newline
    ///
    /// # Errors
    /// Returns a connection error if not ready or the write fails. A failed
    /// write marks the transport as not ready.
    async fn write(&self, line: &str) -> Result<()>;

    /// Take the channel of decoded messages
    ///
    /// The channel closes at end of stream, on a stream-level read error or
    /// when the transport is closed. Malformed lines are reported through
    /// [`Transport::on_error`] and skipped.
    ///
    /// # Errors
    /// Returns an error if not connected or the channel was already taken
    async fn read_messages(&self) -> Result<mpsc::Receiver<Message>>;

    /// Stop the readers, close stdin and wait for the process to exit
    ///
    /// # Errors
    /// Returns a process error if the process exited non-zero or had to be killed
    async fn close(&self) -> Result<()>;

    /// Record an error; only the first one is kept
    fn on_error(&self, err: ClaudeError);

    /// Whether the transport is connected and writable
    fn is_ready(&self) -> bool;

    /// First error observed, if any
    fn error(&self) -> Option<ClaudeError>;
}

pub use command::CommandSpec;
pub use discovery::find_cli;
pub use subprocess::SubprocessTransport;
