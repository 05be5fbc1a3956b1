//! Output Layer
//!
//! Jobs hand finished cycles to the output layer as [`Frame`]s. A dedicated
//! thread renders them in the agent's text protocol.
//!
//! - [`OutputBuilder`]: configure and spawn the writer actor
//! - [`OutputWriter`]: cloneable, non-blocking sender used by the registry
//! - [`OutputHandles`]: owns the actor thread for graceful shutdown

mod actor;
mod protocol;

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::thread::JoinHandle;

use thiserror::Error;

use crate::charts::Chart;

use actor::{Command, OutputActor};

pub use protocol::{ChartValues, Frame, write_frame};

/// Default channel capacity for writer commands.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Default plugin name reported in chart definitions.
pub const DEFAULT_PLUGIN_NAME: &str = "strobe";

/// Errors that can occur in the output layer.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Failed to send command to writer actor.
    #[error("failed to send command to output actor")]
    ChannelSend,

    /// The channel was full and the frame was dropped. Carries the frame's
    /// chart announcements so the caller can queue them again.
    #[error("output channel full, dropped frame with {} chart announcements", announce.len())]
    Dropped { announce: Vec<Chart> },

    /// Internal error (e.g., thread join failure).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Non-blocking frame writer.
///
/// Uses `try_send`; frames are dropped if the channel is full and their
/// announcements handed back in [`OutputError::Dropped`].
#[derive(Clone)]
pub struct OutputWriter {
    tx: SyncSender<Command>,
    dropped_frames: Arc<AtomicU64>,
}

impl std::fmt::Debug for OutputWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputWriter")
            .field("dropped_frames", &self.dropped_frames())
            .finish_non_exhaustive()
    }
}

impl OutputWriter {
    fn new(tx: SyncSender<Command>) -> Self {
        Self {
            tx,
            dropped_frames: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get total count of dropped frames due to channel capacity.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Queue a frame. Empty frames are skipped.
    pub fn send_frame(&self, frame: Frame) -> Result<(), OutputError> {
        if frame.is_empty() {
            return Ok(());
        }
        match self.tx.try_send(Command::Frame(Box::new(frame))) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(cmd)) => {
                let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
                let announce = match cmd {
                    Command::Frame(frame) => frame.announce,
                    _ => Vec::new(),
                };
                tracing::warn!(dropped, announcements = announce.len(), "Channel full, dropping frame");
                Err(OutputError::Dropped { announce })
            }
            Err(TrySendError::Disconnected(_)) => Err(OutputError::ChannelSend),
        }
    }

    /// Force flush the output stream.
    pub fn flush(&self) -> Result<(), OutputError> {
        self.tx
            .try_send(Command::Flush)
            .map_err(|_| OutputError::ChannelSend)
    }

    /// Writer over a channel with no actor behind it.
    #[cfg(test)]
    pub(crate) fn detached(capacity: usize) -> (Self, std::sync::mpsc::Receiver<Command>) {
        let (tx, rx) = std::sync::mpsc::sync_channel(capacity);
        (Self::new(tx), rx)
    }

    fn shutdown(&self) -> Result<(), OutputError> {
        self.tx
            .send(Command::Shutdown)
            .map_err(|_| OutputError::ChannelSend)
    }
}

/// Builder for the output layer.
#[derive(Debug, Clone)]
pub struct OutputBuilder {
    plugin: String,
    channel_capacity: usize,
}

impl Default for OutputBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBuilder {
    pub fn new() -> Self {
        Self {
            plugin: DEFAULT_PLUGIN_NAME.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Set the plugin name reported in chart definitions.
    pub fn plugin_name(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = plugin.into();
        self
    }

    /// Set the channel capacity for writer commands.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Spawn the writer actor over `out`.
    pub fn build<W: Write + Send + 'static>(self, out: W) -> OutputHandles {
        let (handle, tx) = OutputActor::spawn(out, self.plugin, self.channel_capacity);
        OutputHandles {
            writer: OutputWriter::new(tx),
            actor_handle: Some(handle),
        }
    }
}

/// Handles to the output layer.
pub struct OutputHandles {
    /// Cloneable frame writer.
    pub writer: OutputWriter,
    /// Internal actor handle for graceful shutdown.
    actor_handle: Option<JoinHandle<()>>,
}

impl OutputHandles {
    /// Gracefully shutdown the output layer.
    ///
    /// Queued frames are written before the actor exits.
    pub fn shutdown(mut self) -> Result<(), OutputError> {
        self.writer.shutdown()?;

        if let Some(handle) = self.actor_handle.take() {
            handle
                .join()
                .map_err(|_| OutputError::Internal("Failed to join actor thread".to_string()))?;
        }

        Ok(())
    }
}

impl Drop for OutputHandles {
    fn drop(&mut self) {
        if self.actor_handle.is_some() {
            let _ = self.writer.shutdown();
            if let Some(handle) = self.actor_handle.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::charts::{Chart, Charts, Dim, Samples};

    /// Write target shared with the test thread.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .lock()
                .map_err(|_| std::io::Error::other("poisoned"))?
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_output_lifecycle() {
        let buf = SharedBuf::default();
        let handles = OutputBuilder::new()
            .plugin_name("test")
            .channel_capacity(8)
            .build(buf.clone());

        let mut charts = Charts::new();
        charts
            .add(Chart::new("queries", "Queries", "queries/s", "queries", "nsd.queries")
                .with_dim(Dim::new("num_queries", "queries").incremental()))
            .unwrap();
        let samples = Samples::from([("num_queries".to_string(), 42)]);
        let frame = Frame::build("nsd", "local", 1, charts.take_pending(), &charts, &samples);

        handles.writer.send_frame(frame).unwrap();
        handles
            .writer
            .send_frame(Frame::build("nsd", "local", 1, Vec::new(), &charts, &Samples::new()))
            .unwrap();
        handles.shutdown().unwrap();

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("CHART nsd_local.queries "));
        assert!(text.contains("DIMENSION 'num_queries' 'queries' incremental 1 1 ''"));
        assert!(text.contains("SET 'num_queries' = 42"));
        assert_eq!(text.matches("BEGIN").count(), 1);
    }

    #[test]
    fn test_full_channel_returns_announcements() {
        let (writer, _rx) = OutputWriter::detached(0);

        let mut charts = Charts::new();
        charts
            .add(Chart::new("zones", "Zones", "zones", "zones", "nsd.zones")
                .with_dim(Dim::new("zone_master", "master")))
            .unwrap();
        let samples = Samples::from([("zone_master".to_string(), 3)]);
        let frame = Frame::build("nsd", "local", 1, charts.take_pending(), &charts, &samples);

        match writer.send_frame(frame) {
            Err(OutputError::Dropped { announce }) => {
                assert_eq!(announce.len(), 1);
                assert_eq!(announce[0].id, "zones");
            }
            other => panic!("expected a dropped frame, got {other:?}"),
        }
        assert_eq!(writer.dropped_frames(), 1);
    }
}
