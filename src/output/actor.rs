//! Writer actor owning the output stream.
//!
//! Single-writer pattern: one thread owns stdout (or any `Write`), processes
//! commands via MPSC and flushes after every frame so the agent sees each
//! cycle promptly.

use std::io::{ErrorKind, Write};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use crate::output::protocol::{Frame, write_frame};

/// Commands sent to the writer actor.
#[derive(Debug)]
pub enum Command {
    /// Write one job's announcements and values.
    Frame(Box<Frame>),
    /// Force flush the stream.
    Flush,
    /// Graceful shutdown.
    Shutdown,
}

/// Output writer actor.
pub struct OutputActor<W: Write> {
    out: W,
    rx: Receiver<Command>,
    plugin: String,
    frames_written: u64,
}

impl<W: Write + Send + 'static> OutputActor<W> {
    /// Spawn the writer actor thread.
    pub fn spawn(
        out: W,
        plugin: impl Into<String>,
        channel_capacity: usize,
    ) -> (JoinHandle<()>, SyncSender<Command>) {
        let (tx, rx) = mpsc::sync_channel(channel_capacity);
        let mut actor = OutputActor {
            out,
            rx,
            plugin: plugin.into(),
            frames_written: 0,
        };
        let handle = thread::spawn(move || actor.run());
        (handle, tx)
    }

    fn run(&mut self) {
        tracing::info!(plugin = %self.plugin, "OutputActor started");

        while let Ok(cmd) = self.rx.recv() {
            match cmd {
                Command::Frame(frame) => {
                    if let Err(e) = self.write(&frame) {
                        if e.kind() == ErrorKind::BrokenPipe {
                            tracing::error!("Output stream closed by consumer");
                            break;
                        }
                        tracing::error!(error = %e, job = %frame.job, "Failed to write frame");
                    }
                }
                Command::Flush => {
                    if let Err(e) = self.out.flush() {
                        tracing::error!(error = %e, "Output flush failed");
                    }
                }
                Command::Shutdown => break,
            }
        }

        if let Err(e) = self.out.flush() {
            tracing::warn!(error = %e, "Final output flush failed");
        }
        tracing::info!(frames = self.frames_written, "OutputActor stopped");
    }

    fn write(&mut self, frame: &Frame) -> std::io::Result<()> {
        write_frame(&mut self.out, &self.plugin, frame)?;
        self.out.flush()?;
        self.frames_written += 1;
        Ok(())
    }
}
