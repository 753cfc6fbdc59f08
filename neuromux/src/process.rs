//! Supervision of emulation children.
//!
//! Every broker and module runs its [`ControlledProcess::run`] body on a
//! dedicated named thread with no shared state; the spawning side keeps a
//! [`ProcessHandle`] through which it can wait for termination. Children
//! stop themselves when they observe a `quit` frame on their control
//! socket: they acknowledge, tear down their sockets, and return from
//! `run`. A handle's `join` never kills the child.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

use neuromux_communication::ModuleId;

use crate::errors::Result;

/// A child of the emulation: a body to run on its own thread, plus the
/// identity it is addressed by on the control plane.
pub trait ControlledProcess: Send {
    /// The child's bus identity.
    fn id(&self) -> &ModuleId;

    /// What kind of child this is; used for thread names and log lines.
    fn kind(&self) -> &'static str {
        "process"
    }

    /// Body of the child. Returns when the child has been asked to quit,
    /// or with an error on an unrecoverable failure.
    fn run(&mut self) -> Result<()>;
}

/// Owner-side handle to a spawned child.
///
/// Spawning consumes the child value, so a child cannot be started twice.
pub struct ProcessHandle {
    id: ModuleId,
    kind: &'static str,
    done: Receiver<Result<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
    outcome: Option<Result<()>>,
}

/// Starts a child on a dedicated named thread.
pub fn spawn<P: ControlledProcess + 'static>(mut child: P) -> Result<ProcessHandle> {
    let id = child.id().clone();
    let kind = child.kind();
    let (done_tx, done_rx) = bounded(1);
    let thread = std::thread::Builder::new()
        .name(format!("{} {}", kind, id))
        .spawn(move || {
            let outcome = child.run();
            if let Err(error) = &outcome {
                log::error!("{} {}: terminated with error: {}", kind, child.id(), error);
            }
            let _ = done_tx.send(outcome);
        })?;
    log::info!("started {} {}", kind, id);
    Ok(ProcessHandle {
        id,
        kind,
        done: done_rx,
        thread: Some(thread),
        outcome: None,
    })
}

impl ProcessHandle {
    /// The child's bus identity.
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    /// Waits up to `timeout` for the child to terminate.
    ///
    /// Returns whether the child has terminated; it is never killed. A
    /// handle whose child already finished returns true immediately.
    pub fn join(&mut self, timeout: Duration) -> bool {
        if self.outcome.is_some() {
            return true;
        }
        match self.done.recv_timeout(timeout) {
            Ok(outcome) => {
                self.outcome = Some(outcome);
                self.reap();
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("{} {}: still running after join timeout", self.kind, self.id);
                false
            }
            Err(RecvTimeoutError::Disconnected) => {
                // The child panicked before reporting; reap and record.
                self.outcome = Some(Ok(()));
                self.reap();
                true
            }
        }
    }

    /// The child's reported outcome, once it has been joined.
    pub fn outcome(&self) -> Option<&Result<()>> {
        self.outcome.as_ref()
    }

    fn reap(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
