// src/relay.rs
//
// Fire-and-forget relay of the dock state to an external light controller.
// Runs on its own worker thread so a slow or unreachable controller can
// never stall video processing. Unchanged states are deduplicated; a full
// queue drops the update (the next state change republishes anyway).

use std::io::Write;
use std::net::TcpStream;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Sender, TrySendError};
use tracing::{info, warn};

use crate::types::DockState;

const QUEUE_CAPACITY: usize = 8;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub trait StatusRelay: Send {
    fn publish(&mut self, state: DockState) -> Result<()>;
}

/// Writes one status line per state change to a TCP endpoint.
/// Reconnects lazily; a dead connection is dropped and retried on the
/// next publish.
pub struct TcpLineRelay {
    addr: String,
    stream: Option<TcpStream>,
}

impl TcpLineRelay {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
        }
    }

    fn open_stream(&self) -> Result<TcpStream> {
        let addr = self
            .addr
            .parse()
            .with_context(|| format!("invalid relay address {:?}", self.addr))?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .with_context(|| format!("connecting to relay {}", self.addr))?;
        info!("✓ Relay connected to {}", self.addr);
        Ok(stream)
    }
}

impl StatusRelay for TcpLineRelay {
    fn publish(&mut self, state: DockState) -> Result<()> {
        if self.stream.is_none() {
            self.stream = Some(self.open_stream()?);
        }
        let result = match self.stream.as_mut() {
            Some(s) => writeln!(s, "{}", state.as_str()).context("writing status line"),
            None => Ok(()),
        };
        if result.is_err() {
            self.stream = None;
        }
        result
    }
}

/// Owns the relay worker thread and its bounded command queue.
pub struct RelayWorker {
    tx: Option<Sender<DockState>>,
    last_queued: Mutex<Option<DockState>>,
    handle: Option<JoinHandle<()>>,
}

impl RelayWorker {
    pub fn spawn(mut relay: Box<dyn StatusRelay>) -> Self {
        let (tx, rx) = bounded::<DockState>(QUEUE_CAPACITY);
        let handle = thread::spawn(move || {
            // Exits when the sender side is dropped.
            for state in rx {
                if let Err(e) = relay.publish(state) {
                    warn!("Relay publish failed ({}): {e:#}", state.as_str());
                }
            }
        });

        Self {
            tx: Some(tx),
            last_queued: Mutex::new(None),
            handle: Some(handle),
        }
    }

    /// Queues a state for relay if it differs from the last queued state.
    /// Never blocks.
    pub fn update(&self, state: DockState) {
        let mut last = self
            .last_queued
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if *last == Some(state) {
            return;
        }
        *last = Some(state);

        if let Some(tx) = &self.tx {
            match tx.try_send(state) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Relay queue full, dropping {} update", state.as_str())
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }

    /// Flushes the queue and joins the worker.
    pub fn shutdown(mut self) {
        self.tx.take(); // disconnect, worker drains and exits
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RelayWorker {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct RecordingRelay {
        sent: mpsc::Sender<DockState>,
    }

    impl StatusRelay for RecordingRelay {
        fn publish(&mut self, state: DockState) -> Result<()> {
            self.sent.send(state).unwrap();
            Ok(())
        }
    }

    struct FailingRelay;

    impl StatusRelay for FailingRelay {
        fn publish(&mut self, _state: DockState) -> Result<()> {
            anyhow::bail!("controller unreachable")
        }
    }

    #[test]
    fn test_relays_state_changes_and_dedups_repeats() {
        let (tx, rx) = mpsc::channel();
        let worker = RelayWorker::spawn(Box::new(RecordingRelay { sent: tx }));

        worker.update(DockState::Ok);
        worker.update(DockState::Ok);
        worker.update(DockState::Warning);
        worker.update(DockState::Warning);
        worker.update(DockState::Violation);
        worker.shutdown();

        let received: Vec<DockState> = rx.try_iter().collect();
        assert_eq!(
            received,
            vec![DockState::Ok, DockState::Warning, DockState::Violation]
        );
    }

    #[test]
    fn test_relay_failure_does_not_panic_or_block() {
        let worker = RelayWorker::spawn(Box::new(FailingRelay));
        worker.update(DockState::Violation);
        worker.update(DockState::Ok);
        worker.shutdown();
    }
}
