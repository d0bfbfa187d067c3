//! Broadcast Loop
//!
//! Runs once per tick on the session driver:
//!
//! 1. Move pending connection backlogs along.
//! 2. Sample the local participant into one UPDATE and send it to every
//!    open connection. Sent unconditionally as a heartbeat.
//! 3. Drain the outgoing queue and send each discrete message once.
//!    Nothing is retried.
//!
//! Also owns the delayed resets for the attack and throw flags.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;

use crate::game::state::{EntityStore, TransientFlag};
use crate::network::connections::ConnectionSet;
use crate::network::protocol::NetworkMessage;

/// How long the throw flag stays raised.
pub const THROW_DURATION: Duration = Duration::from_millis(300);

/// What one tick sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Connections the heartbeat went out on.
    pub heartbeat_frames: usize,
    /// Discrete messages drained from the queue.
    pub drained: usize,
    /// Frames written for drained messages.
    pub event_frames: usize,
}

fn encode(msg: &NetworkMessage) -> Option<String> {
    match msg.to_json() {
        Ok(text) => Some(text),
        Err(e) => {
            error!("Failed to serialize {}: {}", msg.kind(), e);
            None
        }
    }
}

/// Run one broadcast tick.
pub fn tick(store: &mut EntityStore, conns: &mut ConnectionSet) -> TickReport {
    let mut report = TickReport::default();
    conns.flush();

    if let Some(text) = store.heartbeat().map(NetworkMessage::update).as_ref().and_then(encode) {
        report.heartbeat_frames = conns.broadcast(&text, None);
    }

    let queued = store.drain_outgoing();
    report.drained = queued.len();
    for msg in &queued {
        if let Some(text) = encode(msg) {
            report.event_frames += conns.broadcast(&text, None);
            #[cfg(feature = "debug-tracing")]
            tracing::trace!("Sent {} to {} peer(s)", msg.kind(), conns.len());
        }
    }

    report
}

// =============================================================================
// DELAYED RESETS
// =============================================================================

/// A reset that fired: the flag and the generation it was scheduled under.
pub type FlagReset = (TransientFlag, u64);

/// Independent one-shot timers that lower a transient flag after a delay.
///
/// Re-arming a flag cancels its pending reset. Each arm gets a new
/// generation so a reset that fired just before being cancelled is ignored.
#[derive(Debug)]
pub struct ActionTimers {
    resets: mpsc::UnboundedSender<FlagReset>,
    pending: BTreeMap<TransientFlag, (u64, JoinHandle<()>)>,
    generation: u64,
}

impl ActionTimers {
    /// Timers reporting on `resets`.
    pub fn new(resets: mpsc::UnboundedSender<FlagReset>) -> Self {
        Self {
            resets,
            pending: BTreeMap::new(),
            generation: 0,
        }
    }

    /// Schedule `flag` to be lowered after `delay`.
    pub fn arm(&mut self, flag: TransientFlag, delay: Duration) {
        self.cancel(flag);

        self.generation += 1;
        let generation = self.generation;
        let resets = self.resets.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = resets.send((flag, generation));
        });
        self.pending.insert(flag, (generation, task));
    }

    /// Cancel a pending reset.
    pub fn cancel(&mut self, flag: TransientFlag) {
        if let Some((_, task)) = self.pending.remove(&flag) {
            task.abort();
        }
    }

    /// Accept a fired reset if it is still the current one.
    pub fn take(&mut self, (flag, generation): FlagReset) -> bool {
        match self.pending.get(&flag) {
            Some((current, _)) if *current == generation => {
                self.pending.remove(&flag);
                true
            }
            _ => false,
        }
    }

    /// Whether a reset is pending for `flag`.
    pub fn is_pending(&self, flag: TransientFlag) -> bool {
        self.pending.contains_key(&flag)
    }
}

impl Drop for ActionTimers {
    fn drop(&mut self) {
        for (_, (_, task)) in std::mem::take(&mut self.pending) {
            task.abort();
        }
    }
}
