//! Notifications from the processing side to the control side.
//!
//! The real-time thread never blocks on a full queue: events are posted with
//! `try_send` and dropped (and counted) when the control side falls behind.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::error::{GraphCompilationError, NodeFault, Xrun};
use crate::graph::NodeId;
use crate::port::PortId;
use crate::track::StageRef;

/// Something the control thread may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A control value was changed through the engine.
    ControlChanged {
        /// Port whose base value changed.
        port: PortId,
        /// Stored (clamped) value.
        value: f32,
    },
    /// A processor faulted and was disabled.
    NodeFault {
        /// Graph node that hosted the processor.
        node: NodeId,
        /// Stage slot, when the processor lives inside a channel strip.
        stage: Option<StageRef>,
        /// Reported failure.
        fault: NodeFault,
    },
    /// A cycle overran its deadline.
    Xrun(Xrun),
    /// A freshly compiled graph replaced the previous one.
    GraphInstalled {
        /// Monotonic compile generation.
        generation: u64,
        /// Nodes in the installed schedule.
        nodes: usize,
    },
    /// Background compilation failed; the previous graph keeps running.
    CompileFailed {
        /// Generation that failed.
        generation: u64,
        /// Why.
        error: GraphCompilationError,
    },
}

/// Cloneable, non-blocking event producer.
#[derive(Clone, Debug)]
pub(crate) struct EventSender {
    tx: Sender<EngineEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Post an event; drops it if the queue is full or closed.
    pub(crate) fn post(&self, event: EngineEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events lost to a full queue.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Bounded event queue of `capacity` entries.
pub(crate) fn event_channel(capacity: usize) -> (EventSender, Receiver<EngineEvent>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (
        EventSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_drops_and_counts() {
        let (tx, rx) = event_channel(2);
        for i in 0..5 {
            tx.post(EngineEvent::ControlChanged {
                port: PortId(i),
                value: 0.0,
            });
        }
        assert_eq!(rx.try_iter().count(), 2);
        assert_eq!(tx.dropped(), 3);
    }
}
