//! Routes application events to the pending request that owns their stream.

use crate::error::{H3Error, H3Result};
use crate::event::{H3Event, StreamId};
use crate::lifecycle::{CompletionHandle, PendingRequests};
use log::{debug, trace};

/// What happened to a routed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Appended to a pending entry that is still open.
    Buffered,
    /// Appended, and the entry resolved because the stream ended.
    Completed,
    /// The entry resolved with an error.
    Failed,
    /// No pending entry for the stream.
    Dropped,
}

/// Synchronous event router. Runs inside the connection driver and never
/// suspends, so events for a stream are routed in arrival order.
#[derive(Default)]
pub struct StreamRouter {
    pending: PendingRequests,
}

impl StreamRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, stream_id: StreamId) -> H3Result<CompletionHandle> {
        self.pending.begin(stream_id)
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingRequests {
        &mut self.pending
    }

    /// Route every application event produced by one transport notification.
    pub fn on_transport_event<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = H3Event>,
    {
        for event in events {
            self.route(event);
        }
    }

    pub fn route(&mut self, event: H3Event) -> RouteOutcome {
        let stream_id = event.stream_id();
        if !self.pending.is_pending(stream_id) {
            trace!(
                "dropping {} event for untracked stream {}",
                event.kind(),
                stream_id
            );
            return RouteOutcome::Dropped;
        }
        debug!("routing {} event to stream {}", event.kind(), stream_id);

        if let H3Event::StreamReset { code, .. } = event {
            self.pending
                .fail(stream_id, H3Error::StreamReset { stream_id, code });
            return RouteOutcome::Failed;
        }

        let ended = event.stream_ended();
        self.pending.append(event);
        if ended {
            self.pending.complete(stream_id);
            RouteOutcome::Completed
        } else {
            RouteOutcome::Buffered
        }
    }
}
