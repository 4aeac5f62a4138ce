//! Pending request bookkeeping: one entry per in-flight stream, resolved once.

use crate::error::{H3Error, H3Result};
use crate::event::{H3Event, StreamId};
use log::{debug, trace};
use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// What a completion handle resolves to: the stream's events in arrival order.
pub type Completion = H3Result<Vec<H3Event>>;

struct PendingEntry {
    events: Vec<H3Event>,
    signal: oneshot::Sender<Completion>,
}

/// Stream id to pending request mapping.
///
/// Entries are created when a request is issued and removed the moment their
/// stream ends, fails or is abandoned by the caller.
#[derive(Default)]
pub struct PendingRequests {
    entries: HashMap<StreamId, PendingEntry>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request on `stream_id` and hand back the handle to await.
    pub fn begin(&mut self, stream_id: StreamId) -> H3Result<CompletionHandle> {
        if self.entries.contains_key(&stream_id) {
            return Err(H3Error::DuplicateStream(stream_id));
        }
        let (signal, receiver) = oneshot::channel();
        self.entries.insert(
            stream_id,
            PendingEntry {
                events: Vec::new(),
                signal,
            },
        );
        debug!("stream {} pending", stream_id);
        Ok(CompletionHandle {
            stream_id,
            receiver,
        })
    }

    /// Append an event to its stream's entry. Returns false for untracked streams.
    pub fn append(&mut self, event: H3Event) -> bool {
        match self.entries.get_mut(&event.stream_id()) {
            Some(entry) => {
                entry.events.push(event);
                true
            }
            None => false,
        }
    }

    /// Resolve and remove the entry with its accumulated events.
    ///
    /// Unknown stream ids are a no-op: the stream already resolved or never began.
    pub fn complete(&mut self, stream_id: StreamId) -> bool {
        let Some(entry) = self.entries.remove(&stream_id) else {
            trace!("complete for untracked stream {}", stream_id);
            return false;
        };
        let count = entry.events.len();
        if entry.signal.send(Ok(entry.events)).is_err() {
            debug!("stream {} completed after its caller went away", stream_id);
        } else {
            debug!("stream {} completed with {} events", stream_id, count);
        }
        true
    }

    /// Resolve and remove the entry with an error.
    pub fn fail(&mut self, stream_id: StreamId, error: H3Error) -> bool {
        let Some(entry) = self.entries.remove(&stream_id) else {
            return false;
        };
        debug!("stream {} failed: {}", stream_id, error);
        let _ = entry.signal.send(Err(error));
        true
    }

    /// Drop the entry without resolving it.
    pub fn abandon(&mut self, stream_id: StreamId) -> bool {
        self.entries.remove(&stream_id).is_some()
    }

    /// Remove entries whose completion handle has been dropped.
    pub fn sweep(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|stream_id, entry| {
            let alive = !entry.signal.is_closed();
            if !alive {
                debug!("stream {} abandoned by its caller", stream_id);
            }
            alive
        });
        before - self.entries.len()
    }

    pub fn is_pending(&self, stream_id: StreamId) -> bool {
        self.entries.contains_key(&stream_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Single-resolution handle a caller awaits for one stream's response.
///
/// Resolves to [`H3Error::Closed`] if the owning bookkeeping is dropped first.
pub struct CompletionHandle {
    stream_id: StreamId,
    receiver: oneshot::Receiver<Completion>,
}

impl CompletionHandle {
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }
}

impl std::fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

impl Future for CompletionHandle {
    type Output = Completion;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(H3Error::Closed)))
    }
}
