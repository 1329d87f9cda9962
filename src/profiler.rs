//! Profiler event emission. Grounded in `box_smx_profiler.c`/`.h` (the
//! profiler is itself a collector-based fan-in net forwarding to an
//! external backend) and the teacher's `kernel/trace.rs` bounded-ring
//! tracer. Emission is value-typed and non-blocking: a disabled handle
//! costs one branch, never an allocation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::channel::ChannelId;
use crate::message::MessageId;
use crate::net::NetId;

/// Channel-family events, named after spec.md §6's literal event list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    Read,
    ReadBlock,
    ReadCollector,
    ReadCollectorBlock,
    Write,
    WriteBlock,
    WriteCollector,
    Overwrite,
    Dismiss,
    Duplicate,
    /// Deadline miss detected on the source side of a temporal firewall
    /// pair: the tick found nothing to propagate.
    DlMissSrc,
    /// As `DlMissSrc`, but a duplicate of the backup was served instead of
    /// fresh data (decoupled-read input).
    DlMissSrcCp,
    /// Deadline miss detected on the sink side: the write to the output
    /// overwrote an unread message.
    DlMissSink,
    /// The temporal firewall's own periodic tick fired late; this pair's
    /// input was serviced behind schedule.
    TtMissSrc,
    /// As `TtMissSrc`, serviced with a duplicate (decoupled-read input).
    TtMissSrcCp,
    /// The temporal firewall's own periodic tick fired late; this pair's
    /// output was serviced behind schedule.
    TtMissSink,
    /// Not named in spec.md §6's literal list, kept as an extension so an
    /// external sink can observe the absorbing END transition directly
    /// rather than inferring it from the absence of further Read/Write.
    SourceEnd,
    SinkEnd,
}

/// Net-family events, matching spec.md §6's `{START, START_IMPL, END_IMPL,
/// END}` literally: `Start`/`End` bracket the whole thread lifetime,
/// `StartImpl`/`EndImpl` bracket each call into the net's `step` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetEvent {
    Start,
    StartImpl,
    EndImpl,
    End,
}

/// Message-family events, matching spec.md §6's `{CREATE, DESTROY,
/// COPY_START, COPY_END}`. The core's own deep-copy sites (the routing
/// node's fan-out, a decoupled-read backup duplication) emit `CopyStart`/
/// `CopyEnd`; `Create`/`Destroy` are left for a net implementation to emit
/// around its own `Message::new` calls and drops, since `Message` itself
/// intentionally carries no profiler handle (see `message.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageEvent {
    Create,
    Destroy,
    CopyStart,
    CopyEnd,
}

#[derive(Debug, Clone, Copy)]
pub enum ProfilerEvent {
    Channel {
        at: Instant,
        channel: ChannelId,
        event: ChannelEvent,
    },
    Net {
        at: Instant,
        net: NetId,
        event: NetEvent,
    },
    Message {
        at: Instant,
        message: MessageId,
        event: MessageEvent,
    },
}

impl ProfilerEvent {
    pub fn at(&self) -> Instant {
        match self {
            ProfilerEvent::Channel { at, .. }
            | ProfilerEvent::Net { at, .. }
            | ProfilerEvent::Message { at, .. } => *at,
        }
    }
}

/// Implemented by an externally-supplied profiler net/backend. The core
/// never requires one; the default `RingBufferSink` below is provided for
/// tests and for consumers happy with an in-process ring.
pub trait ProfilerSink: Send + Sync {
    fn emit(&self, event: ProfilerEvent);
}

/// A bounded in-process sink. Oldest events are evicted once full,
/// mirroring the teacher's `TRACE_BUFFER_SIZE`-bounded tracer.
pub struct RingBufferSink {
    capacity: usize,
    events: Mutex<VecDeque<ProfilerEvent>>,
}

impl RingBufferSink {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        })
    }

    pub fn drain(&self) -> Vec<ProfilerEvent> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProfilerSink for RingBufferSink {
    fn emit(&self, event: ProfilerEvent) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Held by channels/nets/collectors; cheap to clone, cheap to check.
#[derive(Clone)]
pub struct ProfilerHandle(Option<Arc<dyn ProfilerSink>>);

impl ProfilerHandle {
    pub fn disabled() -> Self {
        Self(None)
    }

    pub fn new(sink: Arc<dyn ProfilerSink>) -> Self {
        Self(Some(sink))
    }

    pub fn emit_channel(&self, channel: ChannelId, event: ChannelEvent) {
        if let Some(sink) = &self.0 {
            sink.emit(ProfilerEvent::Channel {
                at: Instant::now(),
                channel,
                event,
            });
        }
    }

    pub fn emit_net(&self, net: NetId, event: NetEvent) {
        if let Some(sink) = &self.0 {
            sink.emit(ProfilerEvent::Net {
                at: Instant::now(),
                net,
                event,
            });
        }
    }

    pub fn emit_message(&self, message: MessageId, event: MessageEvent) {
        if let Some(sink) = &self.0 {
            sink.emit(ProfilerEvent::Message {
                at: Instant::now(),
                message,
                event,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_evicts_oldest_past_capacity() {
        let sink = RingBufferSink::new(2);
        let handle = ProfilerHandle::new(sink.clone());
        for _ in 0..3 {
            handle.emit_net(NetId::from_raw(1), NetEvent::StartImpl);
        }
        assert_eq!(sink.len(), 2);
    }
}
