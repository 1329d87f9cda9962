//! The message envelope passed through channels.
//!
//! The original C runtime attaches `copy`/`destroy`/`unpack` function
//! pointers to every message. `destroy` maps directly onto `Drop` here —
//! ownership already guarantees it runs exactly once — so only `copy`
//! (`Payload::deep_copy`) and `unpack` (`Payload::as_any`) need a trait.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u64);

impl MessageId {
    fn next() -> Self {
        Self(NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Msg({})", self.0)
    }
}

/// A message payload. Implementors provide the "copy" and "unpack" hooks
/// from the original runtime's `smx_msg_s`; "destroy" is just `Drop`.
pub trait Payload: Send {
    /// Deep-copy the payload, used by the routing node and decoupled read
    /// when a message must be duplicated rather than moved.
    fn deep_copy(&self) -> Box<dyn Payload>;

    /// Expose the payload for downstream unpacking without consuming it.
    fn as_any(&self) -> &dyn Any;

    /// Size in bytes, used for profiler accounting. Default is unknown (0).
    fn size(&self) -> usize {
        0
    }
}

/// The default payload: an owned byte buffer, mirroring the runtime's
/// built-in byte-copy default for messages that don't supply custom hooks.
#[derive(Debug, Clone)]
pub struct BytesPayload(pub Vec<u8>);

impl Payload for BytesPayload {
    fn deep_copy(&self) -> Box<dyn Payload> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn size(&self) -> usize {
        self.0.len()
    }
}

/// A message in flight through the dataflow network.
pub struct Message {
    id: MessageId,
    payload: Box<dyn Payload>,
    is_profiler: bool,
    created_at: Instant,
}

impl Message {
    pub fn new(payload: impl Payload + 'static) -> Self {
        Self {
            id: MessageId::next(),
            payload: Box::new(payload),
            is_profiler: false,
            created_at: Instant::now(),
        }
    }

    pub fn from_boxed(payload: Box<dyn Payload>) -> Self {
        Self {
            id: MessageId::next(),
            payload,
            is_profiler: false,
            created_at: Instant::now(),
        }
    }

    /// Creation time, used by the profiler collector's oldest-first merge
    /// order (`box_smx_profiler.c`'s "read order is oldest message first").
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Mark this message as a profiler-channel message. The profiler
    /// collector uses this to distinguish its own traffic from user data.
    pub fn mark_profiler(mut self) -> Self {
        self.is_profiler = true;
        self
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn is_profiler(&self) -> bool {
        self.is_profiler
    }

    pub fn size(&self) -> usize {
        self.payload.size()
    }

    pub fn payload(&self) -> &dyn Payload {
        self.payload.as_ref()
    }

    pub fn unpack<T: 'static>(&self) -> Option<&T> {
        self.payload.as_any().downcast_ref::<T>()
    }

    /// Deep-copy this message into a brand new one with a fresh id, per
    /// the routing node's "every output but the last gets a copy" rule.
    pub fn deep_copy(&self) -> Message {
        Message {
            id: MessageId::next(),
            payload: self.payload.deep_copy(),
            is_profiler: self.is_profiler,
            created_at: Instant::now(),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("size", &self.size())
            .field("is_profiler", &self.is_profiler)
            .finish()
    }
}
