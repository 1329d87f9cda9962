//! Channel: a FIFO plus its two independently-stated ends. Grounded in
//! `smxch.h`'s `smx_channel_s`/`smx_channel_end_s` pair, generalized from
//! the teacher's single-threaded `FifoBuffer` into a genuinely blocking,
//! multi-thread-safe structure via `Mutex`+`Condvar`.
//!
//! Naming follows the glossary literally: the **source** end faces the
//! consumer — it is the producer's "there is data" signal, and readers
//! wait on it. The **sink** end faces the producer — it is the
//! consumer's "there is space" signal, and writers wait on it. A design
//! simplification from the one-mutex-per-end ideal: both ends and the
//! FIFO share one mutex here, with two condvars (one per end) layered on
//! top, rather than three independent mutexes. This keeps every state
//! transition trivially atomic with the FIFO mutation that causes it,
//! at the cost of the literal "FIFO mutex -> source-end mutex -> sink-end
//! mutex" nesting order the design notes describe; see DESIGN.md.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::Instant;

use crate::collector::Collector;
use crate::error::ChannelError;
use crate::fifo::{Discipline, Fifo};
use crate::guard::{Guard, GuardOutcome};
use crate::message::Message;
use crate::profiler::{ChannelEvent, ProfilerHandle};

static NEXT_CHANNEL_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u32);

impl ChannelId {
    fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ch({})", self.0)
    }
}

/// The liveness state of one end of a channel. `End` is absorbing: once
/// observed, an end never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndState {
    Uninitialised,
    Pending,
    Ready,
    End,
}

pub enum WriteOutcome {
    Written,
    Dismissed,
}

struct ChannelInner {
    fifo: Fifo,
    /// Faces the consumer: set by writes, watched by reads.
    source: EndState,
    /// Faces the producer: set by reads, watched by writes.
    sink: EndState,
}

/// A bounded, typed channel between exactly one producing net and one
/// consuming net (or routing node / temporal firewall).
pub struct Channel {
    id: ChannelId,
    name: String,
    inner: Mutex<ChannelInner>,
    source_cond: Condvar,
    sink_cond: Condvar,
    guard: Option<Guard>,
    profiler: ProfilerHandle,
    /// Non-owning handle to the collector this channel feeds, if any. Set
    /// after construction by `Collector::with_profiler` for each of its
    /// members, per §3's "does NOT own its collector... member channels
    /// hold a non-owning handle."
    collector: Mutex<Option<Weak<Collector>>>,
}

impl Channel {
    pub fn new(name: impl Into<String>, discipline: Discipline, capacity: usize) -> Arc<Self> {
        Self::with_guard_and_profiler(name, discipline, capacity, None, ProfilerHandle::disabled())
    }

    pub fn with_guard_and_profiler(
        name: impl Into<String>,
        discipline: Discipline,
        capacity: usize,
        guard: Option<Guard>,
        profiler: ProfilerHandle,
    ) -> Arc<Self> {
        // FIFO_D/D_FIFO_D start UNINITIALISED: the consumer must never
        // block on empty, only observe "nothing available". FIFO/D_FIFO
        // start PENDING: a read blocks until the first write.
        let source = if discipline.decouples_read() {
            EndState::Uninitialised
        } else {
            EndState::Pending
        };
        Arc::new(Self {
            id: ChannelId::next(),
            name: name.into(),
            inner: Mutex::new(ChannelInner {
                fifo: Fifo::new(discipline, capacity),
                source,
                sink: EndState::Ready,
            }),
            source_cond: Condvar::new(),
            sink_cond: Condvar::new(),
            guard,
            profiler,
            collector: Mutex::new(None),
        })
    }

    /// Register this channel as a member of `collector`. Called once by
    /// `Collector::with_profiler` for each of its member channels so that
    /// writes can emit `WriteCollector` and wake the collector's wait loop
    /// per §4.3's write contract.
    pub fn set_collector(&self, collector: Weak<Collector>) {
        *self.collector.lock().unwrap_or_else(|e| e.into_inner()) = Some(collector);
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, ChannelInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn discipline(&self) -> Discipline {
        self.lock().fifo.discipline()
    }

    pub fn source_state(&self) -> EndState {
        self.lock().source
    }

    pub fn sink_state(&self) -> EndState {
        self.lock().sink
    }

    /// `write`: fails if the sink has ended; for non-decoupled-write
    /// disciplines (FIFO/FIFO_D) waits while the sink is pending (no
    /// space); applies the guard; enqueues (overwriting the oldest unread
    /// message instead of waiting, for D_FIFO/D_FIFO_D); then updates both
    /// ends per §4.1.
    pub fn write(&self, msg: Message) -> Result<WriteOutcome, ChannelError> {
        if self.lock().sink == EndState::End {
            return Err(ChannelError::WriteAfterEnd(msg));
        }

        let decouples_write = self.lock().fifo.discipline().decouples_write();

        // Decoupled-write channels never wait for space: a full ring is
        // overwritten instead, so the writer skips the pending-wait
        // entirely (§4.1: "Overwrite (D_*): no state change — queue was
        // already full, stays full until a reader runs"). Waiting here
        // unconditionally would deadlock such a channel forever once its
        // ring fills with no reader draining it.
        if !decouples_write {
            let mut inner = self.lock();
            let mut blocked = false;
            loop {
                match inner.sink {
                    EndState::End => return Err(ChannelError::WriteAfterEnd(msg)),
                    EndState::Pending => {
                        if !blocked {
                            self.profiler.emit_channel(self.id, ChannelEvent::WriteBlock);
                            blocked = true;
                        }
                        inner = self.sink_cond.wait(inner).unwrap_or_else(|e| e.into_inner());
                    }
                    EndState::Uninitialised | EndState::Ready => break,
                }
            }
        }

        if let Some(guard) = &self.guard {
            if matches!(guard.gate(), GuardOutcome::Dismissed) {
                self.profiler.emit_channel(self.id, ChannelEvent::Dismiss);
                return Ok(WriteOutcome::Dismissed);
            }
        }

        let mut inner = self.lock();
        if inner.sink == EndState::End {
            return Err(ChannelError::WriteAfterEnd(msg));
        }

        let overwrote = if decouples_write {
            let before = inner.fifo.overwrite_count();
            inner.fifo.push_overwrite(msg);
            inner.fifo.overwrite_count() != before
        } else {
            inner
                .fifo
                .try_push(msg)
                .expect("sink not Pending implies the FIFO has space under the same lock");
            false
        };

        if inner.fifo.is_full() && inner.sink != EndState::End {
            inner.sink = EndState::Pending;
        }
        if inner.source != EndState::End {
            inner.source = EndState::Ready;
        }
        drop(inner);
        self.source_cond.notify_all();
        if overwrote {
            self.profiler.emit_channel(self.id, ChannelEvent::Overwrite);
        }
        self.profiler.emit_channel(self.id, ChannelEvent::Write);

        // §4.3: a write to a collector-member channel wakes the
        // collector's wait and is reported as its own event, distinct
        // from the plain `Write` above.
        let collector = self.collector.lock().unwrap_or_else(|e| e.into_inner()).as_ref().and_then(Weak::upgrade);
        if let Some(collector) = collector {
            collector.notify();
            self.profiler.emit_channel(self.id, ChannelEvent::WriteCollector);
        }

        Ok(WriteOutcome::Written)
    }

    /// Blocking read per §4.3/§4.1. Returns `None` for
    /// `ReadUninitialisedNoDefault` (a non-decoupled-read channel that
    /// has never been written to) and once the source has ended and
    /// drained.
    pub fn read(&self) -> Option<Message> {
        self.read_inner(true)
    }

    /// Non-blocking read: used by the routing node's fan-in scan and the
    /// temporal firewall's non-blocking propagation. Never waits.
    pub fn try_read(&self) -> Option<Message> {
        self.read_inner(false)
    }

    fn read_inner(&self, block: bool) -> Option<Message> {
        let mut inner = self.lock();
        let mut blocked = false;
        loop {
            let decouples_read = inner.fifo.discipline().decouples_read();

            if inner.source == EndState::Uninitialised && !decouples_read {
                return None;
            }
            if inner.source == EndState::Pending {
                if !block {
                    return None;
                }
                if !blocked {
                    self.profiler.emit_channel(self.id, ChannelEvent::ReadBlock);
                    blocked = true;
                }
                inner = self.source_cond.wait(inner).unwrap_or_else(|e| e.into_inner());
                continue;
            }

            let copies_before = inner.fifo.copy_count();
            let msg = if decouples_read {
                inner.fifo.pop_decoupled()
            } else {
                inner.fifo.try_pop()
            };
            let duplicated = decouples_read && inner.fifo.copy_count() != copies_before;

            if let Some(msg) = msg {
                if !decouples_read && inner.fifo.is_empty() && inner.source != EndState::End {
                    inner.source = EndState::Pending;
                }
                if inner.sink != EndState::End {
                    inner.sink = EndState::Ready;
                }
                drop(inner);
                self.sink_cond.notify_all();
                if duplicated {
                    self.profiler.emit_channel(self.id, ChannelEvent::Duplicate);
                }
                self.profiler.emit_channel(self.id, ChannelEvent::Read);
                return Some(msg);
            }

            if inner.source == EndState::End || decouples_read {
                // Source drained-and-ended, or a decoupled-read channel
                // with no backup yet: never blocks, return "nothing".
                return None;
            }

            if !block {
                return None;
            }

            // READY but empty: an internal invariant violation per §7.
            // Log it and fall back to waiting rather than spinning.
            log::error!("channel '{}' reported READY but the FIFO was empty", self.name);
            inner = self.source_cond.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn has_data(&self) -> bool {
        let inner = self.lock();
        !inner.fifo.is_empty() || inner.fifo.has_backup()
    }

    /// Whether the FIFO ring itself holds an unread message, ignoring the
    /// decoupled-read backup. The backup persists indefinitely once set
    /// (every `pop_decoupled` refreshes it), so `has_data` never goes false
    /// again on a `FifoD`/`DFifoD` channel once it has been read at least
    /// once; drain checks that mean "the ring is empty" (§4.6 step 2's
    /// `in.fifo.count==0`) must use this instead.
    pub fn fifo_is_empty(&self) -> bool {
        self.lock().fifo.is_empty()
    }

    /// Peek the creation timestamp of the next message a read would
    /// return, without consuming it. Used by the oldest-timestamp
    /// collector ordering.
    pub fn peek_created_at(&self) -> Option<Instant> {
        self.lock().fifo.peek_front().map(Message::created_at)
    }

    /// Called by the producing net when it has no more messages to
    /// send: transitions this channel's source to END, waking any
    /// blocked reader.
    pub fn signal_source_end(&self) {
        let mut inner = self.lock();
        inner.source = EndState::End;
        drop(inner);
        self.source_cond.notify_all();
        self.profiler.emit_channel(self.id, ChannelEvent::SourceEnd);
    }

    /// Called by the consuming net when it will read no more:
    /// transitions this channel's sink to END, waking any blocked
    /// writer so its write aborts.
    pub fn signal_sink_end(&self) {
        let mut inner = self.lock();
        inner.sink = EndState::End;
        drop(inner);
        self.sink_cond.notify_all();
        self.profiler.emit_channel(self.id, ChannelEvent::SinkEnd);
    }

    pub fn overwrite_count(&self) -> u64 {
        self.lock().fifo.overwrite_count()
    }

    pub fn copy_count(&self) -> u64 {
        self.lock().fifo.copy_count()
    }

    /// Clear this channel's duplication counter. Used by the temporal
    /// firewall once it has read the counter to decide whether this tick
    /// served a duplicate (§4.6 step 5).
    pub fn reset_copy_count(&self) {
        self.lock().fifo.reset_copy_count();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::BytesPayload;
    use crate::profiler::{ProfilerEvent, ProfilerHandle, RingBufferSink};
    use std::thread;

    #[test]
    fn write_then_read_round_trips() {
        let ch = Channel::new("ch", Discipline::Fifo, 4);
        ch.write(Message::new(BytesPayload(vec![9]))).unwrap();
        let got = ch.read().unwrap();
        assert_eq!(got.unpack::<BytesPayload>().unwrap().0, vec![9]);
    }

    #[test]
    fn read_returns_none_after_source_end_and_drain() {
        let ch = Channel::new("ch", Discipline::Fifo, 4);
        ch.write(Message::new(BytesPayload(vec![1]))).unwrap();
        ch.signal_source_end();
        assert!(ch.read().is_some());
        assert!(ch.read().is_none());
    }

    #[test]
    fn read_before_any_write_returns_none_on_non_decoupled_channel() {
        let ch = Channel::new("ch", Discipline::Fifo, 4);
        assert_eq!(ch.source_state(), EndState::Pending);
        assert!(ch.try_read().is_none());
    }

    #[test]
    fn write_after_sink_end_is_rejected() {
        let ch = Channel::new("ch", Discipline::Fifo, 1);
        ch.signal_sink_end();
        let err = ch.write(Message::new(BytesPayload(vec![1]))).unwrap_err();
        assert!(matches!(err, ChannelError::WriteAfterEnd(_)));
    }

    #[test]
    fn blocking_read_wakes_on_write_from_another_thread() {
        let ch = Channel::new("ch", Discipline::Fifo, 1);
        let reader = {
            let ch = ch.clone();
            thread::spawn(move || ch.read())
        };
        thread::sleep(std::time::Duration::from_millis(20));
        ch.write(Message::new(BytesPayload(vec![5]))).unwrap();
        let got = reader.join().unwrap().unwrap();
        assert_eq!(got.unpack::<BytesPayload>().unwrap().0, vec![5]);
    }

    #[test]
    fn blocking_write_wakes_on_read_from_another_thread_once_full() {
        let ch = Channel::new("ch", Discipline::Fifo, 1);
        ch.write(Message::new(BytesPayload(vec![1]))).unwrap();
        assert_eq!(ch.sink_state(), EndState::Pending);

        let writer = {
            let ch = ch.clone();
            thread::spawn(move || ch.write(Message::new(BytesPayload(vec![2]))))
        };
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(ch.read().unwrap().unpack::<BytesPayload>().unwrap().0, vec![1]);
        writer.join().unwrap().unwrap();
        assert_eq!(ch.read().unwrap().unpack::<BytesPayload>().unwrap().0, vec![2]);
    }

    #[test]
    fn decoupled_write_never_blocks_once_the_ring_is_full() {
        // D_FIFO must overwrite rather than wait, even though the sink
        // end reports Pending once the ring is full and no reader ever
        // drains it — this used to deadlock before the writer skipped
        // the pending-wait for decoupled-write disciplines.
        let ch = Channel::new("ch", Discipline::DFifo, 1);
        ch.write(Message::new(BytesPayload(vec![1]))).unwrap();
        assert_eq!(ch.sink_state(), EndState::Pending);
        ch.write(Message::new(BytesPayload(vec![2]))).unwrap();
        assert_eq!(ch.overwrite_count(), 1);
        assert_eq!(ch.read().unwrap().unpack::<BytesPayload>().unwrap().0, vec![2]);
    }

    #[test]
    fn decoupled_read_channel_never_blocks_before_first_write() {
        let ch = Channel::new("ch", Discipline::FifoD, 2);
        assert_eq!(ch.source_state(), EndState::Uninitialised);
        assert!(ch.try_read().is_none());
    }

    #[test]
    fn profiler_observes_write_overwrite_and_duplicate_read() {
        let sink = RingBufferSink::new(16);
        let ch = Channel::with_guard_and_profiler("ch", Discipline::DFifoD, 1, None, ProfilerHandle::new(sink.clone()));

        ch.write(Message::new(BytesPayload(vec![1]))).unwrap();
        ch.write(Message::new(BytesPayload(vec![2]))).unwrap(); // overwrites
        ch.read().unwrap(); // fresh
        ch.read().unwrap(); // duplicate of the backup

        let events: Vec<_> = sink
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                ProfilerEvent::Channel { event, .. } => Some(event),
                _ => None,
            })
            .collect();

        assert!(events.contains(&ChannelEvent::Overwrite));
        assert!(events.contains(&ChannelEvent::Duplicate));
        assert_eq!(events.iter().filter(|e| **e == ChannelEvent::Write).count(), 2);
        assert_eq!(events.iter().filter(|e| **e == ChannelEvent::Read).count(), 2);
    }
}
