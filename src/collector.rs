//! Fan-in collector shared by every channel feeding one consuming net,
//! grounded in `smxch.h`'s `smx_collector_s` (an aggregate counter plus a
//! mutex/condvar pair the member channels all signal into) and the
//! fairness rule from `box_smx_rn.h`: "remembers the last port index [...]
//! searches starting from last index + 1".

use std::sync::{Arc, Condvar, Mutex};

use crate::channel::Channel;
use crate::message::Message;
use crate::profiler::{ChannelEvent, ProfilerHandle};

/// How a collector picks among several ready channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOrder {
    /// Fair round-robin starting just past the last port served.
    RoundRobin,
    /// Oldest `Message::created_at` first, used by the profiler collector.
    OldestTimestamp,
}

struct CollectorState {
    last_index: usize,
}

/// Aggregates several channels into one blocking read, used by routing
/// nodes and any net with more than one input.
pub struct Collector {
    members: Vec<Arc<Channel>>,
    order: MergeOrder,
    state: Mutex<CollectorState>,
    condvar: Condvar,
    profiler: ProfilerHandle,
}

impl Collector {
    pub fn new(members: Vec<Arc<Channel>>, order: MergeOrder) -> Arc<Self> {
        Self::with_profiler(members, order, ProfilerHandle::disabled())
    }

    pub fn with_profiler(members: Vec<Arc<Channel>>, order: MergeOrder, profiler: ProfilerHandle) -> Arc<Self> {
        assert!(!members.is_empty(), "a collector needs at least one member channel");
        let collector = Arc::new(Self {
            members,
            order,
            state: Mutex::new(CollectorState { last_index: 0 }),
            condvar: Condvar::new(),
            profiler,
        });
        // Give each member a non-owning handle back to this collector so
        // its writes can emit `WriteCollector` and wake `read`'s wait
        // (§4.3's write contract; §3's "member channels hold a non-owning
        // handle" to their collector).
        let weak = Arc::downgrade(&collector);
        for member in &collector.members {
            member.set_collector(weak.clone());
        }
        collector
    }

    pub fn members(&self) -> &[Arc<Channel>] {
        &self.members
    }

    /// Every member channel's source has signalled `End` and drained.
    pub fn all_ended(&self) -> bool {
        // `fifo_is_empty`, not `has_data`: a decoupled-read member's backup
        // persists after its first read, so `has_data` would never agree
        // the member has drained.
        self.members
            .iter()
            .all(|ch| ch.source_state() == crate::channel::EndState::End && ch.fifo_is_empty())
    }

    /// Wake the collector after a member channel may have gained data.
    /// Channels call this internally via their own condvars; nets poll
    /// `read` in a loop so an explicit wake hook is only needed by the
    /// temporal firewall's non-blocking propagation path, which instead
    /// calls `try_read` directly. Kept for symmetry with the C API's
    /// `smx_collector_s` which every channel write posts to.
    pub fn notify(&self) {
        self.condvar.notify_all();
    }

    /// Read the next message from whichever member channel has data,
    /// applying this collector's merge order. Blocks until a message is
    /// available or every member has ended.
    pub fn read(&self) -> Option<Message> {
        let mut blocked = false;
        loop {
            if let Some(msg) = self.try_read() {
                return Some(msg);
            }
            if self.all_ended() {
                return None;
            }
            if !blocked {
                // Attribute the block to the last-served member, since
                // there is no single channel id that represents "the
                // collector" on its own.
                let last = self.state.lock().unwrap_or_else(|e| e.into_inner()).last_index;
                self.profiler.emit_channel(self.members[last].id(), ChannelEvent::ReadCollectorBlock);
                blocked = true;
            }
            // No member is ready right now; briefly sleep rather than
            // park indefinitely on a single channel's condvar, since the
            // collector spans several of them and any one could wake.
            let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let _ = self
                .condvar
                .wait_timeout(guard, std::time::Duration::from_millis(5))
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Non-blocking scan across members, honoring the merge order.
    /// Returns immediately with `None` if nothing is ready.
    pub fn try_read(&self) -> Option<Message> {
        let msg = match self.order {
            MergeOrder::RoundRobin => self.try_read_round_robin(),
            MergeOrder::OldestTimestamp => self.try_read_oldest(),
        };
        if let Some((channel, msg)) = msg {
            self.profiler.emit_channel(channel, ChannelEvent::ReadCollector);
            return Some(msg);
        }
        None
    }

    fn try_read_round_robin(&self) -> Option<(crate::channel::ChannelId, Message)> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let n = self.members.len();
        for offset in 1..=n {
            let idx = (state.last_index + offset) % n;
            if let Some(msg) = self.members[idx].try_read() {
                state.last_index = idx;
                return Some((self.members[idx].id(), msg));
            }
        }
        None
    }

    fn try_read_oldest(&self) -> Option<(crate::channel::ChannelId, Message)> {
        let mut best_idx = None;
        let mut best_ts = None;
        for (idx, ch) in self.members.iter().enumerate() {
            if let Some(ts) = ch.peek_created_at() {
                if best_ts.is_none_or(|b| ts < b) {
                    best_ts = Some(ts);
                    best_idx = Some(idx);
                }
            }
        }
        // The winning member may have been drained by another thread
        // between the peek and this call; that's fine, the caller's
        // blocking `read` loop simply retries.
        best_idx.and_then(|idx| self.members[idx].try_read().map(|msg| (self.members[idx].id(), msg)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fifo::Discipline;
    use crate::message::BytesPayload;
    use crate::profiler::{ProfilerEvent, RingBufferSink};

    #[test]
    fn round_robin_is_fair_across_two_channels() {
        let a = Channel::new("a", Discipline::Fifo, 4);
        let b = Channel::new("b", Discipline::Fifo, 4);
        a.write(Message::new(BytesPayload(vec![1]))).unwrap();
        b.write(Message::new(BytesPayload(vec![2]))).unwrap();

        let collector = Collector::new(vec![a, b], MergeOrder::RoundRobin);
        let first = collector.try_read().unwrap();
        let second = collector.try_read().unwrap();
        assert_ne!(
            first.unpack::<BytesPayload>().unwrap().0,
            second.unpack::<BytesPayload>().unwrap().0
        );
    }

    #[test]
    fn read_returns_none_once_all_members_end_and_drain() {
        let a = Channel::new("a", Discipline::Fifo, 4);
        a.signal_source_end();
        let collector = Collector::new(vec![a], MergeOrder::RoundRobin);
        assert!(collector.read().is_none());
    }

    #[test]
    fn write_to_a_member_emits_write_collector() {
        let sink = RingBufferSink::new(16);
        let a = Channel::with_guard_and_profiler("a", Discipline::Fifo, 4, None, ProfilerHandle::new(sink.clone()));
        let collector = Collector::with_profiler(vec![a.clone()], MergeOrder::RoundRobin, ProfilerHandle::disabled());

        a.write(Message::new(BytesPayload(vec![1]))).unwrap();

        let saw_write_collector = sink.drain().into_iter().any(|e| {
            matches!(e, ProfilerEvent::Channel { event: ChannelEvent::WriteCollector, .. })
        });
        assert!(saw_write_collector);
        assert!(collector.try_read().is_some());
    }

    #[test]
    fn all_ended_ignores_a_populated_decoupled_read_backup() {
        // Same bug shape as the temporal firewall's drain check: once a
        // FifoD/DFifoD member has been read it always has a backup, so
        // `all_ended` must not treat that as "still has data".
        let a = Channel::new("a", Discipline::FifoD, 2);
        a.write(Message::new(BytesPayload(vec![1]))).unwrap();
        assert!(a.try_read().is_some());
        assert!(a.has_data(), "backup should now be populated");

        let collector = Collector::new(vec![a.clone()], MergeOrder::RoundRobin);
        assert!(!collector.all_ended());

        a.signal_source_end();
        assert!(collector.all_ended());
    }
}
