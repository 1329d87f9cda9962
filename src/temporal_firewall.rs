//! Temporal firewall group: one thread per period, ferrying messages
//! between (in, out) pairs without ever blocking, per `box_smx_tf.h`'s
//! `smx_timer_s` (one timer collects all pairs sharing a rate) and
//! `smx_tf_propagate_msgs`/`smx_tf_wait`/`smx_tf_write_outputs`.
//!
//! Every I/O here is non-blocking by construction (`Channel::try_read`
//! never parks; a pair's output must be wired to a write-decoupled
//! discipline so `Channel::write` never parks either) so one thread can
//! multiplex many pairs without one slow neighbour stalling the rest, and
//! so either side of a pair may reach END without waiting on the other
//! (§4.6's stated rationale).

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::channel::{Channel, EndState};
use crate::error::DeadlineMiss;
use crate::profiler::{ChannelEvent, ProfilerHandle};

/// One (in, out) pair propagated every tick of the group's period.
///
/// `copy_mode` mirrors the data model's per-pair "copy-mode flag": when
/// true the input is wired with a decoupled-read discipline (`FIFO_D`/
/// `D_FIFO_D`) so an empty ring serves a duplicate of the backup; when
/// false the input uses a non-decoupled-read discipline, so an empty ring
/// yields nothing and no duplicate is produced. The flag is recorded here
/// purely for logging/documentation — `Channel::try_read` already branches
/// on the wired discipline, so there is no second read path to keep in
/// sync with it.
pub struct TfPair {
    pub input: Arc<Channel>,
    pub output: Arc<Channel>,
    pub copy_mode: bool,
}

impl TfPair {
    pub fn new(input: Arc<Channel>, output: Arc<Channel>) -> Self {
        let copy_mode = input.discipline().decouples_read();
        Self { input, output, copy_mode }
    }
}

/// A group of temporal firewall pairs sharing a single periodic timer.
pub struct TemporalFirewallGroup {
    name: String,
    period: Duration,
    pairs: Vec<TfPair>,
    profiler: ProfilerHandle,
}

impl TemporalFirewallGroup {
    pub fn new(name: impl Into<String>, period: Duration, pairs: Vec<TfPair>, profiler: ProfilerHandle) -> Self {
        Self {
            name: name.into(),
            period,
            pairs,
            profiler,
        }
    }

    /// The thread body the runtime spawns for this group.
    pub fn run(self) {
        let mut deadline = Instant::now() + self.period;

        loop {
            let tick_late = self.wait_for_deadline(&mut deadline);

            let mut all_ended = true;
            for pair in &self.pairs {
                if !self.tick_pair(pair, tick_late) {
                    all_ended = false;
                }
            }

            if all_ended {
                break;
            }
        }
    }

    /// Sleeps until the next tick, returning whether *this* tick's wakeup
    /// was already past due (the previous tick's deadline had elapsed
    /// before `run` got back around to checking it).
    fn wait_for_deadline(&self, deadline: &mut Instant) -> bool {
        let now = Instant::now();
        let late = if now < *deadline {
            std::thread::sleep(*deadline - now);
            false
        } else if now > *deadline {
            let overrun = now - *deadline;
            log::warn!(
                "temporal firewall '{}' {}",
                self.name,
                DeadlineMiss { overrun_ns: overrun.as_nanos() as u64 }
            );
            true
        } else {
            false
        };
        *deadline += self.period;
        late
    }

    /// Service one pair for this tick. Returns `true` if the pair is fully
    /// drained and ended (so the group's `run` loop can exit once every
    /// pair agrees), `false` otherwise.
    fn tick_pair(&self, pair: &TfPair, tick_late: bool) -> bool {
        // Step 1: the consumer side has never been written to at all —
        // nothing to propagate yet, and nothing to end either.
        if pair.input.source_state() == EndState::Uninitialised {
            return false;
        }

        // `fifo_is_empty`, not `has_data`: a decoupled-read input's backup
        // is refreshed by every `pop_decoupled` and so stays populated
        // forever after the first read, which would make `has_data` never
        // agree the ring has drained. §4.6 step 2's drain condition is the
        // FIFO's own count, `in.fifo.count==0`.
        let input_drained = pair.input.source_state() == EndState::End && pair.input.fifo_is_empty();
        let output_gone = pair.output.sink_state() == EndState::End;

        // Step 2: forward END across whichever side has reached it, so
        // the other timing domain is never left blocked on a partner that
        // will never produce or consume again.
        if input_drained {
            pair.output.signal_source_end();
            return true;
        }
        if output_gone {
            pair.input.signal_sink_end();
            return false;
        }

        if tick_late {
            self.profiler.emit_channel(pair.input.id(), ChannelEvent::TtMissSrc);
            if pair.copy_mode {
                self.profiler.emit_channel(pair.input.id(), ChannelEvent::TtMissSrcCp);
            }
            self.profiler.emit_channel(pair.output.id(), ChannelEvent::TtMissSink);
        }

        self.propagate(pair);
        false
    }

    fn propagate(&self, pair: &TfPair) {
        let copies_before = pair.input.copy_count();

        match pair.input.try_read() {
            None => {
                log::warn!("temporal firewall '{}' missed deadline to produce on '{}'", self.name, pair.input.name());
                pair.input.reset_copy_count();
                self.profiler.emit_channel(pair.input.id(), ChannelEvent::DlMissSrc);
            }
            Some(msg) => {
                if pair.input.copy_count() != copies_before {
                    // The read served a duplicate of the backup rather
                    // than fresh data: the upstream producer missed this
                    // tick's deadline to produce.
                    log::warn!("temporal firewall '{}' missed deadline to produce on '{}'", self.name, pair.input.name());
                    pair.input.reset_copy_count();
                    self.profiler.emit_channel(pair.input.id(), ChannelEvent::DlMissSrcCp);
                }

                let overwrites_before = pair.output.overwrite_count();
                if pair.output.write(msg).is_err() {
                    log::warn!("temporal firewall '{}' wrote to an ended output '{}'", self.name, pair.output.name());
                } else if pair.output.overwrite_count() != overwrites_before {
                    log::warn!("temporal firewall '{}' missed deadline to consume on '{}'", self.name, pair.output.name());
                    self.profiler.emit_channel(pair.output.id(), ChannelEvent::DlMissSink);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fifo::Discipline;
    use crate::message::{BytesPayload, Message};

    #[test]
    fn propagates_available_input_to_output() {
        let input = Channel::new("in", Discipline::DFifoD, 2);
        let output = Channel::new("out", Discipline::DFifo, 2);
        input.write(Message::new(BytesPayload(vec![7]))).unwrap();

        let group = TemporalFirewallGroup::new(
            "tf",
            Duration::from_millis(1),
            vec![TfPair::new(input.clone(), output.clone())],
            ProfilerHandle::disabled(),
        );
        group.propagate(&TfPair::new(input, output.clone()));

        let got = output.try_read().unwrap();
        assert_eq!(got.unpack::<BytesPayload>().unwrap().0, vec![7]);
    }

    #[test]
    fn forwards_end_once_input_drains() {
        let input = Channel::new("in", Discipline::DFifoD, 2);
        let output = Channel::new("out", Discipline::DFifo, 2);
        input.signal_source_end();

        let group = TemporalFirewallGroup::new(
            "tf",
            Duration::from_millis(1),
            vec![TfPair::new(input, output.clone())],
            ProfilerHandle::disabled(),
        );
        group.run();
        assert_eq!(output.source_state(), EndState::End);
    }

    #[test]
    fn drain_check_ignores_a_populated_decoupled_read_backup() {
        // Once a FifoD/DFifoD input has been read at least once it always
        // has a backup, so `has_data` would report it non-empty forever;
        // the drain check must use the FIFO's own count instead, or `run`
        // never exits once the input ends.
        let input = Channel::new("in", Discipline::DFifoD, 2);
        let output = Channel::new("out", Discipline::DFifo, 2);
        input.write(Message::new(BytesPayload(vec![7]))).unwrap();

        let group = TemporalFirewallGroup::new(
            "tf",
            Duration::from_millis(1),
            vec![TfPair::new(input.clone(), output.clone())],
            ProfilerHandle::disabled(),
        );

        assert!(!group.tick_pair(&group.pairs[0], false));
        assert!(input.has_data(), "backup should now be populated");

        input.signal_source_end();
        assert!(group.tick_pair(&group.pairs[0], false), "pair must report drained despite the live backup");
        assert_eq!(output.source_state(), EndState::End);
    }

    #[test]
    fn forwards_end_back_to_input_once_output_consumer_gone() {
        let input = Channel::new("in", Discipline::DFifoD, 2);
        let output = Channel::new("out", Discipline::DFifo, 2);
        // A decoupled-read input starts UNINITIALISED and is skipped
        // outright (§4.6 step 1); write once so it leaves that state
        // before exercising the backward END propagation.
        input.write(Message::new(BytesPayload(vec![1]))).unwrap();
        output.signal_sink_end();

        let group = TemporalFirewallGroup::new(
            "tf",
            Duration::from_millis(1),
            vec![TfPair::new(input.clone(), output)],
            ProfilerHandle::disabled(),
        );
        // One tick is enough to observe the backward END propagation;
        // the pair never reports fully drained since the input itself
        // never ends on its own, so drive a single tick directly.
        assert!(!group.tick_pair(&group.pairs[0], false));
        assert_eq!(input.sink_state(), EndState::End);
    }

    #[test]
    fn uninitialised_input_is_skipped_without_ending_anything() {
        let input = Channel::new("in", Discipline::DFifoD, 2);
        let output = Channel::new("out", Discipline::DFifo, 2);
        let group = TemporalFirewallGroup::new(
            "tf",
            Duration::from_millis(1),
            vec![TfPair::new(input.clone(), output.clone())],
            ProfilerHandle::disabled(),
        );
        assert!(!group.tick_pair(&group.pairs[0], false));
        assert_eq!(output.source_state(), EndState::Pending);
    }
}
