//! Net lifecycle: `init` -> step loop -> `terminate` -> `cleanup`, driven
//! on a dedicated OS thread. Grounded in `smxnet.h`'s
//! `smx_net_update_state`/`smx_net_terminate` and `smx_thread_state_e`
//! (`SMX_NET_RETURN` / `CONTINUE` / `END`).

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};

use crate::channel::{Channel, EndState};
use crate::error::InitError;
use crate::profiler::{NetEvent, ProfilerHandle};

static NEXT_NET_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetId(u32);

impl NetId {
    fn next() -> Self {
        Self(NEXT_NET_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn from_raw(v: u32) -> Self {
        Self(v)
    }

    /// Allocate a fresh id ahead of constructing its `NetContext`, so
    /// callers (the runtime builder) can hand the id back to their
    /// caller before the net's thread barrier is known.
    pub(crate) fn allocate() -> Self {
        Self::next()
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Net({})", self.0)
    }
}

/// The progress state a net's `step` hook reports after one iteration,
/// matching `smx_thread_state_e`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetStatus {
    /// One iteration completed; check the trigger-input termination
    /// condition before deciding whether to step again.
    Return,
    /// Keep stepping unconditionally; skip the termination check.
    Continue,
    /// Terminate unconditionally.
    End,
}

/// Everything a net implementation needs to do its job: its wired inputs
/// and outputs, its identity, and a profiler handle. Built once by the
/// runtime and handed to the net's thread.
pub struct NetContext {
    id: NetId,
    name: String,
    inputs: Vec<Arc<Channel>>,
    outputs: Vec<Arc<Channel>>,
    trigger_cnt: usize,
    profiler: ProfilerHandle,
    barrier: Arc<Barrier>,
}

impl NetContext {
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<Arc<Channel>>,
        outputs: Vec<Arc<Channel>>,
        trigger_cnt: usize,
        profiler: ProfilerHandle,
        barrier: Arc<Barrier>,
    ) -> Self {
        Self::with_id(NetId::next(), name, inputs, outputs, trigger_cnt, profiler, barrier)
    }

    pub(crate) fn with_id(
        id: NetId,
        name: impl Into<String>,
        inputs: Vec<Arc<Channel>>,
        outputs: Vec<Arc<Channel>>,
        trigger_cnt: usize,
        profiler: ProfilerHandle,
        barrier: Arc<Barrier>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            inputs,
            outputs,
            trigger_cnt,
            profiler,
            barrier,
        }
    }

    pub fn id(&self) -> NetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[Arc<Channel>] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Arc<Channel>] {
        &self.outputs
    }

    pub fn profiler(&self) -> &ProfilerHandle {
        &self.profiler
    }

    /// Number of triggering inputs (FIFO/D_FIFO kinds only — decoupled-read
    /// inputs never trigger termination, since they never block) that have
    /// signalled `End` and drained. Compared against `trigger_cnt` to decide
    /// whether a `Return` status is allowed to terminate the net. A net that
    /// requires zero trigger inputs never auto-terminates on `Return` alone
    /// (per the rule that `trigger_cnt` must be non-zero).
    fn triggering_end_count(&self) -> usize {
        self.inputs
            .iter()
            .filter(|ch| !ch.discipline().decouples_read())
            .filter(|ch| ch.source_state() == EndState::End && !ch.has_data())
            .count()
    }

    /// Number of outputs whose sink has ended (the consumer downstream of
    /// this net has terminated). Compared against the total output count
    /// to decide whether every consumer has gone away (§4.7's `D_out`).
    fn ended_output_count(&self) -> usize {
        self.outputs.iter().filter(|ch| ch.sink_state() == EndState::End).count()
    }

    /// §4.7 `update_state` applied to a `Return` status: terminate once
    /// every triggering input has drained and ended, or once every output's
    /// consumer has ended — whichever comes first.
    fn should_terminate_on_return(&self) -> bool {
        (self.trigger_cnt > 0 && self.triggering_end_count() >= self.trigger_cnt)
            || (!self.outputs.is_empty() && self.ended_output_count() >= self.outputs.len())
    }
}

/// A net's behavior. Implementors hold no interior state of their own;
/// per-run state is threaded through explicitly so `init`/`step`/`cleanup`
/// stay plain functions of their arguments.
pub trait NetImpl: Send {
    type State: Send;

    fn init(&self, ctx: &NetContext) -> Result<Self::State, InitError>;

    fn step(&self, ctx: &NetContext, state: &mut Self::State) -> NetStatus;

    /// Default cleanup is a no-op, matching the C API's optional cleanup
    /// hook.
    fn cleanup(&self, _ctx: &NetContext, _state: Self::State) {}
}

/// Type-erased driver so the runtime can hold a heterogeneous collection
/// of nets with different `NetImpl::State` types.
pub trait RunnableNet: Send {
    fn run(self: Box<Self>);
}

/// Binds a `NetImpl` to its wiring; `RunnableNet::run` is the thread body
/// the runtime spawns.
pub struct Net<N: NetImpl> {
    imp: N,
    ctx: NetContext,
}

impl<N: NetImpl> Net<N> {
    pub fn new(imp: N, ctx: NetContext) -> Self {
        Self { imp, ctx }
    }
}

impl<N: NetImpl + 'static> RunnableNet for Net<N> {
    fn run(self: Box<Self>) {
        let Net { imp, ctx } = *self;

        ctx.profiler.emit_net(ctx.id, NetEvent::Start);
        let init_result = imp.init(&ctx);

        // The pre-init barrier is awaited after `init` so an init failure
        // is observable immediately rather than stalling every other net
        // at the barrier.
        ctx.barrier.wait();

        let state = match init_result {
            Ok(state) => state,
            Err(err) => {
                log::error!("net '{}' failed to initialise: {}", ctx.name, err);
                terminate_channels(&ctx);
                ctx.profiler.emit_net(ctx.id, NetEvent::End);
                return;
            }
        };

        let mut state = state;
        loop {
            ctx.profiler.emit_net(ctx.id, NetEvent::StartImpl);
            let status = imp.step(&ctx, &mut state);
            ctx.profiler.emit_net(ctx.id, NetEvent::EndImpl);
            match status {
                NetStatus::Continue => continue,
                NetStatus::End => break,
                NetStatus::Return => {
                    if ctx.should_terminate_on_return() {
                        break;
                    }
                }
            }
        }

        terminate_channels(&ctx);
        imp.cleanup(&ctx, state);
        ctx.profiler.emit_net(ctx.id, NetEvent::End);
    }
}

fn terminate_channels(ctx: &NetContext) {
    for out in ctx.outputs() {
        out.signal_source_end();
    }
    for inp in ctx.inputs() {
        inp.signal_sink_end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fifo::Discipline;
    use crate::message::{BytesPayload, Message};
    use std::sync::Barrier;

    struct Counter {
        limit: usize,
    }

    impl NetImpl for Counter {
        type State = usize;

        fn init(&self, _ctx: &NetContext) -> Result<Self::State, InitError> {
            Ok(0)
        }

        fn step(&self, ctx: &NetContext, state: &mut Self::State) -> NetStatus {
            if *state >= self.limit {
                return NetStatus::End;
            }
            ctx.outputs()[0]
                .write(Message::new(BytesPayload(vec![*state as u8])))
                .unwrap();
            *state += 1;
            NetStatus::Return
        }
    }

    #[test]
    fn net_emits_limit_messages_then_ends_output() {
        let out = Channel::new("out", Discipline::Fifo, 8);
        let barrier = Arc::new(Barrier::new(1));
        let ctx = NetContext::new(
            "counter",
            vec![],
            vec![out.clone()],
            0,
            ProfilerHandle::disabled(),
            barrier,
        );
        let net = Box::new(Net::new(Counter { limit: 3 }, ctx));
        net.run();

        let mut seen = 0;
        while out.read().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 3);
        assert_eq!(out.source_state(), EndState::End);
    }

    struct Forever;

    impl NetImpl for Forever {
        type State = ();

        fn init(&self, _ctx: &NetContext) -> Result<Self::State, InitError> {
            Ok(())
        }

        fn step(&self, _ctx: &NetContext, _state: &mut Self::State) -> NetStatus {
            NetStatus::Return
        }
    }

    #[test]
    fn net_with_no_trigger_inputs_terminates_once_every_output_consumer_has_gone() {
        let out = Channel::new("out", Discipline::Fifo, 4);
        out.signal_sink_end();
        let barrier = Arc::new(Barrier::new(1));
        let ctx = NetContext::new("producer", vec![], vec![out.clone()], 0, ProfilerHandle::disabled(), barrier);
        let net = Box::new(Net::new(Forever, ctx));
        net.run();
        assert_eq!(out.source_state(), EndState::End);
    }

    #[test]
    fn pure_producer_with_live_outputs_never_terminates_on_return_alone() {
        // trigger_cnt == 0 and the output's consumer is still alive: the
        // Open Question resolution (§9) forbids instant termination here,
        // so the net must keep returning CONTINUE-equivalents until its
        // own impl reports End.
        let out = Channel::new("out", Discipline::Fifo, 1);
        let ctx = NetContext::with_id(
            NetId::from_raw(999),
            "producer",
            vec![],
            vec![out.clone()],
            0,
            ProfilerHandle::disabled(),
            Arc::new(Barrier::new(1)),
        );
        assert!(!ctx.should_terminate_on_return());
    }
}
