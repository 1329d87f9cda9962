//! Runtime: arena-indexed channel/net tables, the pre-init barrier, and
//! the `program_init`/`program_run`/`program_cleanup` triad. Grounded in
//! the teacher's `kernel/mod.rs` thread-local executor wiring and
//! `boxgen.c`'s static wiring-then-launch sequence from the original
//! runtime, generalized from a single-threaded cooperative tick loop into
//! one OS thread per net / temporal-firewall group.

use std::fmt;
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle};

use slab::Slab;

use crate::channel::Channel;
use crate::net::{NetContext, NetId, NetImpl, RunnableNet};
use crate::profiler::ProfilerHandle;
use crate::temporal_firewall::TemporalFirewallGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelHandle(usize);

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelHandle({})", self.0)
    }
}

/// Requested scheduling priority for a net's thread. Honored on a
/// best-effort basis: this crate carries no platform-specific scheduling
/// dependency, so a non-default priority is recorded and logged but does
/// not change how the thread is actually scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Normal,
    Realtime(u8),
}

/// Soft capacity hints for the runtime's arenas, mirroring the original
/// design's suggested defaults (10 000 channels, 1 000 nets). The slabs
/// grow past these hints; crossing one only logs a warning once.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    pub channel_capacity_hint: usize,
    pub net_capacity_hint: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity_hint: 10_000,
            net_capacity_hint: 1_000,
        }
    }
}

type NetFactory = Box<dyn FnOnce(Arc<Barrier>) -> Box<dyn RunnableNet> + Send>;

/// Assembles the static topology before any thread is spawned.
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    channels: Slab<Arc<Channel>>,
    net_factories: Vec<(String, Priority, NetFactory)>,
    tf_groups: Vec<TemporalFirewallGroup>,
    profiler: ProfilerHandle,
    warned_channel_capacity: bool,
    warned_net_capacity: bool,
}

impl RuntimeBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            channels: Slab::new(),
            net_factories: Vec::new(),
            tf_groups: Vec::new(),
            profiler: ProfilerHandle::disabled(),
            warned_channel_capacity: false,
            warned_net_capacity: false,
        }
    }

    pub fn with_profiler(mut self, profiler: ProfilerHandle) -> Self {
        self.profiler = profiler;
        self
    }

    pub fn profiler(&self) -> ProfilerHandle {
        self.profiler.clone()
    }

    /// Register a channel in the runtime's arena; returns a `Copy` handle
    /// rather than exposing the slab index directly.
    pub fn register_channel(&mut self, channel: Arc<Channel>) -> ChannelHandle {
        let idx = self.channels.insert(channel);
        if idx >= self.config.channel_capacity_hint && !self.warned_channel_capacity {
            log::warn!(
                "channel count exceeded the configured capacity hint of {}",
                self.config.channel_capacity_hint
            );
            self.warned_channel_capacity = true;
        }
        ChannelHandle(idx)
    }

    pub fn channel(&self, handle: ChannelHandle) -> Arc<Channel> {
        self.channels[handle.0].clone()
    }

    /// Wire a net into the topology. `trigger_cnt` is the number of
    /// triggering inputs that must drain-and-end before a `Return` status
    /// is allowed to terminate the net (0 disables that rule).
    pub fn add_net<N>(
        &mut self,
        name: impl Into<String>,
        imp: N,
        inputs: Vec<Arc<Channel>>,
        outputs: Vec<Arc<Channel>>,
        trigger_cnt: usize,
        priority: Priority,
    ) -> NetId
    where
        N: NetImpl + 'static,
    {
        let name = name.into();
        let id = NetId::allocate();
        let profiler = self.profiler.clone();
        let factory_name = name.clone();
        let factory: NetFactory = Box::new(move |barrier| {
            let ctx = NetContext::with_id(id, factory_name, inputs, outputs, trigger_cnt, profiler, barrier);
            Box::new(crate::net::Net::new(imp, ctx))
        });

        if self.net_factories.len() + 1 >= self.config.net_capacity_hint && !self.warned_net_capacity {
            log::warn!(
                "net count approaching the configured capacity hint of {}",
                self.config.net_capacity_hint
            );
            self.warned_net_capacity = true;
        }

        self.net_factories.push((name, priority, factory));
        id
    }

    pub fn add_temporal_firewall_group(&mut self, group: TemporalFirewallGroup) {
        self.tf_groups.push(group);
    }

    /// Finalize the topology: the pre-init barrier is sized to exactly the
    /// number of net threads that will wait on it. Temporal firewall groups
    /// have no `init`/`step` lifecycle to gate (§4.7 only governs nets), so
    /// their threads never wait on this barrier and must be excluded from
    /// its count — counting them here would deadlock every net at startup
    /// waiting on a `wait()` call that never comes.
    pub fn build(self) -> Runtime {
        let thread_count = self.net_factories.len().max(1);
        let barrier = Arc::new(Barrier::new(thread_count));

        let nets = self
            .net_factories
            .into_iter()
            .map(|(name, priority, factory)| {
                if !matches!(priority, Priority::Normal) {
                    log::debug!("net '{name}' requested {priority:?}; honored on a best-effort basis");
                }
                (name, factory(barrier.clone()))
            })
            .collect();

        Runtime {
            _channels: self.channels,
            nets,
            tf_groups: self.tf_groups,
        }
    }
}

/// The live runtime: owns every channel and net for the lifetime of the
/// run, and joins every thread before returning from `run`.
pub struct Runtime {
    _channels: Slab<Arc<Channel>>,
    nets: Vec<(String, Box<dyn RunnableNet>)>,
    tf_groups: Vec<TemporalFirewallGroup>,
}

impl Runtime {
    /// Spawn every net and temporal-firewall thread and block until they
    /// have all run to completion. This is `program_run` from the
    /// external-interface contract.
    pub fn run(self) {
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(self.nets.len() + self.tf_groups.len());

        for (name, net) in self.nets {
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || net.run())
                .unwrap_or_else(|e| panic!("failed to spawn net thread '{name}': {e}"));
            handles.push(handle);
        }

        for group in self.tf_groups {
            let handle = thread::spawn(move || group.run());
            handles.push(handle);
        }

        for handle in handles {
            if let Err(panic) = handle.join() {
                log::error!("a net thread panicked: {panic:?}");
            }
        }
        // `_channels` (and every channel/message still inside it) drops
        // here, after every thread has joined, matching the documented
        // channel lifetime.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::error::InitError;
    use crate::fifo::Discipline;
    use crate::message::{BytesPayload, Message};
    use crate::net::{NetContext, NetImpl, NetStatus};
    use crate::temporal_firewall::TfPair;

    struct OneShot;
    impl NetImpl for OneShot {
        type State = ();
        fn init(&self, _ctx: &NetContext) -> Result<(), InitError> {
            Ok(())
        }
        fn step(&self, ctx: &NetContext, _s: &mut ()) -> NetStatus {
            ctx.outputs()[0].write(Message::new(BytesPayload(vec![1]))).unwrap();
            NetStatus::End
        }
    }

    /// A runtime with both a net and a temporal firewall group must not
    /// deadlock at startup: TF groups have no `init`/`step` lifecycle and
    /// must be excluded from the pre-init barrier's count (see `build`'s
    /// doc comment for the bug this guards against).
    #[test]
    fn run_completes_with_a_net_and_a_temporal_firewall_group_present() {
        let mut builder = RuntimeBuilder::new(RuntimeConfig::default());

        let out = Channel::new("out", Discipline::Fifo, 4);
        builder.add_net("oneshot", OneShot, vec![], vec![out], 0, Priority::Normal);

        let tf_in = Channel::new("tf_in", Discipline::DFifoD, 2);
        let tf_out = Channel::new("tf_out", Discipline::DFifo, 2);
        tf_in.signal_source_end();
        builder.add_temporal_firewall_group(TemporalFirewallGroup::new(
            "tf",
            std::time::Duration::from_millis(1),
            vec![TfPair::new(tf_in, tf_out)],
            builder.profiler(),
        ));

        builder.build().run();
    }
}
