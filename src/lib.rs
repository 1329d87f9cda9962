//! streamix-rt — a runtime substrate for a statically-wired dataflow
//! network of concurrent nets exchanging typed messages through bounded
//! channels.
//!
//! A fixed population of nets, routing nodes and temporal firewalls is
//! wired up front with [`runtime::RuntimeBuilder`]; each runs on its own
//! OS thread once [`runtime::Runtime::run`] is called, communicating
//! through [`channel::Channel`]s built on one of four FIFO buffering
//! disciplines ([`fifo::Discipline`]).

pub mod channel;
pub mod collector;
pub mod config;
pub mod error;
pub mod fifo;
pub mod guard;
pub mod logging;
pub mod message;
pub mod net;
pub mod profiler;
pub mod routing_node;
pub mod runtime;
pub mod temporal_firewall;

pub use channel::{Channel, ChannelId, EndState, WriteOutcome};
pub use collector::{Collector, MergeOrder};
pub use config::Config;
pub use error::{ChannelError, ConfigError, DeadlineMiss, InitError};
pub use fifo::{Discipline, Fifo};
pub use guard::{Guard, GuardMode, GuardOutcome};
pub use message::{BytesPayload, Message, MessageId, Payload};
pub use net::{Net, NetContext, NetId, NetImpl, NetStatus, RunnableNet};
pub use profiler::{ChannelEvent, MessageEvent, NetEvent, ProfilerEvent, ProfilerHandle, ProfilerSink, RingBufferSink};
pub use routing_node::RoutingNode;
pub use runtime::{ChannelHandle, Priority, Runtime, RuntimeBuilder, RuntimeConfig};
pub use temporal_firewall::{TemporalFirewallGroup, TfPair};
