//! Routing node: a fair fan-in/fan-out net. Grounded in `box_smx_rn.h`:
//! reads from whichever port has data (fairness via the collector's
//! round-robin), deep-copies the message to every output but the last,
//! and hands the original off to the last output untouched.

use crate::collector::Collector;
use crate::error::InitError;
use crate::net::{NetContext, NetImpl, NetStatus};
use crate::profiler::MessageEvent;
use std::sync::Arc;

/// A routing node's only input is a `Collector` over its fan-in ports;
/// its outputs come from the shared `NetContext` wiring like any other
/// net.
pub struct RoutingNode {
    collector: Arc<Collector>,
}

impl RoutingNode {
    pub fn new(collector: Arc<Collector>) -> Self {
        Self { collector }
    }
}

impl NetImpl for RoutingNode {
    type State = ();

    fn init(&self, _ctx: &NetContext) -> Result<Self::State, InitError> {
        Ok(())
    }

    fn step(&self, ctx: &NetContext, _state: &mut Self::State) -> NetStatus {
        let Some(msg) = self.collector.read() else {
            return NetStatus::End;
        };

        let outputs = ctx.outputs();
        if outputs.is_empty() {
            return NetStatus::Return;
        }

        let (last, rest) = outputs.split_last().expect("checked non-empty above");
        for out in rest {
            // All outputs must be written before new input is accepted;
            // the blocking `write` call enforces exactly that ordering.
            ctx.profiler().emit_message(msg.id(), MessageEvent::CopyStart);
            let copy = msg.deep_copy();
            ctx.profiler().emit_message(copy.id(), MessageEvent::CopyEnd);
            if out.write(copy).is_err() {
                log::warn!("routing node '{}' wrote to an ended output", ctx.name());
            }
        }
        if last.write(msg).is_err() {
            log::warn!("routing node '{}' wrote to an ended output", ctx.name());
        }

        NetStatus::Return
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::collector::MergeOrder;
    use crate::fifo::Discipline;
    use crate::message::{BytesPayload, Message};
    use crate::profiler::ProfilerHandle;
    use std::sync::Barrier;

    #[test]
    fn fans_out_copies_and_hands_off_the_original_to_the_last_output() {
        let in_a = Channel::new("in_a", Discipline::Fifo, 4);
        let out_1 = Channel::new("out_1", Discipline::Fifo, 4);
        let out_2 = Channel::new("out_2", Discipline::Fifo, 4);

        in_a.write(Message::new(BytesPayload(vec![42]))).unwrap();
        in_a.signal_source_end();

        let collector = Collector::new(vec![in_a], MergeOrder::RoundRobin);
        let barrier = Arc::new(Barrier::new(1));
        let ctx = NetContext::new(
            "rn",
            vec![],
            vec![out_1.clone(), out_2.clone()],
            0,
            ProfilerHandle::disabled(),
            barrier,
        );
        let net = Box::new(crate::net::Net::new(RoutingNode::new(collector), ctx));
        crate::net::RunnableNet::run(net);

        let a = out_1.read().unwrap();
        let b = out_2.read().unwrap();
        assert_eq!(a.unpack::<BytesPayload>().unwrap().0, vec![42]);
        assert_eq!(b.unpack::<BytesPayload>().unwrap().0, vec![42]);
        assert_ne!(a.id(), b.id());
    }
}
