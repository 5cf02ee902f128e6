//! Pass-through node with pre/post processing hooks

use std::marker::PhantomData;

use super::graph::Outlet;
use super::node::{NodeId, StreamError, StreamNode};

// ============================================================================
// Hooks
// ============================================================================

/// Extension points around forwarding.
///
/// `preprocess_message` runs before the message reaches any receiver,
/// `postprocess_message` after every receiver has handled it. Pass `()` when
/// no extra processing is needed.
pub trait PassingHooks<M>: Send {
    fn preprocess_message(&mut self, _message: &M) {}

    fn postprocess_message(&mut self, _message: &M) {}
}

/// No-op hooks
impl<M> PassingHooks<M> for () {}

// ============================================================================
// Passing Node
// ============================================================================

/// Forwards every message unchanged to all of its receivers.
pub struct PassingNode<M, H = ()> {
    name: String,
    hooks: H,
    _message: PhantomData<fn(M)>,
}

impl<M> PassingNode<M, ()> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_hooks(name, ())
    }
}

impl<M, H: PassingHooks<M>> PassingNode<M, H> {
    pub fn with_hooks(name: impl Into<String>, hooks: H) -> Self {
        Self {
            name: name.into(),
            hooks,
            _message: PhantomData,
        }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }
}

impl<M, H> StreamNode<M> for PassingNode<M, H>
where
    M: Clone + 'static,
    H: PassingHooks<M>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_received_message(
        &mut self,
        _sender: NodeId,
        message: M,
        outlet: &mut Outlet<'_, M>,
    ) -> Result<(), StreamError> {
        self.hooks.preprocess_message(&message);
        outlet.forward(message.clone());
        self.hooks.postprocess_message(&message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{MessageQueue, QueuedNode, StreamGraph};
    use std::sync::{Arc, Mutex};

    /// Records hook calls together with how many messages the sink held at
    /// that moment.
    struct Recorder {
        events: Arc<Mutex<Vec<(&'static str, u32, usize)>>>,
        sink: Arc<MessageQueue<u32>>,
    }

    impl PassingHooks<u32> for Recorder {
        fn preprocess_message(&mut self, message: &u32) {
            self.events.lock().unwrap().push(("pre", *message, self.sink.len()));
        }

        fn postprocess_message(&mut self, message: &u32) {
            self.events.lock().unwrap().push(("post", *message, self.sink.len()));
        }
    }

    #[test]
    fn hooks_wrap_forwarding() {
        let mut graph = StreamGraph::<u32>::new();
        let sink = QueuedNode::new("sink");
        let sink_q = sink.handle();
        let events = Arc::new(Mutex::new(Vec::new()));

        let source = graph.add_node(PassingNode::new("source"));
        let middle = graph.add_node(PassingNode::with_hooks(
            "middle",
            Recorder {
                events: Arc::clone(&events),
                sink: Arc::clone(&sink_q),
            },
        ));
        let sink = graph.add_node(sink);
        graph.connect(source, middle).unwrap();
        graph.connect(middle, sink).unwrap();

        graph.publish(source, 5).unwrap();

        let events = events.lock().unwrap().clone();
        // The sink is empty before forwarding and holds the message after.
        assert_eq!(events, vec![("pre", 5, 0), ("post", 5, 1)]);
        assert_eq!(sink_q.try_pull(), Some(5));
    }
}
