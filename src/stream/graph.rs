//! Index-based node registry with bidirectional sender/receiver edges
//!
//! Nodes never hold references to each other. Edges are lists of
//! [`NodeId`]s kept in the registry, so removing a node only needs the
//! registry to unlink it from both sides.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::node::{Delivery, NodeId, StreamError, StreamNode};

struct NodeEntry<M> {
    name: String,
    /// `None` while the node is handling a message
    handler: Option<Box<dyn StreamNode<M>>>,
    senders: Vec<NodeId>,
    receivers: Vec<NodeId>,
}

struct Slot<M> {
    generation: u32,
    entry: Option<NodeEntry<M>>,
}

/// Registry owning every node of one stream graph.
///
/// Share between producer threads as `Arc<Mutex<StreamGraph<M>>>`; the mutex
/// serializes deliveries from independent producers.
pub struct StreamGraph<M> {
    slots: Vec<Slot<M>>,
    free: Vec<u32>,
}

impl<M> Default for StreamGraph<M> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<M: Clone + 'static> StreamGraph<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and return its handle.
    pub fn add_node<N: StreamNode<M> + 'static>(&mut self, node: N) -> NodeId {
        let entry = NodeEntry {
            name: node.name().to_string(),
            handler: Some(Box::new(node)),
            senders: Vec::new(),
            receivers: Vec::new(),
        };

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return NodeId::new(index, slot.generation);
        }

        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        NodeId::new(index, 0)
    }

    /// Unlink a node from every neighbour and hand it back to the caller.
    ///
    /// The handle (and any copy of it) is invalid afterwards.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Box<dyn StreamNode<M>>, StreamError> {
        let slot = self
            .slots
            .get_mut(id.slot())
            .filter(|s| s.generation == id.generation())
            .ok_or(StreamError::UnknownNode(id))?;
        let Some(NodeEntry {
            handler: Some(handler),
            senders,
            receivers,
            ..
        }) = slot.entry.take()
        else {
            return Err(StreamError::UnknownNode(id));
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(u32::try_from(id.slot()).unwrap_or(u32::MAX));

        for sender in senders {
            if let Some(e) = self.entry_mut(sender) {
                e.receivers.retain(|r| *r != id);
            }
        }
        for receiver in receivers {
            if let Some(e) = self.entry_mut(receiver) {
                e.senders.retain(|s| *s != id);
            }
        }

        debug!(node = %id, "Stream node removed");
        Ok(handler)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entry(id).is_some()
    }

    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        self.entry(id).map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upstream nodes `id` has registered with
    pub fn senders(&self, id: NodeId) -> &[NodeId] {
        self.entry(id).map(|e| e.senders.as_slice()).unwrap_or(&[])
    }

    /// Downstream nodes, in registration (= delivery) order
    pub fn receivers(&self, id: NodeId) -> &[NodeId] {
        self.entry(id).map(|e| e.receivers.as_slice()).unwrap_or(&[])
    }

    /// Register `sender` as an upstream of `node`; also adds `node` as a
    /// receiver of `sender`.
    pub fn add_sender(&mut self, node: NodeId, sender: NodeId) -> Result<(), StreamError> {
        self.require(sender)?;
        let entry = self.entry_mut(node).ok_or(StreamError::UnknownNode(node))?;
        if !entry.senders.contains(&sender) {
            entry.senders.push(sender);
        }
        self.add_receiver(sender, node)
    }

    /// Inverse of [`add_sender`](Self::add_sender), removing both directions.
    pub fn remove_sender(&mut self, node: NodeId, sender: NodeId) -> Result<(), StreamError> {
        self.require(sender)?;
        let entry = self.entry_mut(node).ok_or(StreamError::UnknownNode(node))?;
        entry.senders.retain(|s| *s != sender);
        self.remove_receiver(sender, node)
    }

    /// Downstream side only. Adding an existing receiver again is a no-op.
    pub fn add_receiver(&mut self, node: NodeId, receiver: NodeId) -> Result<(), StreamError> {
        self.require(receiver)?;
        let entry = self.entry_mut(node).ok_or(StreamError::UnknownNode(node))?;
        if !entry.receivers.contains(&receiver) {
            entry.receivers.push(receiver);
        }
        Ok(())
    }

    /// Downstream side only.
    pub fn remove_receiver(&mut self, node: NodeId, receiver: NodeId) -> Result<(), StreamError> {
        let entry = self.entry_mut(node).ok_or(StreamError::UnknownNode(node))?;
        entry.receivers.retain(|r| *r != receiver);
        Ok(())
    }

    /// Wire `upstream -> downstream`.
    pub fn connect(&mut self, upstream: NodeId, downstream: NodeId) -> Result<(), StreamError> {
        self.add_sender(downstream, upstream)
    }

    /// Push a message out of `from` to each of its receivers.
    ///
    /// This is how producers (scanner, sources) inject data: `from` is the
    /// producer's own node.
    pub fn publish(&mut self, from: NodeId, message: M) -> Result<Delivery, StreamError> {
        self.require(from)?;
        let mut delivery = Delivery::default();
        self.forward(from, message, &mut delivery);
        Ok(delivery)
    }

    /// Deliver a message to a single receiver on behalf of `sender`.
    ///
    /// Fails with [`StreamError::NotRegistered`] unless `sender` is one of
    /// `receiver`'s registered senders.
    pub fn send(
        &mut self,
        sender: NodeId,
        receiver: NodeId,
        message: M,
    ) -> Result<Delivery, StreamError> {
        self.require(sender)?;
        if !self.senders(receiver).contains(&sender) {
            self.require(receiver)?;
            return Err(StreamError::NotRegistered { sender, receiver });
        }
        let mut delivery = Delivery::default();
        self.deliver(sender, receiver, message, &mut delivery);
        Ok(delivery)
    }

    /// Tell everything downstream of `from` that activity has ended.
    ///
    /// Each reachable node is signalled once, after its upstream has had the
    /// chance to flush into it.
    pub fn signal_inactive(&mut self, from: NodeId) -> Result<Delivery, StreamError> {
        self.require(from)?;
        let mut delivery = Delivery::default();
        let mut visited = HashSet::from([from]);
        self.propagate_inactive(from, &mut visited, &mut delivery);
        Ok(delivery)
    }

    fn propagate_inactive(
        &mut self,
        from: NodeId,
        visited: &mut HashSet<NodeId>,
        delivery: &mut Delivery,
    ) {
        for receiver in self.receivers(from).to_vec() {
            if !visited.insert(receiver) {
                continue;
            }
            let Some(mut handler) = self.take_handler(receiver, delivery) else {
                continue;
            };
            let result = {
                let mut outlet = Outlet {
                    graph: &mut *self,
                    node: receiver,
                    delivery: &mut *delivery,
                };
                handler.on_upstream_inactive(&mut outlet)
            };
            self.restore_handler(receiver, handler);
            self.record(receiver, result, delivery);
            self.propagate_inactive(receiver, visited, delivery);
        }
    }

    fn forward(&mut self, from: NodeId, message: M, delivery: &mut Delivery) {
        let receivers = self.receivers(from).to_vec();
        let Some((last, rest)) = receivers.split_last() else {
            return;
        };
        for receiver in rest {
            self.deliver(from, *receiver, message.clone(), delivery);
        }
        self.deliver(from, *last, message, delivery);
    }

    fn deliver(&mut self, sender: NodeId, receiver: NodeId, message: M, delivery: &mut Delivery) {
        // A receiver entry added one-sided does not make `sender` a sender.
        if self.contains(receiver) && !self.senders(receiver).contains(&sender) {
            let error = StreamError::NotRegistered { sender, receiver };
            warn!(node = %receiver, error = %error, "Stream delivery skipped");
            delivery.fail(receiver, error);
            return;
        }
        let Some(mut handler) = self.take_handler(receiver, delivery) else {
            return;
        };
        let result = {
            let mut outlet = Outlet {
                graph: &mut *self,
                node: receiver,
                delivery: &mut *delivery,
            };
            handler.on_received_message(sender, message, &mut outlet)
        };
        self.restore_handler(receiver, handler);
        self.record(receiver, result, delivery);
    }

    fn take_handler(
        &mut self,
        id: NodeId,
        delivery: &mut Delivery,
    ) -> Option<Box<dyn StreamNode<M>>> {
        let taken = match self.entry_mut(id) {
            None => Err(StreamError::UnknownNode(id)),
            Some(entry) => entry.handler.take().ok_or(StreamError::Reentrant(id)),
        };
        match taken {
            Ok(handler) => Some(handler),
            Err(e) => {
                warn!(node = %id, error = %e, "Stream delivery skipped");
                delivery.fail(id, e);
                None
            }
        }
    }

    fn restore_handler(&mut self, id: NodeId, handler: Box<dyn StreamNode<M>>) {
        if let Some(entry) = self.entry_mut(id) {
            entry.handler = Some(handler);
        }
    }

    fn record(&self, id: NodeId, result: Result<(), StreamError>, delivery: &mut Delivery) {
        match result {
            Ok(()) => delivery.delivered += 1,
            Err(e) => {
                warn!(
                    node = %id,
                    name = self.node_name(id).unwrap_or("?"),
                    error = %e,
                    "Stream node failed to handle message"
                );
                delivery.fail(id, e);
            }
        }
    }

    fn require(&self, id: NodeId) -> Result<(), StreamError> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(StreamError::UnknownNode(id))
        }
    }

    fn entry(&self, id: NodeId) -> Option<&NodeEntry<M>> {
        self.slots
            .get(id.slot())
            .filter(|s| s.generation == id.generation())
            .and_then(|s| s.entry.as_ref())
    }

    fn entry_mut(&mut self, id: NodeId) -> Option<&mut NodeEntry<M>> {
        self.slots
            .get_mut(id.slot())
            .filter(|s| s.generation == id.generation())
            .and_then(|s| s.entry.as_mut())
    }
}

/// Forwarding handle given to a node while it handles a message.
pub struct Outlet<'g, M> {
    graph: &'g mut StreamGraph<M>,
    node: NodeId,
    delivery: &'g mut Delivery,
}

impl<M: Clone + 'static> Outlet<'_, M> {
    /// The node currently handling the message
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Deliver `message` to every receiver of the current node, in
    /// registration order, before returning.
    pub fn forward(&mut self, message: M) {
        self.graph.forward(self.node, message, &mut *self.delivery);
    }

    pub fn receiver_count(&self) -> usize {
        self.graph.receivers(self.node).len()
    }
}
