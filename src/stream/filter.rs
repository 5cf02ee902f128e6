//! Predicate node

use std::marker::PhantomData;

use super::graph::Outlet;
use super::node::{NodeId, StreamError, StreamNode};

/// Forwards only the messages accepted by its predicate.
pub struct FilterNode<M, F> {
    name: String,
    accept: F,
    rejected: u64,
    _message: PhantomData<fn(M)>,
}

impl<M, F> FilterNode<M, F>
where
    F: FnMut(&M) -> bool + Send,
{
    pub fn new(name: impl Into<String>, accept: F) -> Self {
        Self {
            name: name.into(),
            accept,
            rejected: 0,
            _message: PhantomData,
        }
    }
}

impl<M, F> StreamNode<M> for FilterNode<M, F>
where
    M: Clone + 'static,
    F: FnMut(&M) -> bool + Send,
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
        if (self.accept)(&message) {
            outlet.forward(message);
        } else {
            self.rejected += 1;
        }
        Ok(())
    }
}
