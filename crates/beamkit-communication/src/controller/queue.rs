//! Dual command queues.
//!
//! Two FIFO lanes feed the send loop: `realtime` (interrupt-style traffic
//! that outranks everything) and `normal` (job traffic). Extraction peeks
//! without consuming; units are committed out only after their frame is
//! confirmed on the wire, so an interrupted cycle never loses data.
//!
//! This type is deliberately lock-free: the controller wraps it in its own
//! mutex together with the state field, so queue content and controller
//! state always change under one lock.

use std::collections::VecDeque;

use super::protocol::QueueSource;

#[derive(Debug)]
pub(crate) struct Queues<U> {
    realtime: VecDeque<U>,
    normal: VecDeque<U>,
}

impl<U> Queues<U> {
    pub(crate) fn new() -> Self {
        Self {
            realtime: VecDeque::new(),
            normal: VecDeque::new(),
        }
    }

    pub(crate) fn push_normal(&mut self, units: impl IntoIterator<Item = U>) {
        self.normal.extend(units);
    }

    pub(crate) fn push_realtime(&mut self, units: impl IntoIterator<Item = U>) {
        self.realtime.extend(units);
    }

    pub(crate) fn realtime(&self) -> &VecDeque<U> {
        &self.realtime
    }

    pub(crate) fn normal(&self) -> &VecDeque<U> {
        &self.normal
    }

    pub(crate) fn has_realtime(&self) -> bool {
        !self.realtime.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.realtime.len() + self.normal.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.realtime.is_empty() && self.normal.is_empty()
    }

    /// Drop `count` units from the front of the given lane, after the frame
    /// they produced was confirmed.
    pub(crate) fn commit(&mut self, source: QueueSource, count: usize) {
        let lane = match source {
            QueueSource::Realtime => &mut self.realtime,
            QueueSource::Normal => &mut self.normal,
        };
        let count = count.min(lane.len());
        lane.drain(..count);
    }

    /// Discard everything in both lanes. Returns how many units were dropped.
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.len();
        self.realtime.clear();
        self.normal.clear();
        dropped
    }
}

impl<U> Default for Queues<U> {
    fn default() -> Self {
        Self::new()
    }
}
