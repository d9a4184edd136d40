//! Bookkeeping shared by every pool operation

use std::collections::VecDeque;
use std::fmt;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::dispenser::Waiter;
use crate::factory::Factory;
use crate::priority_queue::PriorityQueue;

/// Pool-unique identity of a created resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An idle resource and the moment it becomes eligible for reaping
#[derive(Debug)]
pub(crate) struct IdleResource<R> {
    pub id: ResourceId,
    pub resource: R,
    pub idle_deadline: Instant,
}

impl<R> IdleResource<R> {
    pub fn new(id: ResourceId, resource: R, idle_deadline: Instant) -> Self {
        Self {
            id,
            resource,
            idle_deadline,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.idle_deadline
    }
}

/// Mutable pool state. Only touched while holding the pool lock.
///
/// `count` covers idle resources, resources lent out and creations in flight.
pub(crate) struct PoolState<F: Factory> {
    pub available: VecDeque<IdleResource<F::Resource>>,
    pub waiting: PriorityQueue<Waiter<F>>,
    pub count: usize,
    pub max: usize,
    pub min: usize,
    pub draining: bool,
    pub reap_scheduled: bool,
    pub reap_task: Option<JoinHandle<()>>,
    next_id: u64,
}

impl<F: Factory> PoolState<F> {
    pub fn new(max: usize, min: usize, priority_range: usize) -> Self {
        Self {
            available: VecDeque::new(),
            waiting: PriorityQueue::new(priority_range),
            count: 0,
            max,
            min,
            draining: false,
            reap_scheduled: false,
            reap_task: None,
            next_id: 0,
        }
    }

    pub fn next_resource_id(&mut self) -> ResourceId {
        self.next_id += 1;
        ResourceId(self.next_id)
    }

    /// Resources that exist but are not idle
    pub fn borrowed(&self) -> usize {
        self.count.saturating_sub(self.available.len())
    }

    pub fn is_idle(&self, id: ResourceId) -> bool {
        self.available.iter().any(|idle| idle.id == id)
    }

    /// Put a resource into the idle set. Hands it back if it is already there.
    pub fn store(
        &mut self,
        idle: IdleResource<F::Resource>,
        to_head: bool,
    ) -> Result<(), IdleResource<F::Resource>> {
        if self.is_idle(idle.id) {
            return Err(idle);
        }
        if to_head {
            self.available.push_front(idle);
        } else {
            self.available.push_back(idle);
        }
        Ok(())
    }

    /// Stop counting a resource that is about to be destroyed.
    /// Returns the idle entry if it was still sitting in the idle set.
    pub fn forget(&mut self, id: ResourceId) -> Option<IdleResource<F::Resource>> {
        self.count = self.count.saturating_sub(1);
        let position = self.available.iter().position(|idle| idle.id == id)?;
        self.available.remove(position)
    }

    /// Take every idle resource, uncounting them
    pub fn take_all_idle(&mut self) -> Vec<IdleResource<F::Resource>> {
        self.count = self.count.saturating_sub(self.available.len());
        self.available.drain(..).collect()
    }

    /// Reserve creation slots needed to reach the minimum
    pub fn reserve_minimum(&mut self) -> usize {
        if self.draining {
            return 0;
        }
        let missing = self.min.saturating_sub(self.count);
        self.count += missing;
        missing
    }

    /// Drop waiters whose requester went away
    pub fn prune_waiters(&mut self) {
        self.waiting.retain(|waiter| !waiter.is_closed());
    }

    /// Highest priority waiter that still has someone listening
    pub fn next_waiter(&mut self) -> Option<Waiter<F>> {
        while let Some(waiter) = self.waiting.dequeue() {
            if !waiter.is_closed() {
                return Some(waiter);
            }
        }
        None
    }
}
