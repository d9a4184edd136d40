//! Matching waiting requests with idle or newly created resources

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::errors::{PoolError, PoolResult};
use crate::factory::Factory;
use crate::pool::{Pooled, Shared};
use crate::state::{IdleResource, PoolState, ResourceId};

/// A queued request for a resource.
///
/// The sender is a single-use settlement cell: it is either fulfilled with a
/// resource, rejected with an error, or abandoned when the requester stops
/// listening.
pub(crate) struct Waiter<F: Factory> {
    sender: oneshot::Sender<PoolResult<Pooled<F>>>,
    priority: usize,
}

impl<F: Factory> Waiter<F> {
    pub fn new(priority: usize) -> (Self, oneshot::Receiver<PoolResult<Pooled<F>>>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender, priority }, receiver)
    }

    pub fn priority(&self) -> usize {
        self.priority
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Hand over a resource. Gives it back if the requester is gone.
    pub fn fulfill(self, pooled: Pooled<F>) -> Result<(), Pooled<F>> {
        match self.sender.send(Ok(pooled)) {
            Ok(()) => Ok(()),
            Err(Ok(pooled)) => Err(pooled),
            Err(Err(_)) => Ok(()),
        }
    }

    /// Settle with an error. Returns false if nobody was listening.
    pub fn reject(self, err: PoolError) -> bool {
        self.sender.send(Err(err)).is_ok()
    }
}

/// What a single dispense pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispensed {
    NothingWaiting,
    Reused(ResourceId),
    Create,
    Saturated,
}

impl<F: Factory> PoolState<F> {
    /// Claim a slot for a new resource if the pool is below its maximum
    fn reserve_creation(&mut self) -> Dispensed {
        if self.count < self.max {
            self.count += 1;
            Dispensed::Create
        } else {
            Dispensed::Saturated
        }
    }
}

impl<F: Factory> Shared<F> {
    /// Run a dispense pass on a fresh task, after the caller's own work
    pub(crate) fn schedule_dispense(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.dispense();
        });
    }

    /// Serve at most one waiter: reuse the first valid idle resource, or
    /// start one creation if the pool is below its maximum.
    pub(crate) fn dispense(self: &Arc<Self>) {
        let mut discarded = Vec::new();
        let outcome = loop {
            let candidate = {
                let mut state = self.state.lock();
                state.prune_waiters();
                if state.waiting.is_empty() {
                    break Dispensed::NothingWaiting;
                }
                match state.available.pop_front() {
                    Some(idle) => idle,
                    None => break state.reserve_creation(),
                }
            };

            // The factory may call back into the pool, so validate unlocked.
            if !self.factory.validate(&candidate.resource) {
                self.state.lock().forget(candidate.id);
                discarded.push(candidate);
                continue;
            }

            if let Some(outcome) = self.hand_over(candidate) {
                break outcome;
            }
        };

        let (waiting, available, count, min, max) = {
            let state = self.state.lock();
            (
                state.waiting.len(),
                state.available.len(),
                state.count,
                state.min,
                state.max,
            )
        };
        self.logger.debug(format_args!(
            "dispense() clients={} available={}",
            waiting, available
        ));

        for idle in discarded {
            self.metrics.record_validation_failure();
            self.logger.info(format_args!(
                "dispense() - resource {} failed validation, destroying",
                idle.id
            ));
            self.spawn_dispose(idle.id, idle.resource);
        }

        match outcome {
            Dispensed::Reused(id) => {
                self.metrics.record_dispensed();
                self.logger.trace(format_args!("dispense() - reusing resource {}", id));
            }
            Dispensed::Create => {
                self.logger.trace(format_args!(
                    "dispense() - creating resource - count={} min={} max={}",
                    count, min, max
                ));
                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    shared.create_for_waiter().await;
                });
            }
            Dispensed::Saturated => {
                self.logger.trace(format_args!(
                    "dispense() - pool at capacity ({}), request stays queued",
                    max
                ));
            }
            Dispensed::NothingWaiting => {}
        }
    }

    /// Give a validated resource to the first waiter still listening.
    ///
    /// Returns `None` if that waiter went away; the resource is then back at
    /// the front of the idle set and the caller tries the next waiter.
    fn hand_over(self: &Arc<Self>, idle: IdleResource<F::Resource>) -> Option<Dispensed> {
        let mut state = self.state.lock();
        let Some(waiter) = state.next_waiter() else {
            state.available.push_front(idle);
            return Some(Dispensed::NothingWaiting);
        };

        let IdleResource {
            id,
            resource,
            idle_deadline,
        } = idle;
        match waiter.fulfill(Pooled::new(id, resource, Arc::clone(self))) {
            Ok(()) => Some(Dispensed::Reused(id)),
            Err(unclaimed) => {
                if let Some((id, resource)) = unclaimed.into_parts() {
                    state
                        .available
                        .push_front(IdleResource::new(id, resource, idle_deadline));
                }
                None
            }
        }
    }

    /// Create one resource for whichever waiter is first in line when it is ready
    async fn create_for_waiter(self: Arc<Self>) {
        match self.factory.create().await {
            Ok(resource) => {
                self.metrics.record_created();
                let unclaimed = {
                    let mut state = self.state.lock();
                    let id = state.next_resource_id();
                    match state.next_waiter() {
                        Some(waiter) => waiter
                            .fulfill(Pooled::new(id, resource, Arc::clone(&self)))
                            .err()
                            .and_then(Pooled::into_parts),
                        None => Some((id, resource)),
                    }
                };

                match unclaimed {
                    None => self.metrics.record_dispensed(),
                    Some((id, resource)) => {
                        self.logger.debug(format_args!(
                            "created resource {} has no waiter left, keeping it idle",
                            id
                        ));
                        self.store_idle(id, resource);
                    }
                }
            }
            Err(err) => {
                self.metrics.record_create_failure();
                let err = PoolError::create_failed(err);
                let waiter = {
                    let mut state = self.state.lock();
                    state.count = state.count.saturating_sub(1);
                    state.next_waiter()
                };
                self.logger.error(format_args!("{}", err));

                match waiter {
                    Some(waiter) => {
                        let priority = waiter.priority();
                        if !waiter.reject(err) {
                            self.logger.debug(format_args!(
                                "creation failure for priority {} request went unobserved",
                                priority
                            ));
                        }
                    }
                    None => {
                        self.logger.debug(format_args!(
                            "creation failed with no request waiting"
                        ));
                    }
                }
            }
        }
    }
}
