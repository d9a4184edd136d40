//! Idle reaping: destroying resources that sat unused past their timeout

use std::sync::Arc;

use futures::future::join_all;
use tokio::time::Instant;

use crate::factory::Factory;
use crate::pool::Shared;
use crate::state::{IdleResource, PoolState};

impl<F: Factory> PoolState<F> {
    /// Remove expired idle resources, uncounting them.
    ///
    /// Without `refresh_idle` the scan stops once removing more would take
    /// the pool below its minimum size.
    pub(crate) fn take_expired(
        &mut self,
        now: Instant,
        refresh_idle: bool,
    ) -> Vec<IdleResource<F::Resource>> {
        let removable = self.count.saturating_sub(self.min);
        let mut expired = Vec::new();
        let mut index = 0;

        while index < self.available.len() && (refresh_idle || expired.len() < removable) {
            if self.available[index].is_expired(now) {
                if let Some(idle) = self.available.remove(index) {
                    self.count = self.count.saturating_sub(1);
                    expired.push(idle);
                }
            } else {
                index += 1;
            }
        }

        expired
    }
}

impl<F: Factory> Shared<F> {
    /// Arm the reaper timer unless one is already pending
    pub(crate) fn schedule_reap(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.reap_scheduled {
            return;
        }
        state.reap_scheduled = true;

        let pool = Arc::downgrade(self);
        let interval = self.config.reap_interval;
        state.reap_task = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(shared) = pool.upgrade() {
                shared.reap_idle().await;
            }
        }));
    }

    pub(crate) async fn reap_idle(self: &Arc<Self>) {
        let now = Instant::now();
        let (expired, remaining) = {
            let mut state = self.state.lock();
            state.reap_scheduled = false;
            state.reap_task = None;
            let expired = state.take_expired(now, self.config.refresh_idle);
            (expired, state.available.len())
        };

        for idle in &expired {
            self.logger.trace(format_args!(
                "reap_idle() destroying resource {}, idle for {:?} past its deadline",
                idle.id,
                now.saturating_duration_since(idle.idle_deadline)
            ));
        }

        if remaining > 0 {
            self.logger
                .trace(format_args!("reap_idle() {} resources still idle", remaining));
            self.schedule_reap();
        } else {
            self.logger.trace(format_args!("reap_idle() all idle resources removed"));
        }

        join_all(
            expired
                .into_iter()
                .map(|idle| self.dispose(idle.id, idle.resource)),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::Numbers;
    use std::time::Duration;

    fn state_with_idle(count: usize, min: usize, expired: usize) -> (PoolState<Numbers>, Instant) {
        let now = Instant::now();
        let mut state = PoolState::<Numbers>::new(10, min, 1);
        state.count = count;
        for value in 0..count {
            let id = state.next_resource_id();
            let deadline = if value < expired {
                now - Duration::from_millis(1)
            } else {
                now + Duration::from_secs(60)
            };
            state
                .store(IdleResource::new(id, value as u32, deadline), false)
                .unwrap();
        }
        (state, now)
    }

    #[test]
    fn test_refresh_idle_takes_every_expired_resource() {
        let (mut state, now) = state_with_idle(4, 2, 3);
        let expired = state.take_expired(now, true);

        let values: Vec<_> = expired.iter().map(|idle| idle.resource).collect();
        assert_eq!(values, vec![0, 1, 2]);
        assert_eq!(state.count, 1);
        assert_eq!(state.available.len(), 1);
    }

    #[test]
    fn test_without_refresh_minimum_is_kept() {
        let (mut state, now) = state_with_idle(4, 2, 4);
        let expired = state.take_expired(now, false);

        assert_eq!(expired.len(), 2);
        assert_eq!(state.count, 2);
        assert_eq!(state.available.len(), 2);
    }

    #[test]
    fn test_fresh_resources_survive() {
        let (mut state, now) = state_with_idle(3, 0, 0);
        assert!(state.take_expired(now, true).is_empty());
        assert_eq!(state.count, 3);
    }
}
