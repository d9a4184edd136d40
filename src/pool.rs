//! The pool: acquire, release, destroy and shutdown

use crate::config::PoolConfiguration;
use crate::dispenser::Waiter;
use crate::errors::{PoolError, PoolResult};
use crate::factory::Factory;
use crate::logging::PoolLogger;
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::state::{IdleResource, PoolState, ResourceId};

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Everything a pool and its background tasks share
pub(crate) struct Shared<F: Factory> {
    pub factory: F,
    pub config: PoolConfiguration,
    pub state: Mutex<PoolState<F>>,
    pub logger: PoolLogger,
    pub metrics: MetricsTracker,
}

impl<F: Factory> Shared<F> {
    fn idle_deadline(&self) -> Instant {
        Instant::now() + self.config.idle_timeout
    }

    /// Put a resource into the idle set and wake the dispenser and reaper
    pub(crate) fn store_idle(self: &Arc<Self>, id: ResourceId, resource: F::Resource) {
        let idle = IdleResource::new(id, resource, self.idle_deadline());
        let stored = {
            let mut state = self.state.lock();
            state.store(idle, self.config.return_to_head).is_ok()
        };

        if stored {
            self.logger.trace(format_args!("resource {} is idle", id));
        } else {
            self.logger.warn(format_args!(
                "release called twice for the same resource {}",
                id
            ));
        }

        self.schedule_dispense();
        self.schedule_reap();
    }

    /// Release path: run the release hook, then return or destroy
    pub(crate) async fn check_in(
        self: &Arc<Self>,
        id: ResourceId,
        mut resource: F::Resource,
        invalidated: bool,
    ) {
        if invalidated {
            self.logger.info(format_args!(
                "released resource {} is marked destroyed, not returning to pool",
                id
            ));
            return self.destroy_resource(id, resource).await;
        }

        if let Err(err) = self.factory.on_release(&mut resource).await {
            self.metrics.record_release_hook_failure();
            self.logger.warn(format_args!(
                "release hook failed for resource {}, destroying it: {}",
                id, err
            ));
            return self.destroy_resource(id, resource).await;
        }

        self.metrics.record_released();
        self.store_idle(id, resource);
    }

    pub(crate) async fn destroy_resource(self: &Arc<Self>, id: ResourceId, resource: F::Resource) {
        let count = {
            let mut state = self.state.lock();
            state.forget(id);
            state.count
        };
        self.logger.debug(format_args!("destroying resource {}, count={}", id, count));
        self.dispose(id, resource).await;
    }

    /// Hand an already uncounted resource to the factory, then top the pool back up
    pub(crate) async fn dispose(self: &Arc<Self>, id: ResourceId, resource: F::Resource) {
        self.metrics.record_destroyed();
        if let Err(err) = self.factory.destroy(resource).await {
            self.metrics.record_destroy_failure();
            self.logger.error(format_args!("failed to destroy resource {}: {}", id, err));
        }

        self.ensure_minimum().await;
        self.schedule_dispense();
    }

    /// Dispose on its own task so the resource is destroyed even if the
    /// caller stops waiting
    pub(crate) fn spawn_dispose(
        self: &Arc<Self>,
        id: ResourceId,
        resource: F::Resource,
    ) -> JoinHandle<()> {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.dispose(id, resource).await;
        })
    }

    /// Check a resource in on its own task, so it is returned or destroyed
    /// even if the caller stops waiting
    fn spawn_check_in(
        self: &Arc<Self>,
        id: ResourceId,
        resource: F::Resource,
        invalidated: bool,
    ) -> JoinHandle<()> {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.check_in(id, resource, invalidated).await;
        })
    }

    /// Create enough resources to reach the minimum size
    pub(crate) async fn ensure_minimum(self: &Arc<Self>) {
        let missing = self.state.lock().reserve_minimum();
        self.create_reserved(missing).await;
    }

    pub(crate) async fn create_reserved(self: &Arc<Self>, missing: usize) {
        if missing == 0 {
            return;
        }
        self.logger.debug(format_args!("creating {} resources to reach minimum", missing));
        join_all((0..missing).map(|_| self.create_idle())).await;
    }

    fn spawn_reserved(self: &Arc<Self>, missing: usize) {
        if missing == 0 {
            return;
        }
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.create_reserved(missing).await;
        });
    }

    async fn create_idle(self: &Arc<Self>) {
        match self.factory.create().await {
            Ok(resource) => {
                self.metrics.record_created();
                let id = self.state.lock().next_resource_id();
                self.store_idle(id, resource);
            }
            Err(err) => {
                self.metrics.record_create_failure();
                {
                    let mut state = self.state.lock();
                    state.count = state.count.saturating_sub(1);
                }
                self.logger.error(format_args!(
                    "failed to create resource for minimum: {}",
                    err
                ));
            }
        }
    }

    /// Return a resource from a context that cannot await
    fn return_detached(self: &Arc<Self>, id: ResourceId, resource: F::Resource, invalidated: bool) {
        match Handle::try_current() {
            Ok(handle) => {
                let shared = Arc::clone(self);
                handle.spawn(async move {
                    shared.check_in(id, resource, invalidated).await;
                });
            }
            Err(_) => {
                self.state.lock().forget(id);
                self.logger.warn(format_args!(
                    "resource {} dropped outside a runtime, discarded without destroy",
                    id
                ));
            }
        }
    }
}

/// A resource lent out by the pool.
///
/// Dereferences to the resource. Dropping the guard returns the resource on a
/// background task; prefer [`Pool::release`] to wait for the return.
pub struct Pooled<F: Factory> {
    resource: Option<F::Resource>,
    resource_id: ResourceId,
    invalidated: bool,
    shared: Arc<Shared<F>>,
}

impl<F: Factory> Pooled<F> {
    pub(crate) fn new(id: ResourceId, resource: F::Resource, shared: Arc<Shared<F>>) -> Self {
        Self {
            resource: Some(resource),
            resource_id: id,
            invalidated: false,
            shared,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.resource_id
    }

    /// Destroy this resource when it is released instead of returning it
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Take the resource out without any return bookkeeping
    pub(crate) fn into_parts(mut self) -> Option<(ResourceId, F::Resource)> {
        self.resource.take().map(|resource| (self.resource_id, resource))
    }

    async fn check_in(mut self) {
        if let Some(resource) = self.resource.take() {
            let returned = self
                .shared
                .spawn_check_in(self.resource_id, resource, self.invalidated);
            if let Err(err) = returned.await {
                self.shared.logger.error(format_args!(
                    "returning resource {} failed: {}",
                    self.resource_id, err
                ));
            }
        }
    }
}

impl<F: Factory> Deref for Pooled<F> {
    type Target = F::Resource;

    fn deref(&self) -> &Self::Target {
        self.resource.as_ref().expect("Resource already returned")
    }
}

impl<F: Factory> DerefMut for Pooled<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().expect("Resource already returned")
    }
}

impl<F: Factory> Drop for Pooled<F> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.shared
                .return_detached(self.resource_id, resource, self.invalidated);
        }
    }
}

impl<F> fmt::Debug for Pooled<F>
where
    F: Factory,
    F::Resource: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("id", &self.resource_id)
            .field("resource", &self.resource)
            .field("invalidated", &self.invalidated)
            .finish()
    }
}

/// A queued request for a resource, resolved by the dispenser
#[must_use = "a checkout does nothing unless awaited"]
pub struct Checkout<F: Factory> {
    receiver: oneshot::Receiver<PoolResult<Pooled<F>>>,
}

impl<F: Factory> Future for Checkout<F> {
    type Output = PoolResult<Pooled<F>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(PoolError::Cancelled)))
    }
}

/// Async resource pool with priority queueing and idle reaping
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use esox_resourcepool::{Factory, Pool, PoolConfiguration, PoolError};
///
/// struct Numbers;
///
/// #[async_trait]
/// impl Factory for Numbers {
///     type Resource = u32;
///     type Error = std::io::Error;
///
///     async fn create(&self) -> Result<u32, std::io::Error> { Ok(42) }
///     async fn destroy(&self, _n: u32) -> Result<(), std::io::Error> { Ok(()) }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), PoolError> {
/// let pool = Pool::new(Numbers, PoolConfiguration::new().with_max_size(4))?;
///
/// let doubled = pool.acquire(0, async |n| Ok::<_, PoolError>(**n * 2))?.await?;
/// assert_eq!(doubled, 84);
/// assert_eq!(pool.available_count(), 1);
///
/// pool.drain().await;
/// assert_eq!(pool.size(), 0);
/// # Ok(())
/// # }
/// ```
pub struct Pool<F: Factory> {
    pub(crate) shared: Arc<Shared<F>>,
}

impl<F: Factory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: Factory> Pool<F> {
    /// Create a pool and start filling it up to the minimum size.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(factory: F, config: PoolConfiguration) -> PoolResult<Self> {
        config.validate()?;
        let (max, min) = config.effective_sizes();

        let mut state = PoolState::new(max, min, config.effective_priority_range());
        let missing = state.reserve_minimum();
        let logger = PoolLogger::new(&config.name, config.log.clone());

        let shared = Arc::new(Shared {
            factory,
            config,
            state: Mutex::new(state),
            logger,
            metrics: MetricsTracker::new(),
        });
        shared.spawn_reserved(missing);

        Ok(Self { shared })
    }

    /// Queue a request for a resource.
    ///
    /// Fails immediately if the pool is draining. Lower priority numbers are
    /// served first; out-of-range priorities are clamped to the lowest level.
    pub fn checkout(&self, priority: usize) -> PoolResult<Checkout<F>> {
        let (receiver, priority) = {
            let mut state = self.shared.state.lock();
            if state.draining {
                None
            } else {
                let priority = state.waiting.clamp_priority(priority);
                let (waiter, receiver) = Waiter::new(priority);
                state.waiting.enqueue(waiter, priority);
                Some((receiver, priority))
            }
        }
        .ok_or(PoolError::Draining)?;

        self.shared
            .logger
            .trace(format_args!("request enqueued at priority {}", priority));
        self.shared.schedule_dispense();
        Ok(Checkout { receiver })
    }

    /// Run `callback` with a pooled resource and release it afterwards.
    ///
    /// The request is queued immediately; draining pools refuse it here,
    /// before anything is awaited. Whatever the callback does (returns,
    /// fails or panics) the resource goes back to the pool before the
    /// returned future completes. Panics are resumed on the awaiting task.
    pub fn acquire<C, T, E>(
        &self,
        priority: usize,
        callback: C,
    ) -> PoolResult<impl Future<Output = Result<T, E>> + use<F, C, T, E>>
    where
        C: AsyncFnOnce(&mut Pooled<F>) -> Result<T, E>,
        E: From<PoolError>,
    {
        let checkout = self.checkout(priority)?;
        Ok(async move {
            let mut pooled = checkout.await?;
            let outcome = AssertUnwindSafe(callback(&mut pooled)).catch_unwind().await;
            pooled.check_in().await;
            match outcome {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })
    }

    /// Return a resource to the pool
    pub async fn release(&self, pooled: Pooled<F>) {
        if !Arc::ptr_eq(&self.shared, &pooled.shared) {
            self.shared.logger.warn(format_args!(
                "resource {} released to a pool that did not lend it",
                pooled.resource_id
            ));
        }
        pooled.check_in().await;
    }

    /// Destroy a resource instead of returning it
    pub async fn destroy(&self, mut pooled: Pooled<F>) {
        pooled.invalidate();
        pooled.check_in().await;
    }

    /// Stop accepting requests, wait for outstanding work, then destroy
    /// every resource.
    pub async fn drain(&self) {
        self.shared.logger.info(format_args!("draining"));
        self.shared.state.lock().draining = true;

        loop {
            let (waiting, unreturned) = {
                let mut state = self.shared.state.lock();
                state.prune_waiters();
                (state.waiting.len(), state.borrowed())
            };

            if waiting > 0 {
                self.shared.logger.debug(format_args!(
                    "delaying drain, {} clients in queue",
                    waiting
                ));
            } else if unreturned > 0 {
                self.shared.logger.debug(format_args!(
                    "delaying drain, {} items need to be released",
                    unreturned
                ));
            } else {
                break;
            }

            tokio::time::sleep(self.shared.config.drain_check_interval).await;
        }

        self.destroy_all_now().await;
    }

    /// Destroy every idle resource right away.
    ///
    /// Resources that are lent out are left alone. Unless the pool is
    /// draining, the minimum size is restored afterwards.
    pub async fn destroy_all_now(&self) {
        self.shared.logger.info(format_args!("force destroying all idle resources"));

        let idle = {
            let mut state = self.shared.state.lock();
            state.reap_scheduled = false;
            if let Some(task) = state.reap_task.take() {
                task.abort();
            }
            state.take_all_idle()
        };

        let disposals: Vec<_> = idle
            .into_iter()
            .map(|entry| self.shared.spawn_dispose(entry.id, entry.resource))
            .collect();
        for outcome in join_all(disposals).await {
            if let Err(err) = outcome {
                self.shared
                    .logger
                    .error(format_args!("destroy task failed: {}", err));
            }
        }
    }

    /// Wrap `func` so every call runs with a pooled resource as its first argument
    pub fn pooled<C, A, T, E>(&self, priority: usize, func: C) -> PooledFn<F, C, A, T, E>
    where
        C: AsyncFn(&mut Pooled<F>, A) -> Result<T, E>,
        E: From<PoolError>,
    {
        PooledFn {
            pool: self.clone(),
            priority,
            func,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Resources currently created, idle or lent out
    pub fn size(&self) -> usize {
        self.shared.state.lock().count
    }

    pub fn available_count(&self) -> usize {
        self.shared.state.lock().available.len()
    }

    pub fn borrowed_count(&self) -> usize {
        self.shared.state.lock().borrowed()
    }

    /// Requests still waiting for a resource
    pub fn waiting_count(&self) -> usize {
        let mut state = self.shared.state.lock();
        state.prune_waiters();
        state.waiting.len()
    }

    pub fn max_size(&self) -> usize {
        self.shared.state.lock().max
    }

    pub fn min_size(&self) -> usize {
        self.shared.state.lock().min
    }

    pub fn is_draining(&self) -> bool {
        self.shared.state.lock().draining
    }

    /// Change the maximum size. Values below the minimum are raised to it.
    ///
    /// Shrinking does not destroy resources; the pool settles to the new
    /// bound as resources are destroyed.
    pub fn set_max_size(&self, max: usize) -> PoolResult<()> {
        if max == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_size must be at least 1".to_string(),
            ));
        }
        let max = {
            let mut state = self.shared.state.lock();
            state.max = max.max(state.min);
            state.max
        };
        self.shared.logger.info(format_args!("max size set to {}", max));
        self.shared.schedule_dispense();
        Ok(())
    }

    /// Change the minimum size. Values above the maximum are lowered to it.
    pub fn set_min_size(&self, min: usize) {
        let (min, missing) = {
            let mut state = self.shared.state.lock();
            state.min = min.min(state.max);
            (state.min, state.reserve_minimum())
        };
        self.shared.logger.info(format_args!("min size set to {}", min));
        self.shared.spawn_reserved(missing);
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        let state = self.shared.state.lock();
        self.shared.metrics.get_metrics(&state)
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format, labelled with the pool name
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        tags: Option<&HashMap<String, String>>,
    ) -> PoolResult<String> {
        let metrics = self.get_metrics();
        crate::metrics::MetricsExporter::export_prometheus(&metrics, self.name(), tags)
    }
}

impl<F: Factory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Pool")
            .field("name", &self.shared.config.name)
            .field("size", &state.count)
            .field("available", &state.available.len())
            .field("waiting", &state.waiting.len())
            .field("max", &state.max)
            .field("min", &state.min)
            .field("draining", &state.draining)
            .finish()
    }
}

/// A function bound to a pool, see [`Pool::pooled`]
pub struct PooledFn<F: Factory, C, A, T, E> {
    pool: Pool<F>,
    priority: usize,
    func: C,
    _marker: PhantomData<fn(A) -> Result<T, E>>,
}

impl<F, C, A, T, E> PooledFn<F, C, A, T, E>
where
    F: Factory,
    C: AsyncFn(&mut Pooled<F>, A) -> Result<T, E>,
    E: From<PoolError>,
{
    /// Acquire a resource and call the wrapped function with it and `args`
    pub fn call(&self, args: A) -> PoolResult<impl Future<Output = Result<T, E>>> {
        let func = &self.func;
        self.pool.acquire(
            self.priority,
            async move |resource: &mut Pooled<F>| func(resource, args).await,
        )
    }

    pub fn pool(&self) -> &Pool<F> {
        &self.pool
    }
}
