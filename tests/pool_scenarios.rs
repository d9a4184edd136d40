//! End-to-end pool behavior: queueing, minimum enforcement, failures,
//! reuse order, draining and idle reaping.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use esox_resourcepool::{Factory, Pool, PoolConfiguration, PoolError};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Client {
    serial: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct ClientError(String);

#[derive(Default)]
struct Clients {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    failures_left: AtomicUsize,
}

impl Clients {
    fn failing(times: usize) -> Self {
        let clients = Self::default();
        clients.failures_left.store(times, Ordering::SeqCst);
        clients
    }

    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

/// Factory handle sharing its counters with the test body
struct SharedClients(Arc<Clients>);

#[async_trait]
impl Factory for SharedClients {
    type Resource = Client;
    type Error = ClientError;

    async fn create(&self) -> Result<Client, ClientError> {
        let should_fail = self
            .0
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ClientError("boom".to_string()));
        }
        let serial = self.0.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Client { serial })
    }

    async fn destroy(&self, _client: Client) -> Result<(), ClientError> {
        self.0.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn new_pool(clients: &Arc<Clients>, config: PoolConfiguration) -> Pool<SharedClients> {
    Pool::new(SharedClients(Arc::clone(clients)), config).expect("valid configuration")
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Queueing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn second_request_waits_for_first_release_and_reuses_resource() {
    let clients = Arc::new(Clients::default());
    let pool = new_pool(&clients, PoolConfiguration::new().with_max_size(1));
    let first_done = Arc::new(AtomicBool::new(false));

    let done = Arc::clone(&first_done);
    let first = pool
        .acquire(0, async move |client| {
            tokio::time::sleep(Duration::from_millis(10)).await;
            done.store(true, Ordering::SeqCst);
            Ok::<_, PoolError>(client.serial)
        })
        .unwrap();

    let done = Arc::clone(&first_done);
    let second = pool
        .acquire(0, async move |client| {
            assert!(done.load(Ordering::SeqCst), "second callback ran before first released");
            Ok::<_, PoolError>(client.serial)
        })
        .unwrap();

    let (first, second) = tokio::join!(first, second);
    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(clients.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn higher_priority_requests_are_served_first() {
    let clients = Arc::new(Clients::default());
    let pool = new_pool(
        &clients,
        PoolConfiguration::new().with_max_size(1).with_priority_range(3),
    );

    let held = pool.checkout(0).unwrap().await.unwrap();
    let low = pool.checkout(2).unwrap();
    let middle = pool.checkout(1).unwrap();
    let high = pool.checkout(0).unwrap();
    settle().await;
    assert_eq!(pool.waiting_count(), 3);

    pool.release(held).await;
    let high = high.await.unwrap();
    assert_eq!(pool.waiting_count(), 2);

    pool.release(high).await;
    let middle = middle.await.unwrap();
    pool.release(middle).await;
    let low = low.await.unwrap();

    assert_eq!(low.serial, 1);
    assert_eq!(pool.waiting_count(), 0);
}

#[tokio::test]
async fn queued_requests_each_create_at_most_one_resource() {
    let clients = Arc::new(Clients::default());
    let pool = new_pool(&clients, PoolConfiguration::new().with_max_size(10));

    let a = pool.checkout(0).unwrap();
    let b = pool.checkout(0).unwrap();
    let c = pool.checkout(0).unwrap();
    let (a, b, c) = tokio::join!(a, b, c);
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

    assert_eq!(clients.created(), 3);
    assert_eq!(pool.size(), 3);
    assert_eq!(pool.size(), pool.available_count() + 3);

    pool.release(a).await;
    pool.release(b).await;
    pool.release(c).await;
    assert_eq!(pool.size(), pool.available_count());
}

// ---------------------------------------------------------------------------
// Minimum enforcement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn minimum_is_created_up_front() {
    let clients = Arc::new(Clients::default());
    let pool = new_pool(&clients, PoolConfiguration::new().with_max_size(5).with_min_size(3));

    assert_eq!(pool.size(), 3);
    settle().await;

    assert_eq!(clients.created(), 3);
    assert_eq!(pool.available_count(), 3);
    assert_eq!(pool.min_size(), 3);
    assert_eq!(pool.max_size(), 5);
}

// ---------------------------------------------------------------------------
// Creation failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_failure_rejects_only_the_first_waiter() {
    let clients = Arc::new(Clients::failing(1));
    let pool = new_pool(&clients, PoolConfiguration::new().with_max_size(1));

    let first = pool.checkout(0).unwrap();
    let second = pool.checkout(0).unwrap();

    let err = first.await.unwrap_err();
    assert!(err.is_create_failure());
    assert!(err.to_string().contains("boom"));
    assert_eq!(pool.size(), 0);
    assert_eq!(pool.waiting_count(), 1);

    // The next request triggers a dispense, which serves the older waiter first.
    let third = pool.checkout(0).unwrap();
    let second = second.await.unwrap();
    assert_eq!(second.serial, 1);
    assert_eq!(pool.waiting_count(), 1);

    pool.release(second).await;
    let third = third.await.unwrap();
    assert_eq!(third.serial, 1);
    assert_eq!(pool.get_metrics().create_failures, 1);
}

#[tokio::test]
async fn acquire_surfaces_create_failure() {
    let clients = Arc::new(Clients::failing(1));
    let pool = new_pool(&clients, PoolConfiguration::new().with_max_size(2));

    let result = pool
        .acquire(0, async |_client| Ok::<_, PoolError>(()))
        .unwrap()
        .await;

    match result {
        Err(PoolError::CreateFailed(source)) => assert_eq!(source.to_string(), "boom"),
        other => panic!("expected creation failure, got {:?}", other),
    }
    assert_eq!(pool.size(), 0);
}

// ---------------------------------------------------------------------------
// Reuse order
// ---------------------------------------------------------------------------

async fn reuse_order(return_to_head: bool) -> (usize, usize) {
    let clients = Arc::new(Clients::default());
    let pool = new_pool(
        &clients,
        PoolConfiguration::new()
            .with_max_size(2)
            .with_return_to_head(return_to_head),
    );

    let r1 = pool.checkout(0).unwrap().await.unwrap();
    let r2 = pool.checkout(0).unwrap().await.unwrap();
    assert_eq!((r1.serial, r2.serial), (1, 2));

    pool.release(r1).await;
    pool.release(r2).await;

    let next = pool.checkout(0).unwrap().await.unwrap();
    let after = pool.checkout(0).unwrap().await.unwrap();
    (next.serial, after.serial)
}

#[tokio::test]
async fn released_resources_are_reused_fifo_by_default() {
    assert_eq!(reuse_order(false).await, (1, 2));
}

#[tokio::test]
async fn return_to_head_reuses_lifo() {
    assert_eq!(reuse_order(true).await, (2, 1));
}

// ---------------------------------------------------------------------------
// Draining
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn drain_waits_for_outstanding_work() {
    let clients = Arc::new(Clients::default());
    let pool = new_pool(
        &clients,
        PoolConfiguration::new()
            .with_max_size(2)
            .with_drain_check_interval(Duration::from_millis(5)),
    );
    let finished = Arc::new(AtomicUsize::new(0));

    let work = |delay: u64| {
        let finished = Arc::clone(&finished);
        pool.acquire(0, async move |_client| {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            finished.fetch_add(1, Ordering::SeqCst);
            Ok::<_, PoolError>(())
        })
        .unwrap()
    };
    let short = work(20);
    let long = work(50);

    let drain = async {
        pool.drain().await;
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    };
    let late = async {
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(pool.is_draining());
        assert!(matches!(pool.checkout(0), Err(PoolError::Draining)));
        assert!(pool.acquire(0, async |_client| Ok::<_, PoolError>(())).is_err());
    };

    let (short, long, (), ()) = tokio::join!(short, long, drain, late);
    short.unwrap();
    long.unwrap();

    assert_eq!(pool.size(), 0);
    assert_eq!(pool.available_count(), 0);
    assert_eq!(clients.destroyed(), 2);
}

#[tokio::test(start_paused = true)]
async fn drain_does_not_replenish_minimum() {
    let clients = Arc::new(Clients::default());
    let pool = new_pool(&clients, PoolConfiguration::new().with_max_size(4).with_min_size(2));
    settle().await;

    pool.drain().await;
    settle().await;

    assert_eq!(pool.size(), 0);
    assert_eq!(clients.created(), 2);
    assert_eq!(clients.destroyed(), 2);
}

// ---------------------------------------------------------------------------
// Idle reaping
// ---------------------------------------------------------------------------

fn reaping_config(refresh_idle: bool) -> PoolConfiguration {
    PoolConfiguration::new()
        .with_max_size(4)
        .with_min_size(2)
        .with_idle_timeout(Duration::from_millis(100))
        .with_reap_interval(Duration::from_millis(30))
        .with_refresh_idle(refresh_idle)
}

async fn grow_to_four(pool: &Pool<SharedClients>) {
    let mut held = Vec::new();
    for _ in 0..4 {
        held.push(pool.checkout(0).unwrap().await.unwrap());
    }
    for client in held {
        pool.release(client).await;
    }
    assert_eq!(pool.size(), 4);
}

#[tokio::test(start_paused = true)]
async fn idle_resources_are_reaped_after_timeout() {
    let clients = Arc::new(Clients::default());
    let pool = new_pool(
        &clients,
        PoolConfiguration::new()
            .with_max_size(2)
            .with_idle_timeout(Duration::from_millis(100))
            .with_reap_interval(Duration::from_millis(30)),
    );

    pool.acquire(0, async |_client| Ok::<_, PoolError>(()))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(pool.available_count(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.available_count(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.size(), 0);
    assert_eq!(clients.destroyed(), 1);
}

#[tokio::test(start_paused = true)]
async fn reaping_without_refresh_stops_at_minimum() {
    let clients = Arc::new(Clients::default());
    let pool = new_pool(&clients, reaping_config(false));
    grow_to_four(&pool).await;

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(pool.size(), 2);
    assert_eq!(clients.destroyed(), 2);
    assert_eq!(clients.created(), 4);
}

#[tokio::test(start_paused = true)]
async fn reaping_with_refresh_replaces_expired_minimum() {
    let clients = Arc::new(Clients::default());
    let pool = new_pool(&clients, reaping_config(true));
    grow_to_four(&pool).await;

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(pool.size(), 2);
    assert!(clients.destroyed() >= 4);
    assert!(clients.created() >= 6);
}

#[tokio::test(start_paused = true)]
async fn destroy_all_now_cancels_reaper_and_spares_borrowed() {
    let clients = Arc::new(Clients::default());
    let pool = new_pool(&clients, PoolConfiguration::new().with_max_size(2));

    let held = pool.checkout(0).unwrap().await.unwrap();
    let idle = pool.checkout(0).unwrap().await.unwrap();
    pool.release(idle).await;

    pool.destroy_all_now().await;
    assert_eq!(pool.size(), 1);
    assert_eq!(pool.borrowed_count(), 1);
    assert_eq!(clients.destroyed(), 1);

    pool.release(held).await;
    assert_eq!(pool.available_count(), 1);
}
