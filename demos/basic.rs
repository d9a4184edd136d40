//! Basic usage examples for ResourcePool

use async_trait::async_trait;
use esox_resourcepool::{Factory, Pool, PoolConfiguration, PoolError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
struct Connection {
    id: usize,
}

#[derive(Default)]
struct ConnectionFactory {
    next_id: AtomicUsize,
}

#[async_trait]
impl Factory for ConnectionFactory {
    type Resource = Connection;
    type Error = std::io::Error;

    async fn create(&self) -> Result<Connection, std::io::Error> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        println!("   [factory] opening connection {}", id);
        Ok(Connection { id })
    }

    async fn destroy(&self, conn: Connection) -> Result<(), std::io::Error> {
        println!("   [factory] closing connection {}", conn.id);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), PoolError> {
    println!("=== EsoxSolutions.ResourcePool - Basic Examples ===\n");

    // Example 1: Scoped acquisition
    scoped_acquire().await?;

    // Example 2: Explicit checkout and release
    explicit_checkout().await?;

    // Example 3: Concurrent work sharing a small pool
    concurrent_work().await?;

    // Example 4: Metrics
    metrics().await?;

    Ok(())
}

async fn scoped_acquire() -> Result<(), PoolError> {
    println!("1. Scoped Acquire:");
    let pool = Pool::new(ConnectionFactory::default(), PoolConfiguration::default())?;

    let id = pool
        .acquire(0, async |conn| Ok::<_, PoolError>(conn.id))?
        .await?;
    println!("   Used connection {}", id);
    println!("   Available after return: {}", pool.available_count());

    pool.drain().await;
    println!();
    Ok(())
}

async fn explicit_checkout() -> Result<(), PoolError> {
    println!("2. Explicit Checkout:");
    let pool = Pool::new(
        ConnectionFactory::default(),
        PoolConfiguration::new().with_max_size(2),
    )?;

    let first = pool.checkout(0)?.await?;
    let second = pool.checkout(0)?.await?;
    println!("   Borrowed: {}", pool.borrowed_count());

    pool.release(first).await;
    pool.destroy(second).await;
    println!(
        "   After release and destroy - size: {}, available: {}",
        pool.size(),
        pool.available_count()
    );

    pool.drain().await;
    println!();
    Ok(())
}

async fn concurrent_work() -> Result<(), PoolError> {
    println!("3. Concurrent Work:");
    let factory = ConnectionFactory::default();
    let pool = Pool::new(factory, PoolConfiguration::new().with_max_size(3))?;
    let completed = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for job in 0..10 {
        let pool = pool.clone();
        let completed = Arc::clone(&completed);
        handles.push(tokio::spawn(async move {
            pool.acquire(0, async |conn| {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                completed.fetch_add(1, Ordering::SeqCst);
                Ok::<_, PoolError>((job, conn.id))
            })?
            .await
        }));
    }

    for handle in handles {
        if let Ok(Ok((job, id))) = handle.await {
            println!("   Job {} ran on connection {}", job, id);
        }
    }

    println!("   Completed: {}", completed.load(Ordering::SeqCst));
    println!("   Connections created: {}", pool.size());

    pool.drain().await;
    println!();
    Ok(())
}

async fn metrics() -> Result<(), PoolError> {
    println!("4. Metrics:");
    let pool = Pool::new(
        ConnectionFactory::default(),
        PoolConfiguration::new().with_max_size(5).with_min_size(2),
    )?;

    for _ in 0..3 {
        pool.acquire(0, async |_conn| Ok::<_, PoolError>(()))?.await?;
    }

    let metrics = pool.get_metrics();
    println!("   Size: {}", metrics.size);
    println!("   Available: {}", metrics.available);
    println!("   Total created: {}", metrics.total_created);
    println!("   Total dispensed: {}", metrics.total_dispensed);
    println!("   Utilization: {:.1}%", metrics.utilization * 100.0);

    pool.drain().await;
    println!();
    Ok(())
}
