//! Advanced features: priorities, hooks, idle reaping, draining, logging

use async_trait::async_trait;
use esox_resourcepool::{
    Factory, LogLevel, LogTarget, Pool, PoolConfiguration, PoolError, Pooled,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug)]
struct Session {
    id: usize,
    queries: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("session {0} could not be reset")]
struct SessionError(usize);

#[derive(Default)]
struct SessionFactory {
    next_id: AtomicUsize,
}

#[async_trait]
impl Factory for SessionFactory {
    type Resource = Session;
    type Error = SessionError;

    async fn create(&self) -> Result<Session, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(Session { id, queries: 0 })
    }

    async fn destroy(&self, _session: Session) -> Result<(), SessionError> {
        Ok(())
    }

    // Sessions are recycled after a handful of queries
    fn validate(&self, session: &Session) -> bool {
        session.queries < 3
    }

    async fn on_release(&self, session: &mut Session) -> Result<(), SessionError> {
        if session.queries > 5 {
            return Err(SessionError(session.id));
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), PoolError> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== EsoxSolutions.ResourcePool - Advanced Features ===\n");

    // Example 1: Priority queueing
    priorities().await?;

    // Example 2: Validation and release hooks
    hooks().await?;

    // Example 3: Idle reaping
    idle_reaping().await?;

    // Example 4: Pooled functions and draining
    pooled_functions().await?;

    // Example 5: Custom log handler and Prometheus export
    custom_logging().await?;

    Ok(())
}

async fn priorities() -> Result<(), PoolError> {
    println!("1. Priority Queueing:");
    let pool = Pool::new(
        SessionFactory::default(),
        PoolConfiguration::new()
            .with_name("priorities")
            .with_max_size(1)
            .with_priority_range(3)
            .with_log(LogTarget::Console),
    )?;

    let held = pool.checkout(0)?.await?;
    let background = pool.checkout(2)?;
    let urgent = pool.checkout(0)?;
    println!("   Waiting: {}", pool.waiting_count());

    pool.release(held).await;
    let urgent = urgent.await?;
    println!("   Urgent request served first with session {}", urgent.id);
    pool.release(urgent).await;

    let background = background.await?;
    println!("   Background request served with session {}", background.id);
    pool.release(background).await;

    pool.drain().await;
    println!();
    Ok(())
}

async fn hooks() -> Result<(), PoolError> {
    println!("2. Validation and Release Hooks:");
    let pool = Pool::new(SessionFactory::default(), PoolConfiguration::default())?;

    for _ in 0..5 {
        let id = pool
            .acquire(0, async |session| {
                session.queries += 1;
                Ok::<_, PoolError>(session.id)
            })?
            .await?;
        println!("   Query ran on session {}", id);
    }

    let metrics = pool.get_metrics();
    println!("   Validation failures: {}", metrics.validation_failures);
    println!("   Sessions created: {}", metrics.total_created);

    pool.drain().await;
    println!();
    Ok(())
}

async fn idle_reaping() -> Result<(), PoolError> {
    println!("3. Idle Reaping:");
    let pool = Pool::new(
        SessionFactory::default(),
        PoolConfiguration::new()
            .with_max_size(4)
            .with_min_size(1)
            .with_idle_timeout(Duration::from_millis(200))
            .with_reap_interval(Duration::from_millis(50))
            .with_refresh_idle(false),
    )?;

    let mut held = Vec::new();
    for _ in 0..4 {
        held.push(pool.checkout(0)?.await?);
    }
    for session in held {
        pool.release(session).await;
    }
    println!("   Size after burst: {}", pool.size());

    println!("   Waiting for idle timeout...");
    tokio::time::sleep(Duration::from_millis(400)).await;
    println!("   Size after reaping: {} (minimum {})", pool.size(), pool.min_size());

    pool.drain().await;
    println!();
    Ok(())
}

async fn pooled_functions() -> Result<(), PoolError> {
    println!("4. Pooled Functions and Draining:");
    let pool = Pool::new(
        SessionFactory::default(),
        PoolConfiguration::new().with_max_size(2),
    )?;

    let query = pool.pooled(0, async |session: &mut Pooled<SessionFactory>, sql: String| {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok::<_, PoolError>(format!("session {} ran '{}'", session.id, sql))
    });

    let first = query.call("SELECT 1".to_string())?;
    let second = query.call("SELECT 2".to_string())?;

    let drain_pool = pool.clone();
    let drain = tokio::spawn(async move { drain_pool.drain().await });
    tokio::time::sleep(Duration::from_millis(1)).await;

    match query.call("SELECT 3".to_string()) {
        Err(PoolError::Draining) => println!("   New work refused while draining"),
        Err(err) => println!("   Unexpected error: {}", err),
        Ok(_) => println!("   New work was accepted"),
    }

    let (first, second) = tokio::join!(first, second);
    println!("   {}", first?);
    println!("   {}", second?);

    if drain.await.is_ok() {
        println!("   Drained, size: {}", pool.size());
    }
    println!();
    Ok(())
}

async fn custom_logging() -> Result<(), PoolError> {
    println!("5. Custom Logging and Prometheus Export:");
    let pool = Pool::new(
        SessionFactory::default(),
        PoolConfiguration::new()
            .with_name("reporting")
            .with_max_size(3)
            .with_log_handler(|message, level| {
                if level >= LogLevel::Info {
                    println!("   [{}] {}", level, message);
                }
            }),
    )?;

    let session = pool.checkout(0)?.await?;
    pool.destroy(session).await;
    pool.acquire(0, async |_session| Ok::<_, PoolError>(()))?.await?;

    let mut tags = HashMap::new();
    tags.insert("service".to_string(), "example".to_string());
    tags.insert("env".to_string(), "dev".to_string());

    let prometheus_text = pool.export_metrics_prometheus(Some(&tags))?;
    println!("{}", prometheus_text);

    pool.drain().await;
    Ok(())
}
