//! # EsoxSolutions.ResourcePool
//!
//! Async pool for expensive resources such as connections, built on Tokio.
//!
//! ## Features
//!
//! - Bounded pool size with a kept-alive minimum
//! - Priority queueing of waiting requests, FIFO within a priority
//! - Scoped acquisition: resources are released whatever the callback does
//! - Automatic return of resources via RAII (Drop trait)
//! - Idle reaping with configurable timeout and interval
//! - Graceful draining and forced destruction of idle resources
//! - Validation and release hooks supplied by the resource factory
//! - Metrics snapshot and Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use esox_resourcepool::{Factory, Pool, PoolConfiguration, PoolError};
//!
//! struct Connections;
//!
//! #[async_trait]
//! impl Factory for Connections {
//!     type Resource = String;
//!     type Error = std::io::Error;
//!
//!     async fn create(&self) -> Result<String, std::io::Error> {
//!         Ok("connection".to_string())
//!     }
//!
//!     async fn destroy(&self, _conn: String) -> Result<(), std::io::Error> {
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), PoolError> {
//! let pool = Pool::new(Connections, PoolConfiguration::new().with_max_size(5))?;
//!
//! let length = pool.acquire(0, async |conn| Ok::<_, PoolError>(conn.len()))?.await?;
//! assert_eq!(length, 10);
//!
//! pool.drain().await;
//! # Ok(())
//! # }
//! ```

mod pool;
mod config;
mod dispenser;
mod errors;
mod factory;
mod logging;
mod metrics;
mod priority_queue;
mod reaper;
mod state;

pub use pool::{Checkout, Pool, Pooled, PooledFn};
pub use config::PoolConfiguration;
pub use errors::{FactoryError, PoolError, PoolResult};
pub use factory::Factory;
pub use logging::{LogHandler, LogLevel, LogTarget};
pub use metrics::{MetricsExporter, PoolMetrics};
pub use priority_queue::PriorityQueue;
pub use state::ResourceId;
