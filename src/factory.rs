//! Resource factory supplied by the embedding application

use async_trait::async_trait;

/// Creates, destroys and vets the resources a [`Pool`](crate::Pool) lends out.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use esox_resourcepool::Factory;
///
/// struct Connections;
///
/// #[async_trait]
/// impl Factory for Connections {
///     type Resource = String;
///     type Error = std::io::Error;
///
///     async fn create(&self) -> Result<String, std::io::Error> {
///         Ok("connection".to_string())
///     }
///
///     async fn destroy(&self, _conn: String) -> Result<(), std::io::Error> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Factory: Send + Sync + 'static {
    /// Type of resource the pool manages
    type Resource: Send + 'static;

    /// Error returned by the factory operations
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create a new resource. Failures are reported to the waiting request.
    async fn create(&self) -> Result<Self::Resource, Self::Error>;

    /// Release everything the resource holds. Failures are logged, never retried.
    async fn destroy(&self, resource: Self::Resource) -> Result<(), Self::Error>;

    /// Called before an idle resource is handed out again. Runs without the
    /// pool's internal lock held, so it may read pool state.
    fn validate(&self, _resource: &Self::Resource) -> bool {
        true
    }

    /// Called on release before the resource goes back to the idle set.
    /// A failure destroys the resource instead.
    async fn on_release(&self, _resource: &mut Self::Resource) -> Result<(), Self::Error> {
        Ok(())
    }
}
