//! Resource factory contract for connection pools

use crate::errors::PoolResult;

use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// Creates and destroys the resources a [`ConnectionPool`](crate::ConnectionPool) manages.
///
/// Both calls may fail and both are bounded by the pool's timeouts, so an
/// implementation does not need its own.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use esox_resilience::{PoolResult, ResourceFactory};
///
/// struct Dialer;
///
/// #[async_trait]
/// impl ResourceFactory for Dialer {
///     type Resource = String;
///
///     async fn create(&self) -> PoolResult<String> {
///         Ok("connection".to_string())
///     }
///
///     async fn destroy(&self, _resource: String) -> PoolResult<()> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Send + 'static;

    /// Open a new resource
    async fn create(&self) -> PoolResult<Self::Resource>;

    /// Close a resource the pool no longer needs
    async fn destroy(&self, resource: Self::Resource) -> PoolResult<()>;
}

/// Factory built from a pair of async closures
///
/// # Examples
///
/// ```
/// use esox_resilience::{FnFactory, PoolError};
///
/// let factory = FnFactory::new(
///     || async { Ok::<_, PoolError>(42u32) },
///     |_conn: u32| async { Ok::<_, PoolError>(()) },
/// );
/// ```
pub struct FnFactory<T, C, D> {
    create: C,
    destroy: D,
    _resource: PhantomData<fn() -> T>,
}

impl<T, C, D> FnFactory<T, C, D> {
    pub fn new<CF>(create: C, destroy: D) -> Self
    where
        C: Fn() -> CF,
        CF: Future<Output = PoolResult<T>>,
    {
        Self {
            create,
            destroy,
            _resource: PhantomData,
        }
    }
}

#[async_trait]
impl<T, C, CF, D, DF> ResourceFactory for FnFactory<T, C, D>
where
    T: Send + 'static,
    C: Fn() -> CF + Send + Sync + 'static,
    CF: Future<Output = PoolResult<T>> + Send + 'static,
    D: Fn(T) -> DF + Send + Sync + 'static,
    DF: Future<Output = PoolResult<()>> + Send + 'static,
{
    type Resource = T;

    async fn create(&self) -> PoolResult<T> {
        (self.create)().await
    }

    async fn destroy(&self, resource: T) -> PoolResult<()> {
        (self.destroy)(resource).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PoolError;

    #[tokio::test]
    async fn test_fn_factory_delegates() {
        let factory = FnFactory::new(
            || async { Ok::<_, PoolError>(7u8) },
            |value: u8| async move {
                if value == 7 {
                    Ok(())
                } else {
                    Err(PoolError::factory("unexpected value"))
                }
            },
        );

        let value = factory.create().await.unwrap();
        assert_eq!(value, 7);
        assert!(factory.destroy(value).await.is_ok());
    }
}
