//! Contract for the external compute-scaling API.

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`ScalingClient`] methods.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Performs the actual scale-to-N network call for an application.
///
/// Calling `scale_workers` twice with the same count must be harmless.
pub trait ScalingClient: Send + Sync {
    /// Set the application's worker formation to `quantity` processes.
    fn scale_workers<'a>(&'a self, application: &'a str, quantity: u32) -> ClientFuture<'a, ()>;

    /// Number of worker processes the platform currently runs.
    fn running_workers<'a>(&'a self, application: &'a str) -> ClientFuture<'a, u32>;
}
