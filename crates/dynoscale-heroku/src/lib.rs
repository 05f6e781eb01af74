//! dynoscale-heroku — `ScalingClient` for the Heroku Platform API.
//!
//! Scaling an application's workers is a formation update:
//!
//! ```text
//! PATCH /apps/{app}/formation/{type}   {"quantity": n}
//! GET   /apps/{app}/formation/{type}   → {"quantity": n, "type": ..., "size": ...}
//! ```

pub mod client;
pub mod error;

pub use client::{DEFAULT_BASE_URL, Formation, HerokuClient};
pub use error::{HerokuError, HerokuResult};
