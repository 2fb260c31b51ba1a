//! Traits for the outbound notification sinks

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Product;

/// A sink told about every newly discovered product.
///
/// Delivery is best-effort: the monitor logs a failed `send` and moves on,
/// and the product is still recorded as known. Nothing is retried on a
/// later cycle.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name used in log lines
    fn name(&self) -> &'static str;

    /// Deliver one product
    ///
    /// # Returns
    /// * `Result<()>` - `Ok` once the sink accepted the product (or is disabled)
    async fn send(&self, product: &Product) -> Result<()>;
}
