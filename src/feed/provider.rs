use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::db::models::ProviderQuote;

/// Trait that every odds feed must implement.
#[async_trait]
pub trait OddsProvider: Send + Sync {
    /// Quotes for fixtures starting within `horizon` from now.
    ///
    /// Returns an empty list when there is nothing to report. Transport
    /// failures surface as a single error after the feed's own retries.
    async fn fetch_quotes(&self, horizon: Duration) -> Result<Vec<ProviderQuote>>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
