use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::db::models::ValueOpportunity;

/// Receives opportunities after their batch has been committed.
///
/// Fire-and-forget: a failed delivery is logged by the implementation and
/// never reaches the ingestion batch.
pub trait Notifier: Send + Sync {
    fn publish(&self, opportunities: &[ValueOpportunity]);
}

/// Forwards each published batch of opportunities onto a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Vec<ValueOpportunity>>,
}

/// Create a notifier and the receiving end subscribers read from.
pub fn channel(capacity: usize) -> (ChannelNotifier, mpsc::Receiver<Vec<ValueOpportunity>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelNotifier { tx }, rx)
}

impl Notifier for ChannelNotifier {
    fn publish(&self, opportunities: &[ValueOpportunity]) {
        if opportunities.is_empty() {
            return;
        }
        match self.tx.try_send(opportunities.to_vec()) {
            Ok(()) => debug!(count = opportunities.len(), "Opportunities published"),
            Err(e) => error!(
                count = opportunities.len(),
                "Opportunity channel unavailable, batch DROPPED: {}", e
            ),
        }
    }
}
