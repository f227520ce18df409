//! Change feed: every completed write batch, for the broadcast layer.

use log::trace;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::recalc::CellResult;
use crate::storage::SheetId;

/// One write's results, edited cell first.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SheetChange {
    pub sheet: SheetId,
    pub results: Vec<CellResult>,
}

/// Fan-out of [`SheetChange`]s to any number of subscribers.
///
/// Slow subscribers miss old changes rather than blocking writers.
#[derive(Clone, Debug)]
pub struct ChangeFeed {
    sender: broadcast::Sender<SheetChange>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        ChangeFeed { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SheetChange> {
        self.sender.subscribe()
    }

    /// Publish a change. Having no subscribers is not an error.
    pub fn publish(&self, change: SheetChange) {
        match self.sender.send(change) {
            Ok(receivers) => trace!("change published to {} subscribers", receivers),
            Err(_) => trace!("change dropped, no subscribers"),
        }
    }
}
