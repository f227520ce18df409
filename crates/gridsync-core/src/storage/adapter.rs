use std::collections::HashMap;
use std::sync::Arc;

use log::trace;

use gridsync_engine::Coordinate;

use super::{CellSnapshot, CellStore, SheetId};
use crate::error::StoreError;

/// Batched, gap-filling view over a [`CellStore`].
pub struct CellStoreAdapter<S> {
    store: Arc<S>,
}

impl<S: CellStore> CellStoreAdapter<S> {
    pub fn new(store: Arc<S>) -> Self {
        CellStoreAdapter { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fetch every requested coordinate in a single store call.
    ///
    /// The result has exactly one entry per distinct requested coordinate;
    /// cells the store does not know are returned as an empty snapshot.
    pub async fn fetch_many(
        &self,
        sheet: SheetId,
        at: &[Coordinate],
    ) -> Result<HashMap<Coordinate, CellSnapshot>, StoreError> {
        if at.is_empty() {
            return Ok(HashMap::new());
        }

        let mut wanted = at.to_vec();
        wanted.sort_unstable();
        wanted.dedup();

        let mut found = self.store.get_cells(sheet, &wanted).await?;
        trace!(
            "fetched {} of {} cells from {}",
            found.len(),
            wanted.len(),
            sheet
        );

        found.retain(|coord, _| wanted.binary_search(coord).is_ok());
        for coord in wanted {
            found.entry(coord).or_default();
        }
        Ok(found)
    }
}

impl<S> Clone for CellStoreAdapter<S> {
    fn clone(&self) -> Self {
        CellStoreAdapter {
            store: Arc::clone(&self.store),
        }
    }
}
