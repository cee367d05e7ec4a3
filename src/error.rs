use thiserror::Error;

use crate::store::StoreError;

/// Failure while handing a fetched snapshot to the store.
///
/// Ends processing of that snapshot node; the walk itself carries on.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("failed to persist {game_key}: {source}")]
    Persistence {
        game_key: String,
        #[source]
        source: StoreError,
    },
    #[error("team lookup failed: {0}")]
    Lookup(#[from] StoreError),
}
