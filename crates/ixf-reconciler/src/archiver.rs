//! Wraps a run's applied entries into one append-only archive event.

use crate::error::ApplyError;
use chrono::{DateTime, Utc};
use reconciler_common::{ArchiveStore, ImportEntry, ImportEvent, IxlanId};

/// Append `entries` as one import event for `ixlan`, timestamped `now`. A
/// no-op if `entries` is empty.
pub async fn archive(
    store: &dyn ArchiveStore,
    ixlan: IxlanId,
    now: DateTime<Utc>,
    entries: Vec<ImportEntry>,
) -> Result<(), ApplyError> {
    store
        .append(ImportEvent { ixlan_id: ixlan, timestamp: now, entries })
        .await
        .map_err(ApplyError::from)
}
