//! Read-only retrospective queries over the import archive.

use crate::config::ReconcilerConfig;
use reconciler_common::{ArchiveStore, Asn, ConnectionId, Identity, ReconcileAction, RepositoryError};

/// One row of a post-mortem report.
#[derive(Debug, Clone)]
pub struct PostMortemRow {
    /// Owning exchange LAN.
    pub ixlan_id: reconciler_common::IxlanId,
    /// The connection record this row concerns.
    pub connection_id: ConnectionId,
    /// Identity key at the time of the run.
    pub identity: Identity,
    /// Action applied.
    pub action: ReconcileAction,
    /// Human-readable reason.
    pub reason: String,
    /// `YYYY-MM-DD HH:MM:SS` formatted run timestamp.
    pub timestamp: String,
}

/// Fetch the most recent archive rows touching `asn`, capped at `limit`
/// (itself clamped to `config.ixf_postmortem_limit`, regardless of what the
/// caller asks for).
pub async fn post_mortem(
    archive: &dyn ArchiveStore,
    config: &ReconcilerConfig,
    asn: Asn,
    limit: usize,
) -> Result<Vec<PostMortemRow>, RepositoryError> {
    let rows = archive.entries_for_asn(asn, limit.min(config.ixf_postmortem_limit)).await?;
    Ok(rows
        .into_iter()
        .map(|(ixlan_id, timestamp, entry)| PostMortemRow {
            ixlan_id,
            connection_id: entry.connection_id,
            identity: entry.identity,
            action: entry.action,
            reason: entry.reason,
            timestamp: timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        })
        .collect())
}
