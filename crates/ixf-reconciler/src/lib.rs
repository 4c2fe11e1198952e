//! IX-F member-export reconciliation engine.
//!
//! Synchronizes a local registry of network-to-exchange connections against
//! each exchange's IX-F member-export feed: fetch, sanitize vendor quirks,
//! parse into candidate rows, match identities against the existing
//! registry, decide what changed, consolidate address-family moves, apply or
//! propose depending on consent, notify, and archive.

pub mod applier;
pub mod archiver;
pub mod config;
pub mod decision;
pub mod error;
pub mod feed_client;
pub mod identity_match;
pub mod importer;
pub mod mailer;
pub mod model;
pub mod notifier;
pub mod parser;
pub mod postmortem;
pub mod sanitizer;
pub mod ticket;

pub use config::ReconcilerConfig;
pub use error::ReconcileError;
pub use importer::{Importer, UpdateOutcome};
pub use model::{Exchange, Ixlan, Network};
