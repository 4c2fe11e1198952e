//! Reconciliation Domain Model
//!
//! - **Bounded Contexts**: Membership (connections), Proposals, Archive
//! - **Aggregates**: `ConnectionRecord`, `Proposal`
//! - **Value Objects**: `Identity`, `Asn`, `ContactEmail`
//! - **Repositories**: `ConnectionStore`, `ProposalStore`, `ArchiveStore`, `AttemptLogStore`

pub mod value_objects;
pub mod aggregates;
pub mod repositories;

pub use value_objects::*;
pub use aggregates::*;
pub use repositories::*;
