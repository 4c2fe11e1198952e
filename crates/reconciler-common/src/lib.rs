//! Reconciler Common - shared domain model for IX-F membership reconciliation
//!
//! # Architecture
//!
//! This crate follows the same DDD split used across the workspace:
//!
//! - **Value Objects**: Immutable, validated primitives (`Identity`, `Asn`, `ContactEmail`)
//! - **Aggregates**: Consistency boundaries (`ConnectionRecord`, `Proposal`)
//! - **Repositories**: Persistence abstraction (`ConnectionStore`, `ProposalStore`,
//!   `ArchiveStore`, `AttemptLogStore`) with in-memory implementations for tests
//!   and for running the engine without a real database.
//!
//! Nothing in this crate talks to a network or a database; it is pure domain
//! logic and trait boundaries, consumed by `ixf-reconciler`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod domain;

pub use domain::*;
