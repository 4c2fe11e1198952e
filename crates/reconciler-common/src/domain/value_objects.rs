//! Value Objects - Immutable domain primitives with validation
//!
//! Value Objects are:
//! - Immutable
//! - Comparable by value (not identity)
//! - Self-validating
//! - Side-effect free

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Autonomous System Number (Value Object)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Asn(u32);

impl Asn {
    /// Create a new ASN.
    ///
    /// # Invariants
    /// - Non-zero (0 is reserved and never a real participant)
    pub fn new(value: u32) -> Result<Self, DomainError> {
        if value == 0 {
            return Err(DomainError::InvalidAsn("ASN 0 is reserved".into()));
        }
        Ok(Self(value))
    }

    /// Get the raw ASN value.
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Asn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AS{}", self.0)
    }
}

/// Identity key for a member's presence on an exchange LAN (Value Object)
///
/// # Invariants
/// - At least one of `v4`/`v6` is `Some`
/// - `None` is a first-class value, never a wildcard: two identities with
///   `v4: None` match each other only if both also agree on `v6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity {
    asn: Asn,
    v4: Option<Ipv4Addr>,
    v6: Option<Ipv6Addr>,
}

impl Identity {
    /// Construct an identity key, rejecting the all-`None` address case.
    pub fn new(asn: Asn, v4: Option<Ipv4Addr>, v6: Option<Ipv6Addr>) -> Result<Self, DomainError> {
        if v4.is_none() && v6.is_none() {
            return Err(DomainError::InvariantViolation(
                "identity must carry at least one address".into(),
            ));
        }
        Ok(Self { asn, v4, v6 })
    }

    /// The single-protocol v4-only variant of this identity, if it carries a v4 address.
    pub fn v4_only(&self) -> Option<Identity> {
        self.v4.map(|v4| Identity { asn: self.asn, v4: Some(v4), v6: None })
    }

    /// The single-protocol v6-only variant of this identity, if it carries a v6 address.
    pub fn v6_only(&self) -> Option<Identity> {
        self.v6.map(|v6| Identity { asn: self.asn, v4: None, v6: Some(v6) })
    }

    /// The ASN component.
    pub const fn asn(&self) -> Asn {
        self.asn
    }

    /// The IPv4 component, if present.
    pub const fn v4(&self) -> Option<Ipv4Addr> {
        self.v4
    }

    /// The IPv6 component, if present.
    pub const fn v6(&self) -> Option<Ipv6Addr> {
        self.v6
    }

    /// True when this identity carries both address families.
    pub const fn is_dual_stack(&self) -> bool {
        self.v4.is_some() && self.v6.is_some()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.asn,
            self.v4.map(|a| a.to_string()).unwrap_or_else(|| "none".into()),
            self.v6.map(|a| a.to_string()).unwrap_or_else(|| "none".into()),
        )
    }
}

/// A contact email address (Value Object)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactEmail(String);

impl ContactEmail {
    /// Create a contact email.
    ///
    /// # Invariants
    /// - Non-empty
    /// - Contains exactly one `@` with non-empty local and domain parts
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let mut parts = value.split('@');
        let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
            (Some(l), Some(d), None) if !l.is_empty() && !d.is_empty() => (l, d),
            _ => return Err(DomainError::InvalidContactEmail(value)),
        };
        let _ = (local, domain);
        Ok(Self(value))
    }

    /// Borrow the email address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContactEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a connection record, assigned by the store on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

/// Identifier for an exchange LAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IxlanId(pub u64);

/// Domain errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum DomainError {
    /// ASN failed validation.
    #[error("invalid ASN: {0}")]
    InvalidAsn(String),

    /// Contact email failed validation.
    #[error("invalid contact email: {0}")]
    InvalidContactEmail(String),

    /// An aggregate invariant was violated.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
