//! Domain names and trust-chain construction
//!
//! A domain is a dot-separated hierarchical name. The root domain is the
//! single label ".". A domain ending in "@" names a node's own live record
//! (identity form); a domain ending in "." is a plain trust/record domain.
//! Validity of a record is proven by a chain of trust assertions from its
//! domain up to the root.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The root domain, sole trust anchor.
pub const ROOT: &str = ".";

/// Hierarchical dot-separated name identifying a record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Domain(String);

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The root domain ".".
    pub fn root() -> Self {
        Self(ROOT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT
    }

    /// Identity domains name a node's own live record.
    pub fn is_identity(&self) -> bool {
        self.0.ends_with('@')
    }

    /// Bare labels, any trailing "@" and "." removed.
    pub fn base(&self) -> &str {
        self.0.trim_end_matches('@').trim_end_matches('.')
    }

    /// Storage-key form: no leading or trailing dots. The "@" of an
    /// identity domain stays, keeping its key distinct from the trust
    /// record of the same labels.
    pub fn trimmed(&self) -> &str {
        self.0.trim_matches('.')
    }

    /// The trust/record form of this domain ("labels.").
    pub fn record_form(&self) -> Domain {
        Domain(format!("{}.", self.base()))
    }

    /// The identity form of this domain ("labels.@").
    pub fn identity_form(&self) -> Domain {
        Domain(format!("{}.@", self.base()))
    }

    /// Ancestor candidates for signature verification, nearest first.
    ///
    /// Identity domains include their own domain first (a node record is
    /// signed by its own domain's authority); plain domains start at the
    /// parent, since a domain never authorizes itself. The root is always
    /// the final candidate, so the chain length is bounded by the label
    /// count plus one.
    pub fn trust_chain(&self) -> Vec<Domain> {
        let base = self.base();
        let mut chain = Vec::new();
        if !base.is_empty() {
            let labels: Vec<&str> = base.split('.').collect();
            let start = if self.is_identity() { 0 } else { 1 };
            for i in start..labels.len() {
                chain.push(Domain(format!("{}.", labels[i..].join("."))));
            }
        }
        chain.push(Domain::root());
        chain
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_and_trimmed() {
        assert_eq!(Domain::new("a.b.c.").base(), "a.b.c");
        assert_eq!(Domain::new("sub.@").base(), "sub");
        assert_eq!(Domain::new("a.b.c.").trimmed(), "a.b.c");
        // Identity keys stay distinct from trust-record keys.
        assert_eq!(Domain::new("sub.@").trimmed(), "sub.@");
        assert_eq!(Domain::root().trimmed(), "");
    }

    #[test]
    fn test_forms() {
        let d = Domain::new("node1.mesh");
        assert_eq!(d.record_form().as_str(), "node1.mesh.");
        assert_eq!(d.identity_form().as_str(), "node1.mesh.@");
        assert!(d.identity_form().is_identity());
        assert!(!d.record_form().is_identity());
    }

    #[test]
    fn test_trust_chain_plain() {
        let chain = Domain::new("a.b.c.").trust_chain();
        let names: Vec<&str> = chain.iter().map(|d| d.as_str()).collect();
        assert_eq!(names, vec!["b.c.", "c.", "."]);
    }

    #[test]
    fn test_trust_chain_identity_includes_self() {
        let chain = Domain::new("sub.@").trust_chain();
        let names: Vec<&str> = chain.iter().map(|d| d.as_str()).collect();
        assert_eq!(names, vec!["sub.", "."]);
    }

    #[test]
    fn test_trust_chain_single_label() {
        let chain = Domain::new("sub.").trust_chain();
        let names: Vec<&str> = chain.iter().map(|d| d.as_str()).collect();
        assert_eq!(names, vec!["."]);
    }

    #[test]
    fn test_trust_chain_root() {
        let chain = Domain::root().trust_chain();
        assert_eq!(chain, vec![Domain::root()]);
    }
}
