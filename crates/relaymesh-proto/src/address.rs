//! Member addressing.
//!
//! A member is known by its [`LogicalAddr`], a stable name it picks itself
//! and keeps across reconnects. The [`Address`] pairs that name with the
//! incarnation of the process currently holding it, which plays the role of
//! the physical half of the address: it changes when the process restarts and
//! orders competing claims on the same name (higher incarnation is the more
//! recent registration).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable member identity, compared lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalAddr(String);

impl LogicalAddr {
    /// Create a logical address from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogicalAddr {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for LogicalAddr {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Full member address: logical identity plus process incarnation.
///
/// Ordering is by logical address first, so sorting a list of addresses
/// yields the same order on every process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Stable identity chosen by the member.
    pub logical: LogicalAddr,
    /// Incarnation of the process holding `logical`.
    pub incarnation: u64,
}

impl Address {
    /// Create an address.
    pub fn new(logical: impl Into<LogicalAddr>, incarnation: u64) -> Self {
        Self { logical: logical.into(), incarnation }
    }

    /// True if both addresses name the same logical member.
    pub fn same_member(&self, other: &Self) -> bool {
        self.logical == other.logical
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.logical, self.incarnation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_sort_by_logical_name_first() {
        let mut addrs =
            vec![Address::new("C", 1), Address::new("A", 9), Address::new("B", 3), Address::new("A", 2)];
        addrs.sort();

        let names: Vec<&str> = addrs.iter().map(|a| a.logical.as_str()).collect();
        assert_eq!(names, ["A", "A", "B", "C"]);
        assert_eq!(addrs[0].incarnation, 2);
    }

    #[test]
    fn logical_addr_serializes_as_plain_string() {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&LogicalAddr::new("node-a"), &mut buf).unwrap();

        let decoded: String = ciborium::de::from_reader(buf.as_slice()).unwrap();
        assert_eq!(decoded, "node-a");
    }
}
