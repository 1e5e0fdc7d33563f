//! Views: ordered membership snapshots with a version.
//!
//! A [`View`] is an immutable value. Changing membership means building a new
//! view and swapping it in whole; nothing mutates a view in place.

use std::{cmp::Ordering, collections::HashSet, fmt};

use relaymesh_proto::{Address, LogicalAddr};
use serde::{Deserialize, Serialize};

/// View identifier: installing coordinator plus sequence number.
///
/// Ordered by sequence first, then by coordinator address, so any two ids are
/// comparable and every process agrees on which of two views is newer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewId {
    /// Member that installed the view
    pub coordinator: Address,
    /// Monotonic sequence number
    pub sequence: u64,
}

impl ViewId {
    /// Create a view id.
    pub fn new(coordinator: Address, sequence: u64) -> Self {
        Self { coordinator, sequence }
    }

    /// True if `self` supersedes `other`.
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self > other
    }
}

impl Ord for ViewId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence
            .cmp(&other.sequence)
            .then_with(|| self.coordinator.cmp(&other.coordinator))
    }
}

impl PartialOrd for ViewId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}|{}]", self.coordinator, self.sequence)
    }
}

/// Ordered group membership with its id. The first member is the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    id: ViewId,
    members: Vec<Address>,
}

impl View {
    /// Create a view. Use [`View::is_well_formed`] on views from the wire.
    pub fn new(id: ViewId, members: Vec<Address>) -> Self {
        Self { id, members }
    }

    /// View containing only `member`, coordinated by itself.
    pub fn singleton(member: Address, sequence: u64) -> Self {
        Self { id: ViewId::new(member.clone(), sequence), members: vec![member] }
    }

    /// View identifier.
    pub fn id(&self) -> &ViewId {
        &self.id
    }

    /// Members in view order.
    pub fn members(&self) -> &[Address] {
        &self.members
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// First member.
    pub fn coordinator(&self) -> Option<&Address> {
        self.members.first()
    }

    /// True if `logical` is a member.
    pub fn contains(&self, logical: &LogicalAddr) -> bool {
        self.find(logical).is_some()
    }

    /// Address registered under `logical`, if a member.
    pub fn find(&self, logical: &LogicalAddr) -> Option<&Address> {
        self.members.iter().find(|m| &m.logical == logical)
    }

    /// True if `member` coordinates this view.
    pub fn is_coordinator(&self, member: &LogicalAddr) -> bool {
        self.coordinator().is_some_and(|c| &c.logical == member)
    }

    /// Non-empty, coordinator first and id coordinator matching, no logical
    /// address listed twice.
    pub fn is_well_formed(&self) -> bool {
        let Some(first) = self.members.first() else {
            return false;
        };
        if first.logical != self.id.coordinator.logical {
            return false;
        }

        let mut seen = HashSet::new();
        self.members.iter().all(|m| seen.insert(&m.logical))
    }

    /// Successor view without `logical`, installed by the first remaining
    /// member. `None` if nobody would remain.
    pub fn without(&self, logical: &LogicalAddr) -> Option<Self> {
        let members: Vec<Address> =
            self.members.iter().filter(|m| &m.logical != logical).cloned().collect();
        let coordinator = members.first()?.clone();
        Some(Self { id: ViewId::new(coordinator, self.id.sequence + 1), members })
    }

    /// Successor view with `member` appended, installed by the current
    /// coordinator. A member with the same logical address is replaced in
    /// place.
    pub fn with(&self, member: Address) -> Self {
        let mut members = self.members.clone();
        match members.iter_mut().find(|m| m.logical == member.logical) {
            Some(existing) => *existing = member,
            None => members.push(member),
        }
        Self { id: ViewId::new(self.id.coordinator.clone(), self.id.sequence + 1), members }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) [", self.id, self.members.len())?;
        for (i, m) in self.members.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", m.logical)?;
        }
        f.write_str("]")
    }
}
