//! Group registry.
//!
//! Maps group names to the members registered in them and the session each
//! binding arrived on. No network knowledge; the driver owns the only
//! instance.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use relaymesh_proto::{Address, LogicalAddr};

use crate::error::RegistryError;

/// One member bound within a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Registered address
    pub address: Address,
    /// Session the binding belongs to
    pub session_id: u64,
}

/// What a successful registration changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// New binding.
    Created,
    /// The session re-registered an address it already holds.
    Refreshed,
    /// A reconnecting process took over its own stale binding.
    Replaced {
        /// Session that held the binding before
        previous_session: u64,
    },
}

/// Registered members per group.
#[derive(Debug)]
pub struct Registry {
    groups: HashMap<String, BTreeMap<LogicalAddr, Registration>>,
    /// Bindings held by each session
    sessions: HashMap<u64, BTreeSet<(String, LogicalAddr)>>,
    max_members_per_group: usize,
}

impl Registry {
    /// Empty registry.
    pub fn new(max_members_per_group: usize) -> Self {
        Self { groups: HashMap::new(), sessions: HashMap::new(), max_members_per_group }
    }

    /// Bind `address` to `session_id` in `group`, creating the group if needed.
    ///
    /// # Errors
    ///
    /// - `DuplicateAddress` if another session holds the logical address
    ///   under a different incarnation
    /// - `GroupFull` if the group is at capacity
    pub fn register(
        &mut self,
        group: &str,
        address: Address,
        session_id: u64,
    ) -> Result<RegisterOutcome, RegistryError> {
        let members = self.groups.get(group);
        let existing = members.and_then(|m| m.get(&address.logical));

        let outcome = match existing {
            Some(reg) if reg.session_id == session_id => RegisterOutcome::Refreshed,
            Some(reg) if reg.address.incarnation == address.incarnation => {
                RegisterOutcome::Replaced { previous_session: reg.session_id }
            },
            Some(_) => {
                return Err(RegistryError::DuplicateAddress {
                    group: group.to_string(),
                    logical: address.logical,
                });
            },
            None => {
                if members.is_some_and(|m| m.len() >= self.max_members_per_group) {
                    return Err(RegistryError::GroupFull {
                        group: group.to_string(),
                        max: self.max_members_per_group,
                    });
                }
                RegisterOutcome::Created
            },
        };

        if let RegisterOutcome::Replaced { previous_session } = outcome
            && let Some(bindings) = self.sessions.get_mut(&previous_session)
        {
            bindings.remove(&(group.to_string(), address.logical.clone()));
            if bindings.is_empty() {
                self.sessions.remove(&previous_session);
            }
        }

        self.sessions
            .entry(session_id)
            .or_default()
            .insert((group.to_string(), address.logical.clone()));
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(address.logical.clone(), Registration { address, session_id });

        Ok(outcome)
    }

    /// Remove a binding. Idempotent.
    pub fn unregister(&mut self, group: &str, logical: &LogicalAddr) -> Option<Registration> {
        let members = self.groups.get_mut(group)?;
        let removed = members.remove(logical)?;
        if members.is_empty() {
            self.groups.remove(group);
        }

        if let Some(bindings) = self.sessions.get_mut(&removed.session_id) {
            bindings.remove(&(group.to_string(), logical.clone()));
            if bindings.is_empty() {
                self.sessions.remove(&removed.session_id);
            }
        }
        Some(removed)
    }

    /// Remove every binding held by `session_id`.
    pub fn remove_session(&mut self, session_id: u64) -> Vec<(String, Registration)> {
        let Some(bindings) = self.sessions.remove(&session_id) else {
            return Vec::new();
        };

        let mut removed = Vec::with_capacity(bindings.len());
        for (group, logical) in bindings {
            let Some(members) = self.groups.get_mut(&group) else {
                continue;
            };
            if let Some(reg) = members.remove(&logical) {
                removed.push((group.clone(), reg));
            }
            if members.is_empty() {
                self.groups.remove(&group);
            }
        }
        removed
    }

    /// Binding for `logical` in `group`.
    pub fn lookup(&self, group: &str, logical: &LogicalAddr) -> Option<&Registration> {
        self.groups.get(group)?.get(logical)
    }

    /// Members of `group` in logical address order.
    pub fn members(&self, group: &str) -> impl Iterator<Item = &Registration> {
        self.groups.get(group).into_iter().flat_map(BTreeMap::values)
    }

    /// True if the session holds at least one binding.
    pub fn is_bound(&self, session_id: u64) -> bool {
        self.sessions.contains_key(&session_id)
    }

    /// Number of non-empty groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// True if `group` has at least one member.
    pub fn has_group(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }
}
