//! Merge coordinator logic.
//!
//! Pure functions over addresses and contributions, plus the bookkeeping the
//! acting coordinator keeps for one round. Election is a comparison over a
//! total order, never a vote: the coordinator with the lowest logical address
//! acts, and every other coordinator defers to it.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Instant,
};

use relaymesh_proto::{Address, LogicalAddr};

use super::messages::{MergeContribution, MergeId};
use crate::view::{View, ViewId};

/// True if `a` outranks `b` for coordination.
///
/// Lower logical address ranks higher. The same logical address held by two
/// incarnations ranks the newer incarnation higher.
pub fn outranks(a: &Address, b: &Address) -> bool {
    match a.logical.cmp(&b.logical) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => a.incarnation > b.incarnation,
    }
}

/// The coordinator every participant agrees should act.
pub fn acting_coordinator<'a, I>(coordinators: I) -> Option<&'a Address>
where
    I: IntoIterator<Item = &'a Address>,
{
    coordinators.into_iter().fold(None, |best, candidate| match best {
        Some(current) if !outranks(candidate, current) => Some(current),
        _ => Some(candidate),
    })
}

/// Compute the merged view.
///
/// Members are the union of all contributions, deduplicated by logical
/// address (the highest incarnation wins). `acting` comes first, the rest
/// follow in logical address order. The sequence number is one past the
/// highest contributed sequence.
pub fn merge_views(acting: &Address, contributions: &[MergeContribution]) -> View {
    let mut members: BTreeMap<LogicalAddr, Address> = BTreeMap::new();
    let mut max_sequence = 0;

    for contribution in contributions {
        max_sequence = max_sequence.max(contribution.view_id.sequence);
        for member in &contribution.members {
            let newer = members
                .get(&member.logical)
                .is_none_or(|existing| member.incarnation > existing.incarnation);
            if newer {
                members.insert(member.logical.clone(), member.clone());
            }
        }
    }

    let acting = match members.remove(&acting.logical) {
        Some(existing) if existing.incarnation > acting.incarnation => existing,
        _ => acting.clone(),
    };

    let mut ordered = Vec::with_capacity(members.len() + 1);
    ordered.push(acting.clone());
    ordered.extend(members.into_values());

    View::new(ViewId::new(acting, max_sequence + 1), ordered)
}

/// State the acting coordinator keeps for one merge round.
///
/// Exists only between sending the requests and installing (or abandoning)
/// the result.
#[derive(Debug, Clone)]
pub struct PendingMerge {
    merge_id: MergeId,
    deadline: Instant,
    /// Partition representatives asked to respond
    expected: BTreeMap<LogicalAddr, Address>,
    contributions: BTreeMap<LogicalAddr, MergeContribution>,
    declined: BTreeSet<LogicalAddr>,
}

impl PendingMerge {
    /// Start tracking a round.
    pub fn new(
        merge_id: MergeId,
        deadline: Instant,
        partitions: impl IntoIterator<Item = Address>,
    ) -> Self {
        Self {
            merge_id,
            deadline,
            expected: partitions.into_iter().map(|a| (a.logical.clone(), a)).collect(),
            contributions: BTreeMap::new(),
            declined: BTreeSet::new(),
        }
    }

    /// Round identifier.
    pub fn merge_id(&self) -> MergeId {
        self.merge_id
    }

    /// When the round gives up on missing partitions.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Representatives the round was sent to.
    pub fn partitions(&self) -> impl Iterator<Item = &Address> {
        self.expected.values()
    }

    /// Record a response. Returns false for senders that were not asked.
    pub fn record(&mut self, sender: &LogicalAddr, contribution: Option<MergeContribution>) -> bool {
        if !self.expected.contains_key(sender) {
            return false;
        }
        match contribution {
            Some(c) => {
                self.contributions.insert(sender.clone(), c);
            },
            None => {
                self.declined.insert(sender.clone());
            },
        }
        true
    }

    /// Every partition has answered.
    pub fn is_complete(&self) -> bool {
        self.expected
            .keys()
            .all(|k| self.contributions.contains_key(k) || self.declined.contains(k))
    }

    /// Partitions that have not answered.
    pub fn missing(&self) -> Vec<LogicalAddr> {
        self.expected
            .keys()
            .filter(|k| !self.contributions.contains_key(*k) && !self.declined.contains(*k))
            .cloned()
            .collect()
    }

    /// Contributions received so far.
    pub fn into_contributions(self) -> Vec<MergeContribution> {
        self.contributions.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;

    fn addr(name: &str, incarnation: u64) -> Address {
        Address::new(name, incarnation)
    }

    fn contribution(coord: &Address, sequence: u64, members: &[Address]) -> MergeContribution {
        MergeContribution {
            view_id: ViewId::new(coord.clone(), sequence),
            members: members.to_vec(),
        }
    }

    #[test]
    fn lower_logical_address_outranks() {
        assert!(outranks(&addr("A", 1), &addr("B", 1)));
        assert!(!outranks(&addr("B", 1), &addr("A", 1)));
        assert!(outranks(&addr("A", 2), &addr("A", 1)));
        assert!(!outranks(&addr("A", 1), &addr("A", 1)));
    }

    #[test]
    fn acting_coordinator_is_highest_ranked() {
        let coords = [addr("node-c", 1), addr("node-a", 1), addr("node-b", 1)];
        assert_eq!(acting_coordinator(&coords), Some(&coords[1]));
        assert_eq!(acting_coordinator(std::iter::empty()), None);
    }

    #[test]
    fn two_singletons_merge_into_pair() {
        let a = addr("A", 1);
        let b = addr("B", 1);
        let merged = merge_views(
            &a,
            &[contribution(&a, 1, std::slice::from_ref(&a)), contribution(&b, 1, std::slice::from_ref(&b))],
        );

        assert_eq!(merged.members(), &[a.clone(), b]);
        assert_eq!(merged.id(), &ViewId::new(a, 2));
        assert!(merged.is_well_formed());
    }

    #[test]
    fn sequence_is_one_past_highest_seen() {
        let a = addr("A", 1);
        let b = addr("B", 1);
        let c = addr("C", 1);
        let merged = merge_views(
            &a,
            &[contribution(&a, 3, &[a.clone()]), contribution(&b, 9, &[b.clone(), c.clone()])],
        );

        assert_eq!(merged.id().sequence, 10);
        assert_eq!(merged.members(), &[a, b, c]);
    }

    #[test]
    fn newest_incarnation_wins_on_duplicate_logical_address() {
        let a = addr("A", 1);
        let b_old = addr("B", 1);
        let b_new = addr("B", 5);
        let merged = merge_views(
            &a,
            &[contribution(&a, 2, &[a.clone(), b_old]), contribution(&b_new, 1, &[b_new.clone()])],
        );

        assert_eq!(merged.size(), 2);
        assert_eq!(merged.find(&LogicalAddr::new("B")), Some(&b_new));
    }

    #[test]
    fn acting_coordinator_first_even_if_it_does_not_sort_first() {
        let b = addr("B", 1);
        let a = addr("A", 1);
        let merged = merge_views(&b, &[contribution(&a, 1, &[a.clone()]), contribution(&b, 1, &[b.clone()])]);

        assert_eq!(merged.members(), &[b.clone(), a]);
        assert!(merged.is_coordinator(&b.logical));
    }

    #[test]
    fn pending_merge_tracks_answers() {
        let now = Instant::now();
        let mut pending = PendingMerge::new(
            MergeId(7),
            now + Duration::from_secs(5),
            [addr("B", 1), addr("C", 1)],
        );

        assert!(!pending.is_complete());
        assert!(!pending.record(&LogicalAddr::new("Z"), None));

        let b = addr("B", 1);
        assert!(pending.record(&b.logical, Some(contribution(&b, 1, &[b.clone()]))));
        assert_eq!(pending.missing(), vec![LogicalAddr::new("C")]);

        assert!(pending.record(&LogicalAddr::new("C"), None));
        assert!(pending.is_complete());
        assert_eq!(pending.into_contributions().len(), 1);
    }

    fn partition_strategy() -> impl Strategy<Value = Vec<MergeContribution>> {
        proptest::collection::vec(
            (0u64..20, proptest::collection::btree_set("[a-f]", 1..4), 1u64..4),
            1..5,
        )
        .prop_map(|parts| {
            parts
                .into_iter()
                .map(|(sequence, names, incarnation)| {
                    let members: Vec<Address> =
                        names.into_iter().map(|n| Address::new(n, incarnation)).collect();
                    MergeContribution {
                        view_id: ViewId::new(members[0].clone(), sequence),
                        members,
                    }
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn merge_is_independent_of_input_order(parts in partition_strategy()) {
            let acting = acting_coordinator(parts.iter().map(|p| &p.view_id.coordinator))
                .cloned()
                .unwrap();

            let forward = merge_views(&acting, &parts);
            let mut reversed = parts.clone();
            reversed.reverse();
            let backward = merge_views(&acting, &reversed);

            prop_assert_eq!(&forward, &backward);
            prop_assert!(forward.is_well_formed());
        }

        #[test]
        fn merged_view_is_newer_than_every_input(parts in partition_strategy()) {
            let acting = acting_coordinator(parts.iter().map(|p| &p.view_id.coordinator))
                .cloned()
                .unwrap();
            let merged = merge_views(&acting, &parts);

            for part in &parts {
                prop_assert!(merged.id().is_newer_than(&part.view_id));
                for member in &part.members {
                    prop_assert!(merged.contains(&member.logical));
                }
            }
        }

        #[test]
        fn election_is_stable(names in proptest::collection::btree_set("[a-z]{1,3}", 1..8)) {
            let coords: Vec<Address> = names.iter().map(|n| Address::new(n.as_str(), 1)).collect();
            let first = acting_coordinator(&coords).cloned();
            let mut shuffled = coords.clone();
            shuffled.reverse();
            let second = acting_coordinator(&shuffled).cloned();

            prop_assert_eq!(&first, &second);
            let first = first.unwrap();
            for c in &coords {
                prop_assert!(c == &first || outranks(&first, c));
            }
        }
    }
}
