//! Membership scenarios over an in-memory bus
//!
//! Members exchange GMS messages through a lossless queue that stands in for
//! the router. Time is virtual; every member is ticked every 10ms.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use proptest::prelude::*;
use rand::{RngCore, SeedableRng, rngs::StdRng};
use relaymesh_core::{
    Address, Environment, GmsMessage, LogicalAddr, Membership, MembershipAction, MembershipConfig,
    MembershipState, View,
};

#[derive(Clone)]
struct SeededEnv {
    rng: Arc<Mutex<StdRng>>,
}

impl SeededEnv {
    fn new(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))) }
    }
}

impl Environment for SeededEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        async move {
            tokio::time::sleep(duration).await;
        }
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap().fill_bytes(buffer);
    }
}

struct Bus {
    now: Instant,
    members: BTreeMap<LogicalAddr, Membership<SeededEnv>>,
    queue: VecDeque<(LogicalAddr, Option<LogicalAddr>, GmsMessage)>,
    /// Messages addressed to these members are dropped
    unreachable: BTreeSet<LogicalAddr>,
    views: BTreeMap<LogicalAddr, Vec<View>>,
}

impl Bus {
    fn new() -> Self {
        Self {
            now: Instant::now(),
            members: BTreeMap::new(),
            queue: VecDeque::new(),
            unreachable: BTreeSet::new(),
            views: BTreeMap::new(),
        }
    }

    fn add(&mut self, name: &str, seed: u64) {
        let address = Address::new(name, 1);
        let membership =
            Membership::new(address.clone(), MembershipConfig::default(), SeededEnv::new(seed));
        self.members.insert(address.logical.clone(), membership);
        self.views.insert(address.logical, Vec::new());
    }

    fn start(&mut self, name: &str) {
        let logical = LogicalAddr::new(name);
        let actions = self.members.get_mut(&logical).unwrap().start(self.now);
        self.apply(&logical, actions);
        self.drain();
    }

    fn suspect(&mut self, name: &str) {
        let suspect = LogicalAddr::new(name);
        self.members.remove(&suspect);
        let names: Vec<LogicalAddr> = self.members.keys().cloned().collect();
        for logical in names {
            let actions = self.members.get_mut(&logical).unwrap().handle_suspect(&suspect, self.now);
            self.apply(&logical, actions);
        }
        self.drain();
    }

    fn run_for(&mut self, duration: Duration) {
        let end = self.now + duration;
        while self.now < end {
            self.now += Duration::from_millis(10);
            let names: Vec<LogicalAddr> = self.members.keys().cloned().collect();
            for logical in names {
                let actions = self.members.get_mut(&logical).unwrap().tick(self.now);
                self.apply(&logical, actions);
            }
            self.drain();
        }
    }

    fn apply(&mut self, from: &LogicalAddr, actions: Vec<MembershipAction>) {
        for action in actions {
            match action {
                MembershipAction::Send { to, message } => {
                    self.queue.push_back((from.clone(), Some(to), message));
                },
                MembershipAction::Broadcast(message) => {
                    self.queue.push_back((from.clone(), None, message));
                },
                MembershipAction::ViewInstalled(view) => {
                    self.views.get_mut(from).unwrap().push(view);
                },
            }
        }
    }

    fn drain(&mut self) {
        while let Some((from, to, message)) = self.queue.pop_front() {
            let recipients: Vec<LogicalAddr> = match to {
                Some(to) => vec![to],
                None => self.members.keys().filter(|k| **k != from).cloned().collect(),
            };
            for recipient in recipients {
                if self.unreachable.contains(&recipient) {
                    continue;
                }
                let Some(member) = self.members.get_mut(&recipient) else {
                    continue;
                };
                if let Ok(actions) = member.handle_message(message.clone(), self.now) {
                    self.apply(&recipient, actions);
                }
            }
        }
    }

    fn view(&self, name: &str) -> Option<&View> {
        self.members[&LogicalAddr::new(name)].view()
    }

    fn installed(&self, name: &str) -> &[View] {
        &self.views[&LogicalAddr::new(name)]
    }
}

fn names(view: &View) -> Vec<&str> {
    view.members().iter().map(|m| m.logical.as_str()).collect()
}

#[test]
fn two_singletons_merge_exactly_once() {
    let mut bus = Bus::new();
    bus.add("A", 1);
    bus.add("B", 2);
    bus.unreachable.insert(LogicalAddr::new("A"));
    bus.unreachable.insert(LogicalAddr::new("B"));
    bus.start("A");
    bus.start("B");

    bus.run_for(Duration::from_secs(3));
    assert_eq!(bus.members[&LogicalAddr::new("A")].state(), MembershipState::Singleton);
    assert_eq!(bus.members[&LogicalAddr::new("B")].state(), MembershipState::Singleton);

    bus.unreachable.clear();
    bus.run_for(Duration::from_secs(15));

    for name in ["A", "B"] {
        let pairs: Vec<&View> = bus.installed(name).iter().filter(|v| v.size() == 2).collect();
        assert_eq!(pairs.len(), 1, "{name} installed {:?}", bus.installed(name));
        assert_eq!(names(pairs[0]), vec!["A", "B"]);
    }
    assert_eq!(bus.view("A"), bus.view("B"));
}

#[test]
fn late_joiner_is_admitted_by_coordinator() {
    let mut bus = Bus::new();
    bus.add("A", 1);
    bus.start("A");
    bus.run_for(Duration::from_secs(3));

    bus.add("B", 2);
    bus.start("B");
    bus.run_for(Duration::from_millis(100));

    assert_eq!(bus.installed("B").len(), 1);
    assert_eq!(names(bus.view("B").unwrap()), vec!["A", "B"]);
    assert_eq!(bus.view("A"), bus.view("B"));
}

#[test]
fn unreachable_partition_is_left_out_after_timeout() {
    let mut bus = Bus::new();
    bus.add("A", 1);
    bus.add("B", 2);
    bus.add("C", 3);
    bus.unreachable.insert(LogicalAddr::new("C"));
    for name in ["A", "B", "C"] {
        bus.start(name);
    }

    bus.run_for(Duration::from_secs(20));

    assert_eq!(names(bus.view("A").unwrap()), vec!["A", "B"]);
    assert_eq!(bus.view("A"), bus.view("B"));
    assert_eq!(bus.view("C").unwrap().size(), 1);
}

#[test]
fn three_singletons_converge() {
    let mut bus = Bus::new();
    for (seed, name) in ["C", "B", "A"].into_iter().enumerate() {
        bus.add(name, seed as u64);
        bus.unreachable.insert(LogicalAddr::new(name));
        bus.start(name);
    }
    bus.run_for(Duration::from_secs(3));
    bus.unreachable.clear();

    bus.run_for(Duration::from_secs(30));

    let view = bus.view("A").unwrap().clone();
    assert_eq!(names(&view), vec!["A", "B", "C"]);
    assert_eq!(bus.view("B"), Some(&view));
    assert_eq!(bus.view("C"), Some(&view));
}

#[test]
fn installed_views_only_move_forward() {
    let mut bus = Bus::new();
    for (seed, name) in ["A", "B", "C", "D"].into_iter().enumerate() {
        bus.add(name, seed as u64 + 10);
        bus.unreachable.insert(LogicalAddr::new(name));
        bus.start(name);
    }
    bus.run_for(Duration::from_secs(3));
    bus.unreachable.clear();
    bus.run_for(Duration::from_secs(30));
    bus.suspect("A");
    bus.run_for(Duration::from_secs(1));

    for name in ["B", "C", "D"] {
        let installed = bus.installed(name);
        for pair in installed.windows(2) {
            assert!(pair[1].id().is_newer_than(pair[0].id()), "{name}: {} then {}", pair[0], pair[1]);
        }
    }
    assert_eq!(names(bus.view("B").unwrap()), vec!["B", "C", "D"]);
    assert_eq!(bus.view("B"), bus.view("D"));
}

#[test]
fn coordinator_loss_promotes_next_member() {
    let mut bus = Bus::new();
    bus.add("A", 1);
    bus.start("A");
    bus.run_for(Duration::from_secs(3));
    bus.add("B", 2);
    bus.start("B");
    bus.add("C", 3);
    bus.start("C");
    bus.run_for(Duration::from_millis(100));
    assert_eq!(names(bus.view("C").unwrap()), vec!["A", "B", "C"]);

    bus.suspect("A");

    let view = bus.view("B").unwrap();
    assert_eq!(names(view), vec!["B", "C"]);
    assert!(view.is_coordinator(&LogicalAddr::new("B")));
    assert_eq!(bus.view("C"), Some(view));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn any_seed_converges_to_single_view(seed in any::<u64>(), count in 2usize..5) {
        let mut bus = Bus::new();
        let all: Vec<String> = (0..count).map(|i| format!("node-{i}")).collect();
        for (i, name) in all.iter().enumerate() {
            bus.add(name, seed.wrapping_add(i as u64));
            bus.unreachable.insert(LogicalAddr::new(name.as_str()));
            bus.start(name);
        }
        bus.run_for(Duration::from_secs(3));
        bus.unreachable.clear();
        bus.run_for(Duration::from_secs(40));

        let first = bus.view(&all[0]).cloned().unwrap();
        prop_assert_eq!(first.size(), count);
        prop_assert!(first.is_coordinator(&LogicalAddr::new("node-0")));
        for name in &all {
            prop_assert_eq!(bus.view(name), Some(&first));
        }
    }
}
