//! Group membership state machine.
//!
//! Each member runs one [`Membership`] per group. It discovers other members
//! through broadcast probes and announcements, elects the coordinator by rank,
//! and merges partitions into a single view.
//!
//! # Lifecycle
//!
//! ```text
//!   Disconnected ──start──► Joining ──reply──► (InstallView) ──► Stable
//!                              │
//!                              └─timeout──► Singleton ──merge──► Stable
//!                                               ▲                  │
//!                                               └────suspect───────┘
//! ```
//!
//! `Merging` covers both sides of a merge round: the acting coordinator
//! collecting responses and a respondent waiting for the resulting install.
//!
//! # Sans-IO
//!
//! Methods take `now` and return [`MembershipAction`]s. The caller wraps
//! messages in [`Envelope::Gms`] and sends them through the router. Local
//! installs are applied directly, so no action ever addresses this member.

mod merge;
mod messages;

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

pub use merge::{PendingMerge, acting_coordinator, merge_views, outranks};
pub use messages::{Envelope, GmsMessage, MergeContribution, MergeId};
use relaymesh_proto::{Address, LogicalAddr};

use crate::{
    env::Environment,
    error::MembershipError,
    view::{View, ViewId},
};

/// Membership protocol timing.
#[derive(Debug, Clone)]
pub struct MembershipConfig {
    /// How long to wait for a coordinator to answer a probe or a join request
    pub join_timeout: Duration,
    /// Probes sent before settling on a singleton view
    pub max_join_attempts: u32,
    /// Lower bound of the announce interval
    pub merge_min_interval: Duration,
    /// Upper bound of the announce interval
    pub merge_max_interval: Duration,
    /// How long an acting coordinator waits for merge responses
    pub merge_timeout: Duration,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(1),
            max_join_attempts: 2,
            merge_min_interval: Duration::from_secs(1),
            merge_max_interval: Duration::from_secs(3),
            merge_timeout: Duration::from_secs(5),
        }
    }
}

/// Externally visible membership state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    /// Not started, or stopped
    Disconnected,
    /// Looking for a coordinator
    Joining,
    /// Sole member of the installed view
    Singleton,
    /// Member of a view with other members
    Stable,
    /// Taking part in a merge round
    Merging,
}

/// Effects requested by the membership state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipAction {
    /// Send to one member of the group.
    Send {
        /// Recipient
        to: LogicalAddr,
        /// Message
        message: GmsMessage,
    },

    /// Send to every other member of the group.
    Broadcast(GmsMessage),

    /// A new view was installed locally.
    ViewInstalled(View),
}

#[derive(Debug, Clone)]
enum Phase {
    Disconnected,
    Joining {
        deadline: Instant,
        attempts: u32,
        target: Option<Address>,
    },
    Member,
}

/// Respondent side of a merge round.
#[derive(Debug, Clone)]
struct Participation {
    merge_id: MergeId,
    acting: LogicalAddr,
    until: Instant,
}

/// Membership state machine for one member of one group.
pub struct Membership<E: Environment> {
    local: Address,
    config: MembershipConfig,
    env: E,
    phase: Phase,
    view: Option<View>,
    /// Highest view sequence ever installed, kept across stop and restart
    last_sequence: u64,
    pending: Option<PendingMerge>,
    participating: Option<Participation>,
    /// Foreign partitions waiting for the next merge round, keyed by
    /// representative
    candidates: BTreeMap<LogicalAddr, (Address, ViewId)>,
    next_announce: Option<Instant>,
}

impl<E: Environment> Membership<E> {
    /// Create a stopped state machine for `local`.
    pub fn new(local: Address, config: MembershipConfig, env: E) -> Self {
        Self {
            local,
            config,
            env,
            phase: Phase::Disconnected,
            view: None,
            last_sequence: 0,
            pending: None,
            participating: None,
            candidates: BTreeMap::new(),
            next_announce: None,
        }
    }

    /// Local member address.
    pub fn local(&self) -> &Address {
        &self.local
    }

    /// Installed view, if any.
    pub fn view(&self) -> Option<&View> {
        self.view.as_ref()
    }

    /// True if the local member coordinates the installed view.
    pub fn is_coordinator(&self) -> bool {
        self.view.as_ref().is_some_and(|v| v.is_coordinator(&self.local.logical))
    }

    /// Current state.
    pub fn state(&self) -> MembershipState {
        match &self.phase {
            Phase::Disconnected => MembershipState::Disconnected,
            Phase::Joining { .. } => MembershipState::Joining,
            Phase::Member if self.pending.is_some() || self.participating.is_some() => {
                MembershipState::Merging
            },
            Phase::Member if self.view.as_ref().is_some_and(|v| v.size() > 1) => {
                MembershipState::Stable
            },
            Phase::Member => MembershipState::Singleton,
        }
    }

    /// Begin looking for a coordinator.
    ///
    /// No-op unless disconnected.
    pub fn start(&mut self, now: Instant) -> Vec<MembershipAction> {
        if !matches!(self.phase, Phase::Disconnected) {
            return Vec::new();
        }

        tracing::debug!(local = %self.local, "probing for coordinator");
        self.phase = Phase::Joining {
            deadline: now + self.config.join_timeout,
            attempts: 1,
            target: None,
        };
        vec![MembershipAction::Broadcast(GmsMessage::JoinProbe { sender: self.local.clone() })]
    }

    /// Leave the group. All in-flight protocol state is dropped.
    pub fn stop(&mut self) {
        self.phase = Phase::Disconnected;
        self.view = None;
        self.pending = None;
        self.participating = None;
        self.candidates.clear();
        self.next_announce = None;
    }

    /// Process a membership message received from the group.
    pub fn handle_message(
        &mut self,
        message: GmsMessage,
        now: Instant,
    ) -> Result<Vec<MembershipAction>, MembershipError> {
        if matches!(self.phase, Phase::Disconnected) {
            return Err(self.unexpected(&message));
        }

        match message {
            GmsMessage::JoinProbe { sender } => Ok(self.on_join_probe(&sender)),
            GmsMessage::ProbeReply { view_id, .. } => Ok(self.on_probe_reply(view_id, now)),
            GmsMessage::JoinRequest { joiner } => self.on_join_request(joiner, now),
            GmsMessage::Announce { sender, view_id } => Ok(self.on_announce(sender, view_id)),
            GmsMessage::MergeTrigger { partition, view_id, .. } => {
                Ok(self.on_merge_trigger(partition, view_id))
            },
            GmsMessage::MergeRequest { merge_id, acting } => {
                Ok(self.on_merge_request(merge_id, acting, now))
            },
            GmsMessage::MergeResponse { merge_id, sender, contribution } => {
                Ok(self.on_merge_response(merge_id, &sender, contribution, now))
            },
            GmsMessage::InstallView { view } => self.install_remote(view, now),
        }
    }

    /// The router reported that `logical` lost its session.
    pub fn handle_suspect(&mut self, logical: &LogicalAddr, now: Instant) -> Vec<MembershipAction> {
        self.candidates.remove(logical);
        if let Some(pending) = &mut self.pending {
            pending.record(logical, None);
        }

        if let Phase::Joining { deadline, target, .. } = &mut self.phase {
            if target.as_ref().is_some_and(|t| &t.logical == logical) {
                *target = None;
                *deadline = now + self.config.join_timeout;
                return vec![MembershipAction::Broadcast(GmsMessage::JoinProbe {
                    sender: self.local.clone(),
                })];
            }
            return Vec::new();
        }

        let next = self
            .view
            .as_ref()
            .filter(|v| v.contains(logical))
            .and_then(|v| v.without(logical))
            // The first surviving member coordinates the shrunken view.
            .filter(|next| next.is_coordinator(&self.local.logical));

        let mut actions = Vec::new();
        if let Some(next) = next {
            tracing::info!(local = %self.local, suspect = %logical, view = %next.id(), "removing suspect");
            actions = self.broadcast_install(&next);
            actions.push(self.install_local(next, now));
        }
        // A lost partition representative may have been the last response
        // the pending round was waiting for.
        self.complete_if_done(now, &mut actions);
        actions
    }

    /// Drive timers.
    pub fn tick(&mut self, now: Instant) -> Vec<MembershipAction> {
        let mut actions = Vec::new();

        if let Phase::Joining { deadline, attempts, target } = &mut self.phase
            && now >= *deadline
        {
            if *attempts < self.config.max_join_attempts {
                *attempts += 1;
                *deadline = now + self.config.join_timeout;
                *target = None;
                actions.push(MembershipAction::Broadcast(GmsMessage::JoinProbe {
                    sender: self.local.clone(),
                }));
            } else {
                let view = View::singleton(self.local.clone(), self.last_sequence + 1);
                tracing::info!(local = %self.local, view = %view.id(), "no coordinator found, installing singleton");
                actions.push(self.install_local(view, now));
            }
            return actions;
        }

        if !matches!(self.phase, Phase::Member) {
            return actions;
        }

        if self.participating.as_ref().is_some_and(|p| now >= p.until) {
            self.participating = None;
        }

        if self.pending.as_ref().is_some_and(|p| now >= p.deadline())
            && let Some(pending) = self.pending.take()
        {
            let error = MembershipError::MergeTimeout {
                merge_id: pending.merge_id(),
                missing: pending.missing(),
            };
            tracing::warn!(local = %self.local, %error, "merge round incomplete");
            actions.extend(self.finish_merge(pending, now));
        }

        if self.pending.is_none() && self.participating.is_none() && !self.candidates.is_empty() {
            if self.is_coordinator() {
                actions.extend(self.start_round(now));
            } else {
                self.candidates.clear();
            }
        }

        if self.next_announce.is_some_and(|at| now >= at)
            && let Some(view) = &self.view
        {
            actions.push(MembershipAction::Broadcast(GmsMessage::Announce {
                sender: self.local.clone(),
                view_id: view.id().clone(),
            }));
            self.next_announce = Some(now + self.announce_interval());
        }

        actions
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let joining = match &self.phase {
            Phase::Joining { deadline, .. } => Some(*deadline),
            _ => None,
        };
        [
            joining,
            self.next_announce,
            self.pending.as_ref().map(PendingMerge::deadline),
            self.participating.as_ref().map(|p| p.until),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn on_join_probe(&self, sender: &Address) -> Vec<MembershipAction> {
        if sender.logical == self.local.logical || !self.is_coordinator() {
            return Vec::new();
        }
        let Some(view) = &self.view else {
            return Vec::new();
        };
        vec![MembershipAction::Send {
            to: sender.logical.clone(),
            message: GmsMessage::ProbeReply {
                sender: self.local.clone(),
                view_id: view.id().clone(),
            },
        }]
    }

    fn on_probe_reply(&mut self, view_id: ViewId, now: Instant) -> Vec<MembershipAction> {
        let join_timeout = self.config.join_timeout;
        let Phase::Joining { deadline, target, .. } = &mut self.phase else {
            return Vec::new();
        };
        if target.is_some() {
            return Vec::new();
        }

        let coordinator = view_id.coordinator;
        tracing::debug!(local = %self.local, %coordinator, "requesting to join");
        *deadline = now + join_timeout;
        *target = Some(coordinator.clone());
        vec![MembershipAction::Send {
            to: coordinator.logical,
            message: GmsMessage::JoinRequest { joiner: self.local.clone() },
        }]
    }

    fn on_join_request(
        &mut self,
        joiner: Address,
        now: Instant,
    ) -> Result<Vec<MembershipAction>, MembershipError> {
        let message = "JoinRequest";
        if !self.is_coordinator() {
            return Err(MembershipError::UnexpectedMessage { state: self.state(), message });
        }
        let Some(view) = &self.view else {
            return Err(MembershipError::UnexpectedMessage { state: self.state(), message });
        };

        if view.find(&joiner.logical) == Some(&joiner) {
            return Ok(vec![MembershipAction::Send {
                to: joiner.logical,
                message: GmsMessage::InstallView { view: view.clone() },
            }]);
        }

        let next = view.with(joiner);
        tracing::info!(local = %self.local, view = %next, "admitting member");
        let mut actions = self.broadcast_install(&next);
        actions.push(self.install_local(next, now));
        Ok(actions)
    }

    fn on_announce(&mut self, sender: Address, view_id: ViewId) -> Vec<MembershipAction> {
        if !matches!(self.phase, Phase::Member) || sender.logical == self.local.logical {
            return Vec::new();
        }
        let Some(view) = &self.view else {
            return Vec::new();
        };
        if view.contains(&sender.logical) || view.id() == &view_id {
            return Vec::new();
        }

        let partition = if view.contains(&view_id.coordinator.logical) {
            sender
        } else {
            view_id.coordinator.clone()
        };

        if self.is_coordinator() {
            self.consider_merge(partition, view_id)
        } else {
            let Some(coordinator) = view.coordinator() else {
                return Vec::new();
            };
            vec![MembershipAction::Send {
                to: coordinator.logical.clone(),
                message: GmsMessage::MergeTrigger {
                    sender: self.local.clone(),
                    partition,
                    view_id,
                },
            }]
        }
    }

    fn on_merge_trigger(&mut self, partition: Address, view_id: ViewId) -> Vec<MembershipAction> {
        if !matches!(self.phase, Phase::Member) {
            return Vec::new();
        }
        if self.is_coordinator() {
            return self.consider_merge(partition, view_id);
        }
        let Some(coordinator) = self.view.as_ref().and_then(View::coordinator) else {
            return Vec::new();
        };
        vec![MembershipAction::Send {
            to: coordinator.logical.clone(),
            message: GmsMessage::MergeTrigger { sender: self.local.clone(), partition, view_id },
        }]
    }

    /// Decide what to do about a foreign partition represented by `partition`.
    ///
    /// Coordinators that are outranked hand the merge to the higher ranked
    /// coordinator. Everything else is batched for the next round.
    fn consider_merge(&mut self, partition: Address, view_id: ViewId) -> Vec<MembershipAction> {
        let Some(view) = &self.view else {
            return Vec::new();
        };
        if partition.logical == self.local.logical
            || view.id() == &view_id
            || view.contains(&partition.logical)
        {
            return Vec::new();
        }

        if partition == view_id.coordinator && outranks(&partition, &self.local) {
            tracing::debug!(local = %self.local, %partition, "deferring merge to higher ranked coordinator");
            return vec![MembershipAction::Send {
                to: partition.logical,
                message: GmsMessage::MergeTrigger {
                    sender: self.local.clone(),
                    partition: self.local.clone(),
                    view_id: view.id().clone(),
                },
            }];
        }

        self.candidates.insert(partition.logical.clone(), (partition, view_id));
        Vec::new()
    }

    fn start_round(&mut self, now: Instant) -> Vec<MembershipAction> {
        let partitions: Vec<Address> =
            std::mem::take(&mut self.candidates).into_values().map(|(rep, _)| rep).collect();
        let merge_id = MergeId(self.env.random_u64());

        tracing::info!(
            local = %self.local,
            %merge_id,
            partitions = partitions.len(),
            "starting merge round"
        );

        let actions = partitions
            .iter()
            .map(|rep| MembershipAction::Send {
                to: rep.logical.clone(),
                message: GmsMessage::MergeRequest { merge_id, acting: self.local.clone() },
            })
            .collect();
        self.pending = Some(PendingMerge::new(merge_id, now + self.config.merge_timeout, partitions));
        actions
    }

    fn on_merge_request(
        &mut self,
        merge_id: MergeId,
        acting: Address,
        now: Instant,
    ) -> Vec<MembershipAction> {
        let Some(view) = self.view.clone().filter(|_| matches!(self.phase, Phase::Member)) else {
            return vec![self.merge_response(merge_id, acting.logical, None)];
        };

        if self.pending.is_some() {
            if !outranks(&acting, &self.local) {
                return vec![self.merge_response(merge_id, acting.logical, None)];
            }
            tracing::debug!(local = %self.local, %acting, "abandoning own merge round");
            self.pending = None;
        }

        if let Some(p) = &self.participating
            && p.merge_id != merge_id
            && now < p.until
        {
            return vec![self.merge_response(merge_id, acting.logical, None)];
        }

        let members = if view.is_coordinator(&self.local.logical) {
            view.members().to_vec()
        } else {
            vec![self.local.clone()]
        };
        self.participating = Some(Participation {
            merge_id,
            acting: acting.logical.clone(),
            until: now + self.config.merge_timeout,
        });

        let contribution = MergeContribution { view_id: view.id().clone(), members };
        vec![self.merge_response(merge_id, acting.logical, Some(contribution))]
    }

    fn merge_response(
        &self,
        merge_id: MergeId,
        to: LogicalAddr,
        contribution: Option<MergeContribution>,
    ) -> MembershipAction {
        MembershipAction::Send {
            to,
            message: GmsMessage::MergeResponse { merge_id, sender: self.local.clone(), contribution },
        }
    }

    fn on_merge_response(
        &mut self,
        merge_id: MergeId,
        sender: &Address,
        contribution: Option<MergeContribution>,
        now: Instant,
    ) -> Vec<MembershipAction> {
        let Some(pending) = &mut self.pending else {
            return Vec::new();
        };
        if pending.merge_id() != merge_id || !pending.record(&sender.logical, contribution) {
            return Vec::new();
        }

        let mut actions = Vec::new();
        self.complete_if_done(now, &mut actions);
        actions
    }

    fn complete_if_done(&mut self, now: Instant, actions: &mut Vec<MembershipAction>) {
        if self.pending.as_ref().is_some_and(PendingMerge::is_complete)
            && let Some(pending) = self.pending.take()
        {
            actions.extend(self.finish_merge(pending, now));
        }
    }

    fn finish_merge(&mut self, pending: PendingMerge, now: Instant) -> Vec<MembershipAction> {
        let merge_id = pending.merge_id();
        let foreign = pending.into_contributions();
        let Some(view) = &self.view else {
            return Vec::new();
        };
        if foreign.is_empty() {
            tracing::debug!(local = %self.local, %merge_id, "no partition joined the merge");
            return Vec::new();
        }

        let mut contributions = Vec::with_capacity(foreign.len() + 1);
        contributions.push(MergeContribution {
            view_id: view.id().clone(),
            members: view.members().to_vec(),
        });
        contributions.extend(foreign);

        let merged = merge_views(&self.local, &contributions);
        tracing::info!(local = %self.local, %merge_id, view = %merged, "merge complete");

        let mut actions = self.broadcast_install(&merged);
        actions.push(self.install_local(merged, now));
        actions
    }

    fn install_remote(
        &mut self,
        view: View,
        now: Instant,
    ) -> Result<Vec<MembershipAction>, MembershipError> {
        if !view.is_well_formed() {
            return Err(MembershipError::MalformedView(view.id().clone()));
        }
        if !view.contains(&self.local.logical) {
            return Err(MembershipError::NotMember {
                view_id: view.id().clone(),
                local: self.local.logical.clone(),
            });
        }
        if let Some(current) = &self.view
            && !view.id().is_newer_than(current.id())
        {
            return Err(MembershipError::StaleViewIgnored {
                current: current.id().clone(),
                incoming: view.id().clone(),
            });
        }

        if self.participating.as_ref().is_some_and(|p| !view.is_coordinator(&p.acting)) {
            tracing::debug!(local = %self.local, view = %view.id(), "install from outside merge round");
        }
        self.participating = None;
        if !view.is_coordinator(&self.local.logical) {
            self.pending = None;
        }

        tracing::debug!(local = %self.local, view = %view, "installing view");
        Ok(vec![self.install_local(view, now)])
    }

    /// `InstallView` to every member of `view` other than this one.
    fn broadcast_install(&self, view: &View) -> Vec<MembershipAction> {
        view.members()
            .iter()
            .filter(|m| m.logical != self.local.logical)
            .map(|m| MembershipAction::Send {
                to: m.logical.clone(),
                message: GmsMessage::InstallView { view: view.clone() },
            })
            .collect()
    }

    fn install_local(&mut self, view: View, now: Instant) -> MembershipAction {
        self.last_sequence = self.last_sequence.max(view.id().sequence);
        self.candidates.retain(|logical, _| !view.contains(logical));
        self.phase = Phase::Member;
        self.view = Some(view.clone());
        if self.next_announce.is_none() {
            self.next_announce = Some(now + self.announce_interval());
        }
        MembershipAction::ViewInstalled(view)
    }

    /// Uniform in `[merge_min_interval, merge_max_interval]` at millisecond
    /// granularity.
    fn announce_interval(&self) -> Duration {
        let min = self.config.merge_min_interval.as_millis() as u64;
        let max = (self.config.merge_max_interval.as_millis() as u64).max(min);
        Duration::from_millis(min + self.env.random_u64() % (max - min + 1))
    }

    fn unexpected(&self, message: &GmsMessage) -> MembershipError {
        MembershipError::UnexpectedMessage { state: self.state(), message: message.kind() }
    }
}
