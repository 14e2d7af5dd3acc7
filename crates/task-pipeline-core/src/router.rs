use crate::broker::Delivery;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Identifier of one registered subscriber
pub type MemberId = u64;

#[derive(Clone)]
struct Member {
    id: MemberId,
    sender: mpsc::Sender<Delivery>,
}

#[derive(Default)]
struct Group {
    members: Vec<Member>,
    cursor: usize,
}

impl Group {
    /// Members in round-robin order starting at the cursor; advances the cursor.
    fn rotation(&mut self) -> Vec<Member> {
        let len = self.members.len();
        let start = self.cursor % len;
        self.cursor = (start + 1) % len;

        self.members[start..]
            .iter()
            .chain(self.members[..start].iter())
            .cloned()
            .collect()
    }
}

#[derive(Default)]
struct SubjectEntry {
    groups: HashMap<String, Group>,
    plain: Vec<Member>,
}

impl SubjectEntry {
    fn prune_closed(&mut self) {
        self.plain.retain(|m| !m.sender.is_closed());
        self.groups.retain(|_, group| {
            group.members.retain(|m| !m.sender.is_closed());
            !group.members.is_empty()
        });
    }

    fn is_empty(&self) -> bool {
        self.plain.is_empty() && self.groups.is_empty()
    }
}

/// Result of routing one published message
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Subscribers that received a copy
    pub delivered: usize,
    /// Queue groups that existed but had no member able to take the message
    pub dropped_groups: usize,
}

impl RouteOutcome {
    pub fn is_dropped(&self) -> bool {
        self.delivered == 0
    }
}

/// Subject routing table with queue-group load balancing.
///
/// Within a group each message goes to a single member, chosen round-robin.
/// A member whose buffer is full is skipped in favour of the next; if every
/// member is full the publisher waits on the first one in rotation order.
/// Members whose receiver has been dropped are pruned on the next publish.
#[derive(Default)]
pub struct QueueGroupRouter {
    subjects: RwLock<HashMap<String, SubjectEntry>>,
    index: RwLock<HashMap<MemberId, (String, Option<String>)>>,
    next_id: AtomicU64,
}

impl QueueGroupRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and return its id
    pub fn register(
        &self,
        subject: &str,
        group: Option<&str>,
        sender: mpsc::Sender<Delivery>,
    ) -> MemberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let member = Member { id, sender };

        {
            let mut subjects = self.subjects.write();
            let entry = subjects.entry(subject.to_string()).or_default();
            match group {
                Some(name) => entry
                    .groups
                    .entry(name.to_string())
                    .or_default()
                    .members
                    .push(member),
                None => entry.plain.push(member),
            }
        }

        self.index
            .write()
            .insert(id, (subject.to_string(), group.map(str::to_string)));

        debug!("Registered member {} on {} (group: {:?})", id, subject, group);
        id
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn remove(&self, id: MemberId) -> bool {
        let Some((subject, group)) = self.index.write().remove(&id) else {
            return false;
        };

        let mut subjects = self.subjects.write();
        if let Some(entry) = subjects.get_mut(&subject) {
            match &group {
                Some(name) => {
                    if let Some(g) = entry.groups.get_mut(name) {
                        g.members.retain(|m| m.id != id);
                        if g.members.is_empty() {
                            entry.groups.remove(name);
                        }
                    }
                }
                None => entry.plain.retain(|m| m.id != id),
            }
            if entry.is_empty() {
                subjects.remove(&subject);
            }
        }

        debug!("Removed member {} from {}", id, subject);
        true
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.subjects.write().clear();
        self.index.write().clear();
    }

    /// Live members of a queue group (or plain subscribers when `group` is None)
    pub fn member_count(&self, subject: &str, group: Option<&str>) -> usize {
        let subjects = self.subjects.read();
        let Some(entry) = subjects.get(subject) else {
            return 0;
        };

        let live = |members: &[Member]| members.iter().filter(|m| !m.sender.is_closed()).count();
        match group {
            Some(name) => entry.groups.get(name).map(|g| live(&g.members)).unwrap_or(0),
            None => live(&entry.plain),
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.index.read().len()
    }

    /// Route a message to one member of every group and to all plain subscribers
    pub async fn route(&self, delivery: Delivery) -> RouteOutcome {
        let (groups, plain) = {
            let mut subjects = self.subjects.write();
            let Some(entry) = subjects.get_mut(&delivery.subject) else {
                return RouteOutcome::default();
            };

            entry.prune_closed();
            let groups: Vec<Vec<Member>> =
                entry.groups.values_mut().map(Group::rotation).collect();
            let plain = entry.plain.clone();

            if entry.is_empty() {
                subjects.remove(&delivery.subject);
            }
            (groups, plain)
        };

        let mut outcome = RouteOutcome::default();

        for candidates in groups {
            if deliver_to_one(candidates, delivery.clone()).await.is_some() {
                outcome.delivered += 1;
            } else {
                outcome.dropped_groups += 1;
            }
        }

        for member in plain {
            if member.sender.send(delivery.clone()).await.is_ok() {
                outcome.delivered += 1;
            }
        }

        outcome
    }
}

async fn deliver_to_one(candidates: Vec<Member>, mut delivery: Delivery) -> Option<MemberId> {
    let mut full = Vec::with_capacity(candidates.len());

    for member in candidates {
        match member.sender.try_send(delivery) {
            Ok(()) => return Some(member.id),
            Err(TrySendError::Full(d)) => {
                delivery = d;
                full.push(member);
            }
            Err(TrySendError::Closed(d)) => delivery = d,
        }
    }

    // Everyone is busy: wait for room on the rotation pick
    for member in full {
        match member.sender.send(delivery).await {
            Ok(()) => return Some(member.id),
            Err(mpsc::error::SendError(d)) => delivery = d,
        }
    }

    None
}
