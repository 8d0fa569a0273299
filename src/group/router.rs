use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::connection::Session;
use crate::protocol::ConnectionId;

/// Server-side group table: group name → member connection ids.
///
/// Membership is also mirrored on each [`Session`]; both sides are updated
/// under the router lock so they never disagree.
#[derive(Debug, Default)]
pub struct GroupRouter {
    groups: Mutex<HashMap<String, HashSet<ConnectionId>>>,
}

impl GroupRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the membership of `session` with `names`.
    ///
    /// Closed sessions are ignored; teardown marks a session closed before
    /// removing it, so a late join cannot leave a stale member behind.
    pub fn join(&self, session: &Session, names: HashSet<String>) {
        let Ok(mut groups) = self.groups.lock() else {
            return;
        };
        if session.is_closed() {
            return;
        }
        let id = session.id();

        for name in &names {
            groups.entry(name.clone()).or_default().insert(id);
        }
        let previous = session.replace_groups(names);
        for name in previous {
            if session.in_group(&name) {
                continue;
            }
            remove_member(&mut groups, &name, id);
        }
    }

    /// Add `session` to one more group, keeping existing memberships.
    pub fn add(&self, session: &Session, name: &str) {
        let Ok(mut groups) = self.groups.lock() else {
            return;
        };
        if session.is_closed() {
            return;
        }
        groups.entry(name.to_string()).or_default().insert(session.id());
        session.add_group(name);
    }

    /// Drop every membership of `session`.
    pub fn remove_session(&self, session: &Session) {
        let Ok(mut groups) = self.groups.lock() else {
            return;
        };
        for name in session.take_groups() {
            remove_member(&mut groups, &name, session.id());
        }
    }

    /// Check whether `id` is in `name`.
    pub fn contains(&self, name: &str, id: ConnectionId) -> bool {
        self.groups
            .lock()
            .map(|g| g.get(name).is_some_and(|members| members.contains(&id)))
            .unwrap_or(false)
    }

    /// Distinct members of all `names`, optionally excluding one id.
    pub fn members(&self, names: &[String], exclude: Option<ConnectionId>) -> Vec<ConnectionId> {
        let Ok(groups) = self.groups.lock() else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        names
            .iter()
            .filter_map(|name| groups.get(name))
            .flat_map(|members| members.iter().copied())
            .filter(|id| Some(*id) != exclude && seen.insert(*id))
            .collect()
    }

    /// Names of groups that currently have members.
    pub fn group_names(&self) -> Vec<String> {
        self.groups
            .lock()
            .map(|g| g.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn remove_member(groups: &mut HashMap<String, HashSet<ConnectionId>>, name: &str, id: ConnectionId) {
    if let Some(members) = groups.get_mut(name) {
        members.remove(&id);
        if members.is_empty() {
            groups.remove(name);
        }
    }
}
