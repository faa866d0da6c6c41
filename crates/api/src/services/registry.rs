//! Session registry: live push channels and delivery groups.
//!
//! Maps authenticated parties to their connected sockets and maintains the
//! named delivery groups (`party_<id>`, `driver_<id>`, `ride_<id>`). Each
//! channel is an unbounded sender feeding one socket's write half, which
//! gives per-channel FIFO; delivery is at-most-once and best-effort, and a
//! failed send only means the socket is already gone.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use uuid::Uuid;

use domain::events::ServerEvent;
use domain::models::Role;

/// Identifier of a live push channel (one per connected socket).
pub type ChannelId = Uuid;

/// Direct group of a party, regardless of role.
pub fn party_group(party_id: Uuid) -> String {
    format!("party_{party_id}")
}

/// Role-scoped direct group of a driver; ride offers land here.
pub fn driver_group(driver_id: Uuid) -> String {
    format!("driver_{driver_id}")
}

/// Shared group of the two participants of an active ride.
pub fn ride_group(ride_id: Uuid) -> String {
    format!("ride_{ride_id}")
}

struct SessionEntry {
    party_id: Uuid,
    role: Role,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<ChannelId, SessionEntry>,
    groups: HashMap<String, HashSet<ChannelId>>,
    memberships: HashMap<ChannelId, HashSet<String>>,
}

/// Registry of connected parties and their delivery groups.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a connected party. Returns the channel id and the receiving
    /// end that the socket task drains.
    ///
    /// The channel auto-joins the party's direct group, and drivers
    /// additionally their role-scoped group.
    pub fn register(
        &self,
        party_id: Uuid,
        role: Role,
    ) -> (ChannelId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let channel = Uuid::new_v4();

        let mut inner = self.write();
        inner.sessions.insert(
            channel,
            SessionEntry {
                party_id,
                role,
                sender,
            },
        );
        join_locked(&mut inner, channel, party_group(party_id));
        if role == Role::Driver {
            join_locked(&mut inner, channel, driver_group(party_id));
        }

        (channel, receiver)
    }

    /// Remove a channel and all its group memberships. Returns the party
    /// that owned it so disconnect cleanup can run.
    pub fn unregister(&self, channel: ChannelId) -> Option<(Uuid, Role)> {
        let mut inner = self.write();
        let entry = inner.sessions.remove(&channel)?;
        if let Some(groups) = inner.memberships.remove(&channel) {
            for group in groups {
                if let Some(members) = inner.groups.get_mut(&group) {
                    members.remove(&channel);
                    if members.is_empty() {
                        inner.groups.remove(&group);
                    }
                }
            }
        }
        Some((entry.party_id, entry.role))
    }

    /// Add a channel to a named group. False when the channel is unknown.
    pub fn join_group(&self, channel: ChannelId, group: &str) -> bool {
        let mut inner = self.write();
        if !inner.sessions.contains_key(&channel) {
            return false;
        }
        join_locked(&mut inner, channel, group.to_string());
        true
    }

    /// Remove a channel from a named group.
    pub fn leave_group(&self, channel: ChannelId, group: &str) {
        let mut inner = self.write();
        if let Some(members) = inner.groups.get_mut(group) {
            members.remove(&channel);
            if members.is_empty() {
                inner.groups.remove(group);
            }
        }
        if let Some(groups) = inner.memberships.get_mut(&channel) {
            groups.remove(group);
        }
    }

    /// Deliver an event to one channel. False when the channel is gone.
    pub fn send_to_channel(&self, channel: ChannelId, event: ServerEvent) -> bool {
        let inner = self.read();
        match inner.sessions.get(&channel) {
            Some(entry) => entry.sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver an event to every member of a group. Returns the number of
    /// channels that accepted it.
    pub fn send_to_group(&self, group: &str, event: &ServerEvent) -> usize {
        let inner = self.read();
        let Some(members) = inner.groups.get(group) else {
            return 0;
        };
        members
            .iter()
            .filter(|channel| {
                inner
                    .sessions
                    .get(channel)
                    .is_some_and(|entry| entry.sender.send(event.clone()).is_ok())
            })
            .count()
    }

    /// Number of channels in a group (tests and gauges).
    pub fn group_size(&self, group: &str) -> usize {
        self.read().groups.get(group).map_or(0, HashSet::len)
    }

    /// Number of live channels (tests and gauges).
    pub fn session_count(&self) -> usize {
        self.read().sessions.len()
    }
}

fn join_locked(inner: &mut Inner, channel: ChannelId, group: String) {
    inner
        .groups
        .entry(group.clone())
        .or_default()
        .insert(channel);
    inner.memberships.entry(channel).or_default().insert(group);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pong() -> ServerEvent {
        ServerEvent::Pong {
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_register_joins_direct_groups() {
        let registry = SessionRegistry::new();
        let driver_id = Uuid::new_v4();
        let (channel, _rx) = registry.register(driver_id, Role::Driver);

        assert_eq!(registry.group_size(&party_group(driver_id)), 1);
        assert_eq!(registry.group_size(&driver_group(driver_id)), 1);
        assert!(registry.send_to_channel(channel, pong()));
    }

    #[tokio::test]
    async fn test_passenger_does_not_join_driver_group() {
        let registry = SessionRegistry::new();
        let passenger_id = Uuid::new_v4();
        let (_channel, _rx) = registry.register(passenger_id, Role::Passenger);

        assert_eq!(registry.group_size(&party_group(passenger_id)), 1);
        assert_eq!(registry.group_size(&driver_group(passenger_id)), 0);
    }

    #[tokio::test]
    async fn test_send_to_group_reaches_all_members() {
        let registry = SessionRegistry::new();
        let ride_id = Uuid::new_v4();
        let (c1, mut rx1) = registry.register(Uuid::new_v4(), Role::Passenger);
        let (c2, mut rx2) = registry.register(Uuid::new_v4(), Role::Driver);
        registry.join_group(c1, &ride_group(ride_id));
        registry.join_group(c2, &ride_group(ride_id));

        let delivered = registry.send_to_group(&ride_group(ride_id), &pong());
        assert_eq!(delivered, 2);
        assert!(matches!(rx1.recv().await, Some(ServerEvent::Pong { .. })));
        assert!(matches!(rx2.recv().await, Some(ServerEvent::Pong { .. })));
    }

    #[tokio::test]
    async fn test_per_channel_fifo() {
        let registry = SessionRegistry::new();
        let (channel, mut rx) = registry.register(Uuid::new_v4(), Role::Passenger);

        for i in 0..3 {
            registry.send_to_channel(channel, ServerEvent::error(format!("e{i}")));
        }
        for i in 0..3 {
            match rx.recv().await {
                Some(ServerEvent::Error { message, .. }) => assert_eq!(message, format!("e{i}")),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_unregister_removes_all_memberships() {
        let registry = SessionRegistry::new();
        let party_id = Uuid::new_v4();
        let ride_id = Uuid::new_v4();
        let (channel, _rx) = registry.register(party_id, Role::Driver);
        registry.join_group(channel, &ride_group(ride_id));

        let removed = registry.unregister(channel);
        assert_eq!(removed, Some((party_id, Role::Driver)));
        assert_eq!(registry.group_size(&party_group(party_id)), 0);
        assert_eq!(registry.group_size(&driver_group(party_id)), 0);
        assert_eq!(registry.group_size(&ride_group(ride_id)), 0);
        assert!(!registry.send_to_channel(channel, pong()));
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn test_join_unknown_channel_is_refused() {
        let registry = SessionRegistry::new();
        assert!(!registry.join_group(Uuid::new_v4(), "ride_x"));
    }

    #[tokio::test]
    async fn test_send_to_dropped_receiver_is_best_effort() {
        let registry = SessionRegistry::new();
        let party_id = Uuid::new_v4();
        let (channel, rx) = registry.register(party_id, Role::Passenger);
        drop(rx);

        // The channel is closed but still registered; sends report failure
        // without panicking.
        assert!(!registry.send_to_channel(channel, pong()));
        assert_eq!(registry.send_to_group(&party_group(party_id), &pong()), 0);
    }
}
