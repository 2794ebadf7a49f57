//! Room channel: a named broadcast group with expiry tracking

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::warn;

use crate::core::client::RoomClient;
use crate::core::pool::{Reusable, UsageFlag};
use crate::core::protocol::Command;
use crate::error::Result;

/// Why a room left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomRemoveReason {
    /// Last member left
    Empty,
    /// No broadcast for longer than the TTL
    Expired,
}

/// A named set of connected clients
///
/// Channels are pool-owned: leased on the first `EnterToRoom` for an unseen
/// id and released once empty or expired. Membership and the client's own
/// room slot are kept mutually consistent by [`Channel::add`] and
/// [`Channel::remove`].
pub struct Channel {
    room_id: Mutex<String>,
    members: Mutex<Vec<Arc<RoomClient>>>,
    last_activity: Mutex<Instant>,
    ttl: Mutex<Duration>,
    created_at: Mutex<DateTime<Utc>>,
    usage: UsageFlag,
}

impl Channel {
    pub fn new() -> Self {
        Self {
            room_id: Mutex::new(String::new()),
            members: Mutex::new(Vec::new()),
            last_activity: Mutex::new(Instant::now()),
            ttl: Mutex::new(Duration::from_secs(0)),
            created_at: Mutex::new(Utc::now()),
            usage: UsageFlag::new(),
        }
    }

    /// Initialize a freshly leased channel for a room id
    pub fn lease(&self, room_id: &str, ttl: Duration) {
        *lock(&self.room_id) = room_id.to_string();
        *lock(&self.ttl) = ttl;
        *lock(&self.last_activity) = Instant::now();
        *lock(&self.created_at) = Utc::now();
    }

    pub fn room_id(&self) -> String {
        lock(&self.room_id).clone()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        *lock(&self.created_at)
    }

    /// True when no broadcast has happened for longer than the TTL
    pub fn is_expired(&self) -> bool {
        lock(&self.last_activity).elapsed() >= *lock(&self.ttl)
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.members).is_empty()
    }

    pub fn member_count(&self) -> usize {
        lock(&self.members).len()
    }

    /// Add a client; fails if the client already belongs to any room
    pub fn add(self: &Arc<Self>, client: &Arc<RoomClient>) -> Result<()> {
        client.join_channel(self)?;
        lock(&self.members).push(client.clone());
        Ok(())
    }

    /// Remove a client; fails unless the client's room is this channel
    pub fn remove(self: &Arc<Self>, client: &Arc<RoomClient>) -> Result<()> {
        client.leave_channel(self)?;
        lock(&self.members).retain(|member| !Arc::ptr_eq(member, client));
        Ok(())
    }

    /// Broadcast to every member accepted by `filter`
    ///
    /// Refreshes the activity clock, then forwards the command through each
    /// member's queued send path; sends never block under the member lock.
    /// Returns the number of members the command was handed to.
    pub fn send_all<F>(&self, command: &Command, filter: F) -> usize
    where
        F: Fn(&Arc<RoomClient>) -> bool,
    {
        *lock(&self.last_activity) = Instant::now();

        let members = lock(&self.members);
        let mut delivered = 0;
        for member in members.iter() {
            if !filter(member) {
                continue;
            }
            match member.send_command(command) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    "failed to forward {} to a member of room {}: {}",
                    command.name(),
                    &*lock(&self.room_id),
                    e
                ),
            }
        }

        delivered
    }

    /// Empty the member list, clearing each client's room slot
    ///
    /// Used when a room is forcibly torn down; the member lock is released
    /// before the clients are touched.
    pub fn drain_members(&self) -> Vec<Arc<RoomClient>> {
        let drained: Vec<_> = lock(&self.members).drain(..).collect();
        for client in &drained {
            client.clear_channel();
        }
        drained
    }

    /// Reset pooled state between leases
    pub fn clear(&self) {
        lock(&self.room_id).clear();
        lock(&self.members).clear();
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Reusable for Arc<Channel> {
    fn usage_flag(&self) -> Option<&UsageFlag> {
        Some(&self.usage)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
