//! Room manager: client identities, command dispatch and room lifecycle

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::time::interval;
use uuid::Uuid;

use crate::constants::ROOM_SWEEP_INTERVAL_SECS;
use crate::core::channel::{Channel, RoomRemoveReason};
use crate::core::client::{ClientEvents, RoomClient};
use crate::core::pool::Pool;
use crate::core::protocol::{
    Command, ENTER_TO_ROOM, FIELD_CLIENT_ID, FIELD_ROOM_ID, PUSH_MESSAGE, SET_CLIENT_ID,
};
use crate::error::{Result, RustyRoomsError};

type CommandHandler = fn(&RoomManager, &Arc<RoomClient>, &Command) -> Result<()>;

/// Monotonic manager counters
#[derive(Debug, Default)]
struct ManagerCounters {
    clients_connected: AtomicU64,
    clients_disconnected: AtomicU64,
    commands_received: AtomicU64,
    commands_sent: AtomicU64,
}

/// Snapshot of the manager's statistics at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerStats {
    pub clients_connected: u64,
    pub clients_disconnected: u64,
    pub commands_received: u64,
    pub commands_sent: u64,
    pub online_clients: u64,
    pub active_rooms: u64,
}

/// Owns the client and room registries and drives command dispatch
///
/// Shared across every connection task and the sweep task; all mutation
/// goes through the internal locks, never through caller-side locking.
pub struct RoomManager {
    commands: Arc<Pool<Command>>,
    channels_pool: Arc<Pool<Arc<Channel>>>,
    clients: RwLock<HashMap<String, Arc<RoomClient>>>,
    channels: Mutex<HashMap<String, Arc<Channel>>>,
    handlers: HashMap<&'static str, CommandHandler>,
    room_ttl: Duration,
    counters: ManagerCounters,
}

impl RoomManager {
    pub fn new(
        commands: Arc<Pool<Command>>,
        channels_pool: Arc<Pool<Arc<Channel>>>,
        room_ttl: Duration,
    ) -> Self {
        let mut handlers: HashMap<&'static str, CommandHandler> = HashMap::new();
        handlers.insert(ENTER_TO_ROOM, Self::handle_enter_to_room);
        handlers.insert(PUSH_MESSAGE, Self::handle_push_message);

        Self {
            commands,
            channels_pool,
            clients: RwLock::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            handlers,
            room_ttl,
            counters: ManagerCounters::default(),
        }
    }

    /// Take ownership of a freshly attached connection
    ///
    /// Assigns an opaque client id, subscribes to the client's events,
    /// registers it, and greets it with `SetClientId` — the only
    /// server-initiated message in the protocol.
    pub fn attach_client(self: &Arc<Self>, client: Arc<RoomClient>) {
        let client_id = Uuid::new_v4().to_string();
        client.set_client_id(&client_id);
        client.subscribe(self.clone());

        let online = {
            let mut clients = write_lock(&self.clients);
            clients.insert(client_id.clone(), client.clone());
            clients.len()
        };
        self.counters
            .clients_connected
            .fetch_add(1, Ordering::Relaxed);

        info!("client {} connected ({} online)", client_id, online);

        self.send_client_command(&client, |command| {
            command.set_name(SET_CLIENT_ID);
            command.push_field(FIELD_CLIENT_ID, &client_id);
        });

        // The transport may have died before the subscription landed, in
        // which case its disconnect notification fired into nothing
        if !client.is_connected() {
            self.on_disconnect(&client, None);
        }
    }

    /// Lease a command, fill it, send it, and return it to the pool
    fn send_client_command<F>(&self, client: &Arc<RoomClient>, build: F)
    where
        F: FnOnce(&mut Command),
    {
        let mut command = match self.commands.get() {
            Ok(command) => command,
            Err(e) => {
                error!("failed to lease command: {}", e);
                return;
            }
        };

        build(&mut command);
        debug!("send {}", command);

        match client.send_command(&command) {
            Ok(()) => {
                self.counters.commands_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => error!("failed to send {}: {}", command.name(), e),
        }

        if let Err(e) = self.commands.free(command) {
            error!("failed to recycle command: {}", e);
        }
    }

    /// Look a room up, creating it under the registry lock when unseen
    pub fn find_or_create_room(&self, room_id: &str) -> Result<Arc<Channel>> {
        let mut channels = self.channels.lock()?;
        if let Some(channel) = channels.get(room_id) {
            return Ok(channel.clone());
        }

        let channel = self.channels_pool.get()?;
        channel.lease(room_id, self.room_ttl);
        channels.insert(room_id.to_string(), channel.clone());

        info!("room {} created", room_id);
        Ok(channel)
    }

    pub fn get_room(&self, room_id: &str) -> Option<Arc<Channel>> {
        lock(&self.channels).get(room_id).cloned()
    }

    pub fn room_count(&self) -> usize {
        lock(&self.channels).len()
    }

    pub fn client_count(&self) -> usize {
        read_lock(&self.clients).len()
    }

    /// Remove a room from the registry and reclaim it
    ///
    /// Any member still inside is forcibly detached; under normal flow the
    /// room is already empty when this runs.
    pub fn free_room(&self, channel: &Arc<Channel>, reason: RoomRemoveReason) {
        let room_id = channel.room_id();
        let removed = {
            let mut channels = lock(&self.channels);
            // A client may have re-entered between the empty check and now
            if reason == RoomRemoveReason::Empty && !channel.is_empty() {
                return;
            }
            channels.remove(&room_id)
        };

        if removed.is_none() {
            return;
        }

        let lived = chrono::Utc::now() - channel.created_at();
        info!(
            "room {} freed ({:?}), lived {}s",
            room_id,
            reason,
            lived.num_seconds()
        );

        for member in channel.drain_members() {
            member.detach();
        }

        if let Err(e) = self.channels_pool.free(channel.clone()) {
            error!("failed to recycle room {}: {}", room_id, e);
        }
    }

    /// Run the expired-room sweep every second for the process lifetime
    pub fn start_sweep_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(ROOM_SWEEP_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                self.sweep_expired_rooms();
            }
        });
    }

    /// One sweep pass: snapshot expired rooms, then free them
    pub fn sweep_expired_rooms(&self) {
        let expired: Vec<Arc<Channel>> = {
            let channels = lock(&self.channels);
            channels
                .values()
                .filter(|channel| channel.is_expired())
                .cloned()
                .collect()
        };

        for channel in expired {
            self.free_room(&channel, RoomRemoveReason::Expired);
        }
    }

    /// Snapshot the manager counters and gauges
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            clients_connected: self.counters.clients_connected.load(Ordering::Relaxed),
            clients_disconnected: self.counters.clients_disconnected.load(Ordering::Relaxed),
            commands_received: self.counters.commands_received.load(Ordering::Relaxed),
            commands_sent: self.counters.commands_sent.load(Ordering::Relaxed),
            online_clients: self.client_count() as u64,
            active_rooms: self.room_count() as u64,
        }
    }

    /// `EnterToRoom`: join (or create) the requested room
    fn handle_enter_to_room(&self, client: &Arc<RoomClient>, command: &Command) -> Result<()> {
        let Some(room_id) = command.get(FIELD_ROOM_ID) else {
            // A well-behaved client always names a room; this one is broken
            warn!(
                "client {:?} sent EnterToRoom without a room id",
                client.client_id()
            );
            client.detach();
            return Ok(());
        };

        let channel = self.find_or_create_room(room_id)?;
        channel.add(client)?;

        info!(
            "client {:?} entered room {} ({} members)",
            client.client_id(),
            room_id,
            channel.member_count()
        );
        Ok(())
    }

    /// `PushMessage`: relay to every other member of the sender's room
    fn handle_push_message(&self, client: &Arc<RoomClient>, command: &Command) -> Result<()> {
        let Some(channel) = client.channel() else {
            // Pushing without having joined is a protocol violation
            warn!(
                "client {:?} pushed a message without a room",
                client.client_id()
            );
            client.detach();
            return Ok(());
        };

        if channel.is_expired() {
            // The room is mid-teardown; drop silently
            debug!("dropping message for expired room {}", channel.room_id());
            return Ok(());
        }

        let delivered = channel.send_all(command, |member| !Arc::ptr_eq(member, client));
        self.counters
            .commands_sent
            .fetch_add(delivered as u64, Ordering::Relaxed);
        Ok(())
    }
}

impl ClientEvents for RoomManager {
    fn on_command(&self, client: &Arc<RoomClient>, command: &Command) {
        self.counters
            .commands_received
            .fetch_add(1, Ordering::Relaxed);

        match self.handlers.get(command.name()) {
            Some(handler) => {
                if let Err(e) = handler(self, client, command) {
                    // A failed handler is logged; the connection survives
                    error!("handler for {} failed: {}", command.name(), e);
                }
            }
            None => {
                // Closed two-party protocol: unknown commands mean a broken
                // or hostile peer
                warn!(
                    "client {:?} sent unknown command {}, disconnecting",
                    client.client_id(),
                    command.name()
                );
                client.detach();
            }
        }
    }

    fn on_disconnect(&self, client: &Arc<RoomClient>, error: Option<RustyRoomsError>) {
        let client_id = client.client_id();

        // Registry removal doubles as the one-shot guard for cleanup: a
        // second notification for the same connection finds nothing to do
        let registered = match &client_id {
            Some(id) => write_lock(&self.clients).remove(id).is_some(),
            None => false,
        };
        if !registered {
            return;
        }

        if let Some(channel) = client.channel() {
            if let Err(e) = channel.remove(client) {
                warn!("failed to remove client {:?} from its room: {}", client_id, e);
            }
            if channel.is_empty() {
                self.free_room(&channel, RoomRemoveReason::Empty);
            }
        }

        match error {
            Some(e) => info!("client {:?} disconnected: {}", client_id, e),
            None => info!("client {:?} disconnected", client_id),
        }
        self.counters
            .clients_disconnected
            .fetch_add(1, Ordering::Relaxed);

        // Belt and braces; detach is idempotent
        client.detach();

        // The client object itself is retired, not re-pooled: its receive
        // task may still be draining a final batch of decoded commands
        client.reset();
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read_lock<'a, T>(rwlock: &'a RwLock<T>) -> std::sync::RwLockReadGuard<'a, T> {
    match rwlock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<'a, T>(rwlock: &'a RwLock<T>) -> std::sync::RwLockWriteGuard<'a, T> {
    match rwlock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
