//! Message-level client on top of the socket transport
//!
//! Converts raw receive notifications into decoded commands and outgoing
//! commands into framed sends. Clients are leased from a pool, one per
//! accepted connection.

use std::sync::{Arc, Mutex, Weak};

use log::{debug, error};
use tokio::net::TcpStream;

use crate::core::channel::Channel;
use crate::core::pool::{Pool, Reusable, UsageFlag};
use crate::core::protocol::{Codec, Command};
use crate::core::transport::{SocketTransport, TransportListener};
use crate::error::{Result, RustyRoomsError};

/// Consumer of decoded commands and disconnect notifications
///
/// Subscribed once per connection; the subscription is taken, not merely
/// read, when the client disconnects, so a command racing the disconnect
/// cannot be handled twice.
pub trait ClientEvents: Send + Sync {
    fn on_command(&self, client: &Arc<RoomClient>, command: &Command);

    fn on_disconnect(&self, client: &Arc<RoomClient>, error: Option<RustyRoomsError>);
}

/// One connected (or poolable) room participant
pub struct RoomClient {
    transport: Arc<SocketTransport>,
    codec: Arc<Codec>,
    commands: Arc<Pool<Command>>,
    client_id: Mutex<Option<String>>,
    channel: Mutex<Option<Arc<Channel>>>,
    events: Mutex<Option<Arc<dyn ClientEvents>>>,
    self_ref: Weak<RoomClient>,
    usage: UsageFlag,
}

impl RoomClient {
    pub fn new(
        transport: Arc<SocketTransport>,
        codec: Arc<Codec>,
        commands: Arc<Pool<Command>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            transport,
            codec,
            commands,
            client_id: Mutex::new(None),
            channel: Mutex::new(None),
            events: Mutex::new(None),
            self_ref: self_ref.clone(),
            usage: UsageFlag::new(),
        })
    }

    /// Bind this client to a freshly accepted stream
    pub fn attach(self: &Arc<Self>, stream: TcpStream) -> Result<()> {
        let listener: Arc<dyn TransportListener> = self.clone();
        self.transport.attach(stream, listener)
    }

    /// Close the connection; idempotent
    pub fn detach(&self) {
        self.transport.detach(None);
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_attached()
    }

    /// Register the command/disconnect consumer for this connection
    pub fn subscribe(&self, events: Arc<dyn ClientEvents>) {
        *lock(&self.events) = Some(events);
    }

    pub fn client_id(&self) -> Option<String> {
        lock(&self.client_id).clone()
    }

    pub fn set_client_id(&self, id: &str) {
        *lock(&self.client_id) = Some(id.to_string());
    }

    /// The room this client currently belongs to, if any
    pub fn channel(&self) -> Option<Arc<Channel>> {
        lock(&self.channel).clone()
    }

    /// Record membership in `channel`; a client is in at most one room
    pub(crate) fn join_channel(&self, channel: &Arc<Channel>) -> Result<()> {
        let mut slot = lock(&self.channel);
        if slot.is_some() {
            return Err(RustyRoomsError::AlreadyInRoom);
        }
        *slot = Some(channel.clone());
        Ok(())
    }

    /// Clear membership, verifying it points at `channel`
    pub(crate) fn leave_channel(&self, channel: &Arc<Channel>) -> Result<()> {
        let mut slot = lock(&self.channel);
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, channel) => {
                *slot = None;
                Ok(())
            }
            _ => Err(RustyRoomsError::WrongRoom),
        }
    }

    /// Clear membership unconditionally (forced room teardown)
    pub(crate) fn clear_channel(&self) {
        *lock(&self.channel) = None;
    }

    /// Reset pooled state between connections
    pub fn reset(&self) {
        *lock(&self.client_id) = None;
        *lock(&self.channel) = None;
        *lock(&self.events) = None;
    }

    /// Encode a command and queue it on this client's connection
    pub fn send_command(&self, command: &Command) -> Result<()> {
        let (buffer, length) = self.codec.encode(command)?;
        self.transport.send_bytes(buffer, length)
    }

    fn dispatch(&self, command: &Command) {
        let events = lock(&self.events).clone();
        match (events, self.self_ref.upgrade()) {
            (Some(events), Some(client)) => events.on_command(&client, command),
            _ => debug!("command {} dropped, no subscriber", command.name()),
        }
    }
}

impl TransportListener for RoomClient {
    /// Drain every complete frame from the buffer, dispatching each
    /// decoded command and returning it to the pool immediately after.
    fn on_received(&self, buf: &[u8]) -> Result<usize> {
        let mut offset = 0;

        loop {
            let (command, next) = self.codec.decode(buf, offset)?;
            let Some(command) = command else {
                return Ok(offset);
            };

            offset = next;
            self.dispatch(&command);
            // The command must not leak, whatever the handler did
            if let Err(e) = self.commands.free(command) {
                error!("failed to recycle command: {}", e);
            }
        }
    }

    fn on_disconnected(&self, error: Option<RustyRoomsError>) {
        // One-shot: take the subscription so a racing command is dropped
        let events = lock(&self.events).take();
        if let (Some(events), Some(client)) = (events, self.self_ref.upgrade()) {
            events.on_disconnect(&client, error);
        }
    }
}

impl Reusable for Arc<RoomClient> {
    fn usage_flag(&self) -> Option<&UsageFlag> {
        Some(&self.usage)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
