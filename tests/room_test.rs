use std::sync::Arc;
use std::time::Duration;

use rusty_rooms::constants::DEFAULT_PACKET_SIZE;
use rusty_rooms::core::buffer::ByteBuffer;
use rusty_rooms::core::channel::{Channel, RoomRemoveReason};
use rusty_rooms::core::client::RoomClient;
use rusty_rooms::core::manager::RoomManager;
use rusty_rooms::core::pool::Pool;
use rusty_rooms::core::protocol::{create_command_pool, Codec};
use rusty_rooms::core::transport::SocketTransport;
use rusty_rooms::error::RustyRoomsError;

fn create_client() -> Arc<RoomClient> {
    let buffers = Arc::new(Pool::new(|| ByteBuffer::new(DEFAULT_PACKET_SIZE)));
    let commands = create_command_pool(0);
    let codec = Arc::new(Codec::new(buffers.clone(), commands.clone()));
    let transport = Arc::new(SocketTransport::new(buffers));
    RoomClient::new(transport, codec, commands)
}

fn create_manager(room_ttl: Duration) -> Arc<RoomManager> {
    let channels_pool = Arc::new(Pool::new(|| Arc::new(Channel::new())));
    Arc::new(RoomManager::new(create_command_pool(0), channels_pool, room_ttl))
}

fn leased_channel(room_id: &str, ttl: Duration) -> Arc<Channel> {
    let channel = Arc::new(Channel::new());
    channel.lease(room_id, ttl);
    channel
}

#[test]
fn test_add_then_remove_restores_membership() {
    let channel = leased_channel("r1", Duration::from_secs(60));
    let client = create_client();

    channel.add(&client).unwrap();
    assert_eq!(channel.member_count(), 1);
    assert!(client.channel().is_some());

    channel.remove(&client).unwrap();
    assert_eq!(channel.member_count(), 0);
    assert!(client.channel().is_none());
}

#[test]
fn test_remove_of_foreign_client_fails() {
    let channel = leased_channel("r1", Duration::from_secs(60));
    let client = create_client();

    let result = channel.remove(&client);
    assert!(matches!(result, Err(RustyRoomsError::WrongRoom)));
}

#[test]
fn test_client_belongs_to_at_most_one_room() {
    let first = leased_channel("r1", Duration::from_secs(60));
    let second = leased_channel("r2", Duration::from_secs(60));
    let client = create_client();

    first.add(&client).unwrap();
    let result = second.add(&client);
    assert!(matches!(result, Err(RustyRoomsError::AlreadyInRoom)));

    // The failed add must not have touched either side
    assert_eq!(second.member_count(), 0);
    assert_eq!(first.member_count(), 1);
}

#[test]
fn test_cross_room_removal_fails() {
    let first = leased_channel("r1", Duration::from_secs(60));
    let second = leased_channel("r2", Duration::from_secs(60));
    let client = create_client();

    first.add(&client).unwrap();
    let result = second.remove(&client);
    assert!(matches!(result, Err(RustyRoomsError::WrongRoom)));
    assert_eq!(first.member_count(), 1);
}

#[test]
fn test_drain_clears_every_member() {
    let channel = leased_channel("r1", Duration::from_secs(60));
    let a = create_client();
    let b = create_client();

    channel.add(&a).unwrap();
    channel.add(&b).unwrap();

    let drained = channel.drain_members();
    assert_eq!(drained.len(), 2);
    assert!(channel.is_empty());
    assert!(a.channel().is_none());
    assert!(b.channel().is_none());
}

#[test]
fn test_find_or_create_room_is_idempotent() {
    let manager = create_manager(Duration::from_secs(60));

    let first = manager.find_or_create_room("lobby").unwrap();
    let second = manager.find_or_create_room("lobby").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(manager.room_count(), 1);
}

#[test]
fn test_free_room_removes_it_from_the_registry() {
    let manager = create_manager(Duration::from_secs(60));

    let channel = manager.find_or_create_room("lobby").unwrap();
    assert_eq!(manager.room_count(), 1);

    manager.free_room(&channel, RoomRemoveReason::Empty);
    assert_eq!(manager.room_count(), 0);
    assert!(manager.get_room("lobby").is_none());
}

#[test]
fn test_empty_free_is_skipped_when_a_client_reentered() {
    let manager = create_manager(Duration::from_secs(60));
    let client = create_client();

    let channel = manager.find_or_create_room("lobby").unwrap();
    channel.add(&client).unwrap();

    manager.free_room(&channel, RoomRemoveReason::Empty);
    assert_eq!(manager.room_count(), 1);
}

#[test]
fn test_sweep_frees_expired_rooms_and_detaches_members() {
    let manager = create_manager(Duration::from_millis(0));
    let client = create_client();

    let channel = manager.find_or_create_room("stale").unwrap();
    channel.add(&client).unwrap();
    assert!(channel.is_expired());

    manager.sweep_expired_rooms();

    assert_eq!(manager.room_count(), 0);
    assert!(channel.is_empty());
    assert!(client.channel().is_none());
}

#[test]
fn test_sweep_keeps_live_rooms() {
    let manager = create_manager(Duration::from_secs(60));
    manager.find_or_create_room("fresh").unwrap();

    manager.sweep_expired_rooms();
    assert_eq!(manager.room_count(), 1);
}
