use std::sync::Arc;

use rusty_rooms::core::channel::Channel;
use rusty_rooms::core::pool::{Pool, Reusable, UsageFlag};
use rusty_rooms::core::protocol::create_command_pool;
use rusty_rooms::error::RustyRoomsError;

struct Probe {
    usage: UsageFlag,
}

impl Probe {
    fn new() -> Self {
        Self {
            usage: UsageFlag::new(),
        }
    }
}

impl Reusable for Probe {
    fn usage_flag(&self) -> Option<&UsageFlag> {
        Some(&self.usage)
    }
}

#[test]
fn test_statistics_after_constructions_only() {
    let pool = Pool::new(Probe::new);

    let mut leased = Vec::new();
    for _ in 0..4 {
        leased.push(pool.get().unwrap());
    }

    let stats = pool.stats();
    assert_eq!(stats.created, 4);
    assert_eq!(stats.in_use, 4);
    assert_eq!(stats.pooled, 0);
    assert_eq!(stats.get_calls, 4);
}

#[test]
fn test_statistics_after_get_free_on_prewarmed_pool() {
    let pool = Pool::with_prewarm(Probe::new, 5);

    assert_eq!(pool.len(), 5);
    let stats = pool.stats();
    assert_eq!(stats.created, 5);
    assert_eq!(stats.pooled, 5);
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.get_calls, 0);

    let probe = pool.get().unwrap();
    let stats = pool.stats();
    assert_eq!(stats.created, 5);
    assert_eq!(stats.pooled, 4);
    assert_eq!(stats.in_use, 1);
    assert_eq!(stats.get_calls, 1);

    pool.free(probe).unwrap();
    let stats = pool.stats();
    assert_eq!(stats.created, 5);
    assert_eq!(stats.pooled, 5);
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.free_calls, 1);
}

#[test]
fn test_marking_a_used_object_used_again_fails() {
    let probe = Probe::new();
    probe.usage.set_used().unwrap();

    let result = probe.usage.set_used();
    assert!(matches!(result, Err(RustyRoomsError::PoolState(_))));
}

#[test]
fn test_double_free_is_detected() {
    let pool: Pool<Arc<Channel>> = Pool::new(|| Arc::new(Channel::new()));

    let channel = pool.get().unwrap();
    pool.free(channel.clone()).unwrap();

    let result = pool.free(channel);
    assert!(matches!(result, Err(RustyRoomsError::PoolState(_))));
}

#[test]
fn test_command_pool_clears_fields_on_free() {
    let commands = create_command_pool(2);

    let mut command = commands.get().unwrap();
    command.set_name("PushMessage");
    command.push_field("Body", "stale");
    commands.free(command).unwrap();

    // Drain the pool to make sure we see the recycled instance eventually
    let mut drained = Vec::new();
    for _ in 0..3 {
        let command = commands.get().unwrap();
        assert_eq!(command.name(), "");
        assert_eq!(command.field_count(), 0);
        drained.push(command);
    }
}

#[test]
fn test_concurrent_get_and_free() {
    let pool = Arc::new(Pool::with_prewarm(Probe::new, 8));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..500 {
                let probe = pool.get().unwrap();
                pool.free(probe).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.get_calls, 8 * 500);
    assert_eq!(stats.free_calls, 8 * 500);
    assert_eq!(stats.created, stats.pooled);
}
