//! Per-connection socket transport
//!
//! Wraps one accepted TCP stream. Owns the pooled receive buffer and the
//! queued send pipeline, frames the byte stream for its listener, and
//! guarantees that detach tears everything down exactly once no matter
//! which path (read error, write error, external caller) triggers it.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Notify;

use crate::core::buffer::ByteBuffer;
use crate::core::pool::Pool;
use crate::error::{Result, RustyRoomsError};

/// Consumer of transport events
///
/// One listener is registered per attach. `on_received` sees the valid
/// prefix of the receive buffer and reports how many bytes it fully
/// consumed; the unconsumed tail is retained for the next read. An error
/// from `on_received` tears the connection down.
pub trait TransportListener: Send + Sync {
    fn on_received(&self, buf: &[u8]) -> Result<usize>;

    /// A queued frame finished its write (successfully or not)
    fn on_sent(&self, _length: usize) {}

    fn on_disconnected(&self, error: Option<RustyRoomsError>);
}

struct TransportState {
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    listener: Arc<dyn TransportListener>,
    send_queue: VecDeque<(ByteBuffer, usize)>,
    send_in_flight: bool,
    peer: SocketAddr,
    /// Attach generation this state belongs to
    epoch: u64,
    /// Wakes this generation's receive task on teardown; owned per
    /// generation so a stale permit cannot leak into the next attachment
    shutdown: Arc<Notify>,
}

/// Asynchronous transport for one connection
///
/// Lifecycle: detached -> attached -> detached; a detached transport can be
/// attached again with a fresh stream. Exactly one receive and at most one
/// send are outstanding at any time.
pub struct SocketTransport {
    buffers: Arc<Pool<ByteBuffer>>,
    state: Mutex<Option<TransportState>>,
    attached: AtomicBool,
    // Counts attaches; lets a task from a previous connection recognize
    // that its teardown request is stale after the transport was reused
    epoch: AtomicU64,
}

impl SocketTransport {
    pub fn new(buffers: Arc<Pool<ByteBuffer>>) -> Self {
        Self {
            buffers,
            state: Mutex::new(None),
            attached: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.lock_state().as_ref().map(|state| state.peer)
    }

    // Poisoning cannot leave the state half-mutated; recover the guard
    fn lock_state(&self) -> MutexGuard<'_, Option<TransportState>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Bind this transport to a connected stream and start receiving
    pub fn attach(
        self: &Arc<Self>,
        stream: TcpStream,
        listener: Arc<dyn TransportListener>,
    ) -> Result<()> {
        let peer = stream
            .peer_addr()
            .map_err(|_| RustyRoomsError::SocketNotConnected)?;

        // Small frames must not sit in Nagle's buffer
        stream
            .set_nodelay(true)
            .map_err(|e| RustyRoomsError::ConnectionError(e.to_string()))?;

        let (read_half, write_half) = stream.into_split();

        // Flag and state flip together under the state lock so a stale
        // teardown can never interleave with a fresh attachment
        let (receive_buffer, epoch, shutdown) = {
            let mut guard = self.lock_state();
            if self.attached.swap(true, Ordering::SeqCst) {
                return Err(RustyRoomsError::AlreadyAttached);
            }

            let receive_buffer = match self.buffers.get() {
                Ok(buffer) => buffer,
                Err(e) => {
                    self.attached.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            };

            let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            let shutdown = Arc::new(Notify::new());
            *guard = Some(TransportState {
                writer: Arc::new(tokio::sync::Mutex::new(write_half)),
                listener: listener.clone(),
                send_queue: VecDeque::new(),
                send_in_flight: false,
                peer,
                epoch,
                shutdown: shutdown.clone(),
            });
            (receive_buffer, epoch, shutdown)
        };

        let transport = Arc::clone(self);
        tokio::spawn(async move {
            transport
                .receive_loop(read_half, receive_buffer, listener, epoch, shutdown)
                .await;
        });

        debug!("transport attached to {}", peer);
        Ok(())
    }

    /// Single-outstanding-receive loop; owns the read half and the buffer
    async fn receive_loop(
        self: Arc<Self>,
        mut read_half: OwnedReadHalf,
        mut buffer: ByteBuffer,
        listener: Arc<dyn TransportListener>,
        epoch: u64,
        shutdown: Arc<Notify>,
    ) {
        let mut offset = 0;

        let error = loop {
            tokio::select! {
                _ = shutdown.notified() => break None,
                read = read_half.read(&mut buffer[offset..]) => match read {
                    // Peer closed the stream
                    Ok(0) => break None,
                    Ok(n) => {
                        let length = offset + n;
                        let consumed = match listener.on_received(&buffer[..length]) {
                            Ok(consumed) => consumed.min(length),
                            Err(e) => break Some(e),
                        };

                        offset = length - consumed;
                        if consumed > 0 && offset > 0 {
                            compact(&mut buffer, consumed, offset);
                        }

                        // A full buffer with nothing consumed can never
                        // complete: the frame exceeds the packet size
                        if offset == buffer.capacity() {
                            break Some(RustyRoomsError::MessageTooLarge(buffer.capacity()));
                        }
                    }
                    Err(e) => break Some(RustyRoomsError::ConnectionError(e.to_string())),
                },
            }
        };

        if let Err(e) = self.buffers.free(buffer) {
            error!("failed to recycle receive buffer: {}", e);
        }
        self.detach_generation(epoch, error);
    }

    /// Queue bytes for transmission in submission order
    ///
    /// Takes ownership of the pooled buffer; it is returned to the pool
    /// once the write finishes, whether or not it succeeded.
    pub fn send_bytes(self: &Arc<Self>, buffer: ByteBuffer, length: usize) -> Result<()> {
        if !self.is_attached() {
            let _ = self.buffers.free(buffer);
            return Err(RustyRoomsError::TransportDetached);
        }

        let (writer, listener, epoch) = {
            let mut guard = self.lock_state();
            let state = match guard.as_mut() {
                Some(state) => state,
                None => {
                    drop(guard);
                    let _ = self.buffers.free(buffer);
                    return Err(RustyRoomsError::TransportDetached);
                }
            };

            if state.send_in_flight {
                state.send_queue.push_back((buffer, length));
                return Ok(());
            }

            state.send_in_flight = true;
            (state.writer.clone(), state.listener.clone(), state.epoch)
        };

        let transport = Arc::clone(self);
        tokio::spawn(async move {
            transport
                .send_loop(writer, listener, buffer, length, epoch)
                .await;
        });
        Ok(())
    }

    /// Drain the send queue one buffer at a time
    async fn send_loop(
        self: Arc<Self>,
        writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
        listener: Arc<dyn TransportListener>,
        mut buffer: ByteBuffer,
        mut length: usize,
        epoch: u64,
    ) {
        loop {
            let result = {
                let mut writer = writer.lock().await;
                writer.write_all(&buffer[..length]).await
            };

            // The buffer is recycled no matter how the write went
            if let Err(e) = self.buffers.free(buffer) {
                error!("failed to recycle send buffer: {}", e);
            }
            listener.on_sent(length);

            if let Err(e) = result {
                self.detach_generation(
                    epoch,
                    Some(RustyRoomsError::ConnectionError(e.to_string())),
                );
                return;
            }

            let mut guard = self.lock_state();
            match guard.as_mut() {
                // Detached while writing; queued buffers were drained there
                None => return,
                Some(state) if state.epoch != epoch => return,
                Some(state) => match state.send_queue.pop_front() {
                    Some((next_buffer, next_length)) => {
                        buffer = next_buffer;
                        length = next_length;
                    }
                    None => {
                        state.send_in_flight = false;
                        return;
                    }
                },
            }
        }
    }

    /// Tear the connection down; safe to call from any path, any number
    /// of times, concurrently. The actual teardown runs exactly once.
    pub fn detach(&self, error: Option<RustyRoomsError>) {
        self.detach_generation(self.epoch.load(Ordering::SeqCst), error);
    }

    /// Teardown scoped to one attach generation
    ///
    /// A receive or send task that outlived its connection must not be able
    /// to tear down a later attachment of this (pooled, reused) transport.
    fn detach_generation(&self, epoch: u64, error: Option<RustyRoomsError>) {
        if !self.attached.load(Ordering::SeqCst) {
            return;
        }

        let state = {
            let mut guard = self.lock_state();
            match guard.as_ref() {
                Some(state) if state.epoch == epoch => {}
                _ => return,
            }
            if !self.attached.swap(false, Ordering::SeqCst) {
                return;
            }
            guard.take()
        };
        let Some(mut state) = state else {
            warn!("transport marked attached without state");
            return;
        };

        for (buffer, _) in state.send_queue.drain(..) {
            if let Err(e) = self.buffers.free(buffer) {
                error!("failed to recycle queued send buffer: {}", e);
            }
        }

        // Dropping the writer half sends FIN; the reader wakes via the
        // stored permit and returns the receive buffer itself
        drop(state.writer);
        state.shutdown.notify_one();

        debug!("transport detached from {}", state.peer);
        state.listener.on_disconnected(error);
    }
}

/// Shift the unconsumed tail of a receive buffer to the front
///
/// `consumed` bytes at the head were fully processed; `remaining` bytes
/// after them belong to a frame still in flight and must survive for the
/// next read.
fn compact(buf: &mut [u8], consumed: usize, remaining: usize) {
    for i in 0..remaining {
        buf[i] = buf[i + consumed];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_shifts_tail_to_front() {
        let mut buf = [0u8, 1, 2, 3, 4, 5, 6, 7];
        compact(&mut buf, 5, 3);
        assert_eq!(&buf[..3], &[5, 6, 7]);
    }

    #[test]
    fn test_compact_with_nothing_remaining() {
        let mut buf = [9u8, 8, 7];
        compact(&mut buf, 3, 0);
        assert_eq!(buf, [9, 8, 7]);
    }

    #[test]
    fn test_compact_overlapping_regions() {
        let mut buf = [1u8, 2, 3, 4, 5];
        compact(&mut buf, 1, 4);
        assert_eq!(&buf[..4], &[2, 3, 4, 5]);
    }

    #[test]
    fn test_send_on_detached_transport_fails() {
        let buffers = Arc::new(Pool::new(|| ByteBuffer::new(64)));
        let transport = Arc::new(SocketTransport::new(buffers.clone()));

        let buffer = buffers.get().unwrap();
        let result = transport.send_bytes(buffer, 4);
        assert!(matches!(result, Err(RustyRoomsError::TransportDetached)));
        // The rejected buffer went straight back to the pool
        assert_eq!(buffers.stats().in_use, 0);
    }

    #[test]
    fn test_detach_before_attach_is_a_no_op() {
        let buffers = Arc::new(Pool::new(|| ByteBuffer::new(64)));
        let transport = SocketTransport::new(buffers);
        transport.detach(None);
        assert!(!transport.is_attached());
    }
}
