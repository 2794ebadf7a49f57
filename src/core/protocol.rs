//! Wire protocol: command model and the NUL-delimited text codec
//!
//! A frame on the wire is `COMMAND ('|' KEY '^' VALUE)* '|'? 0x00`, encoded
//! as UTF-8. Fields may not contain `|`, `^` or the NUL byte; there is no
//! escaping. The maximum frame size is the pooled buffer capacity.

use std::fmt;
use std::sync::Arc;

use crate::core::buffer::ByteBuffer;
use crate::core::pool::{Pool, Reusable, UsageFlag};
use crate::error::{Result, RustyRoomsError};

/// Command names understood by the server
pub const SET_CLIENT_ID: &str = "SetClientId";
pub const ENTER_TO_ROOM: &str = "EnterToRoom";
pub const PUSH_MESSAGE: &str = "PushMessage";
/// Reserved by the protocol, currently unused
pub const EXIT: &str = "Exit";

/// Field keys used by the built-in commands
pub const FIELD_CLIENT_ID: &str = "ClientId";
pub const FIELD_ROOM_ID: &str = "RoomId";

const FRAME_DELIMITER: u8 = 0;
const FIELD_SEPARATOR: char = '|';
const KEY_VALUE_SEPARATOR: char = '^';

/// One decoded protocol message: a name plus ordered key/value fields
///
/// Commands are pool-owned. The field storage is cleared, not replaced,
/// when the command returns to its pool, so the backing allocations are
/// reused across messages.
#[derive(Debug, Default)]
pub struct Command {
    name: String,
    fields: Vec<(String, String)>,
    usage: UsageFlag,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name.clear();
        self.name.push_str(name);
    }

    /// Append a field; encoding preserves insertion order
    pub fn push_field(&mut self, key: &str, value: &str) {
        self.fields.push((key.to_string(), value.to_string()));
    }

    /// Look up a field value by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Clear name and fields in place, keeping the backing storage
    pub fn clear(&mut self) {
        self.name.clear();
        self.fields.clear();
    }
}

impl Reusable for Command {
    fn usage_flag(&self) -> Option<&UsageFlag> {
        Some(&self.usage)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (key, value) in &self.fields {
            write!(f, "|{}^{}", key, value)?;
        }
        Ok(())
    }
}

/// Build the command pool with the field-clearing recycler
pub fn create_command_pool(prewarm: usize) -> Arc<Pool<Command>> {
    Arc::new(Pool::with_recycler(Command::new, prewarm, Command::clear))
}

/// Encoder/decoder for the delimited wire format
///
/// Decoded commands come from the command pool and encoded frames land in
/// pooled buffers; the caller owns the release of both.
pub struct Codec {
    buffers: Arc<Pool<ByteBuffer>>,
    commands: Arc<Pool<Command>>,
}

impl Codec {
    pub fn new(buffers: Arc<Pool<ByteBuffer>>, commands: Arc<Pool<Command>>) -> Self {
        Self { buffers, commands }
    }

    /// Decode one frame starting at `start`
    ///
    /// Returns `(None, buf.len())` when no frame delimiter is present: the
    /// caller must keep every byte from `start` and retry once more data
    /// arrives. Returns `(Some(command), consumed)` otherwise, where
    /// `consumed` is the offset one past the delimiter. A field without the
    /// key/value separator fails with `ProtocolViolation`.
    pub fn decode(&self, buf: &[u8], start: usize) -> Result<(Option<Command>, usize)> {
        let length = buf.len();

        for i in start..length {
            if buf[i] != FRAME_DELIMITER {
                continue;
            }

            let text = std::str::from_utf8(&buf[start..i]).map_err(|_| {
                RustyRoomsError::ProtocolViolation("frame is not valid UTF-8".to_string())
            })?;

            let mut parts = text.split(FIELD_SEPARATOR);
            let mut command = self.commands.get()?;
            command.set_name(parts.next().unwrap_or(""));

            for field in parts {
                // Tolerate a trailing separator: skip empty fields
                if field.is_empty() {
                    continue;
                }

                match field.split_once(KEY_VALUE_SEPARATOR) {
                    Some((key, value)) => command.push_field(key, value),
                    None => {
                        // Do not leak the half-built command on malformed input
                        let _ = self.commands.free(command);
                        return Err(RustyRoomsError::ProtocolViolation(format!(
                            "field without '{}' separator: {}",
                            KEY_VALUE_SEPARATOR, field
                        )));
                    }
                }
            }

            return Ok((Some(command), i + 1));
        }

        Ok((None, length))
    }

    /// Encode a command into a pooled buffer, returning the frame length
    pub fn encode(&self, command: &Command) -> Result<(ByteBuffer, usize)> {
        let mut buffer = self.buffers.get()?;
        let mut cursor = 0;

        let mut write = |buffer: &mut ByteBuffer, bytes: &[u8]| -> Result<()> {
            if cursor + bytes.len() > buffer.capacity() {
                return Err(RustyRoomsError::MessageTooLarge(buffer.capacity()));
            }
            buffer[cursor..cursor + bytes.len()].copy_from_slice(bytes);
            cursor += bytes.len();
            Ok(())
        };

        let result = (|| {
            write(&mut buffer, command.name().as_bytes())?;
            write(&mut buffer, b"|")?;
            for (key, value) in command.fields() {
                write(&mut buffer, key.as_bytes())?;
                write(&mut buffer, b"^")?;
                write(&mut buffer, value.as_bytes())?;
                write(&mut buffer, b"|")?;
            }
            write(&mut buffer, &[FRAME_DELIMITER])
        })();

        match result {
            Ok(()) => Ok((buffer, cursor)),
            Err(e) => {
                // The oversized frame never leaves; recycle its buffer
                let _ = self.buffers.free(buffer);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_PACKET_SIZE;

    fn create_codec() -> Codec {
        let buffers = Arc::new(Pool::new(|| ByteBuffer::new(DEFAULT_PACKET_SIZE)));
        let commands = create_command_pool(0);
        Codec::new(buffers, commands)
    }

    #[test]
    fn test_decode_without_delimiter_is_incomplete() {
        let codec = create_codec();
        let input = b"Test";

        let (command, consumed) = codec.decode(input, 0).unwrap();
        assert!(command.is_none());
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_decode_single_command() {
        let codec = create_codec();
        let input = b"Test|XX^00\0";

        let (command, consumed) = codec.decode(input, 0).unwrap();
        let command = command.unwrap();
        assert_eq!(consumed, input.len());
        assert_eq!(command.name(), "Test");
        assert_eq!(command.get("XX"), Some("00"));
    }

    #[test]
    fn test_decode_two_commands_in_sequence() {
        let codec = create_codec();
        let input = b"Test|XX^\0Data|xxx^\0";
        let first_end = input.iter().position(|&b| b == 0).unwrap() + 1;

        let (command, consumed) = codec.decode(input, 0).unwrap();
        let command = command.unwrap();
        assert_eq!(consumed, first_end);
        assert_eq!(command.name(), "Test");
        assert_eq!(command.get("XX"), Some(""));

        let (command, consumed) = codec.decode(input, consumed).unwrap();
        let command = command.unwrap();
        assert_eq!(consumed, input.len());
        assert_eq!(command.name(), "Data");
        assert_eq!(command.get("xxx"), Some(""));

        let (command, consumed) = codec.decode(input, consumed).unwrap();
        assert!(command.is_none());
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_decode_field_without_separator_is_a_violation() {
        let codec = create_codec();
        let input = b"Test|broken\0";

        let result = codec.decode(input, 0);
        assert!(matches!(
            result,
            Err(RustyRoomsError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_malformed_frame_does_not_leak_the_command() {
        let buffers = Arc::new(Pool::new(|| ByteBuffer::new(DEFAULT_PACKET_SIZE)));
        let commands = create_command_pool(0);
        let codec = Codec::new(buffers, commands.clone());

        assert!(codec.decode(b"Test|broken\0", 0).is_err());
        assert_eq!(commands.stats().in_use, 0);
    }

    #[test]
    fn test_encode_roundtrip() {
        let codec = create_codec();

        let mut command = Command::new();
        command.set_name("PushMessage");
        command.push_field("Body", "hello");
        command.push_field("Mood", "fine");

        let (buffer, length) = codec.encode(&command).unwrap();
        assert_eq!(buffer[length - 1], 0);

        let (decoded, consumed) = codec.decode(&buffer[..length], 0).unwrap();
        let decoded = decoded.unwrap();
        assert_eq!(consumed, length);
        assert_eq!(decoded.name(), "PushMessage");
        assert_eq!(decoded.get("Body"), Some("hello"));
        assert_eq!(decoded.get("Mood"), Some("fine"));
        assert_eq!(decoded.field_count(), 2);
    }

    #[test]
    fn test_encode_rejects_oversized_command() {
        let buffers = Arc::new(Pool::new(|| ByteBuffer::new(32)));
        let commands = create_command_pool(0);
        let codec = Codec::new(buffers.clone(), commands);

        let mut command = Command::new();
        command.set_name("PushMessage");
        command.push_field("Body", &"x".repeat(64));

        let result = codec.encode(&command);
        assert!(matches!(result, Err(RustyRoomsError::MessageTooLarge(32))));
        // The buffer went back to the pool
        assert_eq!(buffers.len(), 1);
    }

    #[test]
    fn test_command_recycler_clears_fields() {
        let commands = create_command_pool(0);
        let mut command = commands.get().unwrap();
        command.set_name("Test");
        command.push_field("XX", "00");
        commands.free(command).unwrap();

        let command = commands.get().unwrap();
        assert_eq!(command.name(), "");
        assert_eq!(command.field_count(), 0);
    }
}
