//! # Device Frame Demultiplexing
//!
//! Every binary WebSocket message from a device carries its 6-byte MAC
//! address followed by raw PCM audio. This module classifies one inbound
//! message and renders the address as the session's device tag.
//!
//! ## Frame layout:
//! - bytes 0..6: device MAC address (arbitrary binary)
//! - bytes 6.. : mono 16-bit 16 kHz PCM samples
//!
//! Messages of 6 bytes or fewer have no payload to forward and are dropped
//! by the connection handler; they are never connection-fatal.

/// Number of leading bytes that identify the sending device.
pub const DEVICE_ADDR_LEN: usize = 6;

/// Sentinel tag for a session whose device has not yet sent a frame.
pub const UNKNOWN_DEVICE: &str = "UNKNOWN_DEVICE";

/// One classified inbound binary message.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A well-formed frame: device tag plus raw audio payload.
    Audio { device_tag: String, payload: Vec<u8> },

    /// Too short to carry both an address and audio; dropped.
    Undersized { len: usize },
}

/// Classify one inbound binary message.
///
/// A message is well-formed only when it is strictly longer than the
/// address prefix; a 6-byte message is an address with nothing to say and
/// is treated the same as a truncated one.
pub fn classify(data: &[u8]) -> Frame {
    if data.len() <= DEVICE_ADDR_LEN {
        return Frame::Undersized { len: data.len() };
    }

    Frame::Audio {
        device_tag: format_device_tag(&data[..DEVICE_ADDR_LEN]),
        payload: data[DEVICE_ADDR_LEN..].to_vec(),
    }
}

/// Render address bytes as a colon-separated uppercase hex string,
/// e.g. `AA:BB:CC:DD:EE:FF`.
///
/// The rendering is pure: the same bytes always produce the same tag, so
/// tags are stable session keys for archival and delivery.
pub fn format_device_tag(addr: &[u8]) -> String {
    addr.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_address_only_messages_are_undersized() {
        assert_eq!(classify(&[]), Frame::Undersized { len: 0 });
        assert_eq!(
            classify(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
            Frame::Undersized { len: 6 }
        );
    }

    #[test]
    fn seven_byte_message_carries_one_payload_byte() {
        let frame = classify(&[1, 2, 3, 4, 5, 6, 7]);
        match frame {
            Frame::Audio { payload, .. } => assert_eq!(payload, vec![7]),
            other => panic!("expected audio frame, got {:?}", other),
        }
    }

    #[test]
    fn address_and_payload_split_at_six_bytes() {
        let mut data = vec![0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];
        data.extend_from_slice(&[10, 20, 30, 40]);

        match classify(&data) {
            Frame::Audio { device_tag, payload } => {
                assert_eq!(device_tag, "AA:BB:CC:DD:EE:FF");
                assert_eq!(payload.len(), 4);
                assert_eq!(payload, vec![10, 20, 30, 40]);
            }
            other => panic!("expected audio frame, got {:?}", other),
        }
    }

    #[test]
    fn tag_rendering_is_stable_and_uppercase() {
        let addr = [0x0f, 0x00, 0x1a, 0x2b, 0x3c, 0x4d];
        let first = format_device_tag(&addr);
        let second = format_device_tag(&addr);

        assert_eq!(first, "0F:00:1A:2B:3C:4D");
        assert_eq!(first, second);
    }
}
