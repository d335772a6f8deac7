//! MIDI message decoding
//!
//! Turns the raw bytes of one backend read into a typed Control Change event.
//! Every other message type is recognised and skipped: decoding succeeds but
//! produces nothing.

use std::fmt;
use thiserror::Error;

/// Upper nibble of a Control Change status byte (`1011`)
pub const CONTROL_CHANGE: u8 = 0b1011;

/// Highest 7-bit data value
pub const DATA_MAX: u8 = 127;

/// Decoder failure. The message is dropped and nothing is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("short MIDI message: {len} byte(s), need at least 2")]
    ShortMessage { len: usize },
}

/// Message family derived from the upper nibble of the status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    NoteOff,
    NoteOn,
    PolyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
    System,
    /// Upper bit clear: a data byte where a status byte was expected
    Data,
}

impl MessageKind {
    /// Classify a status byte
    pub fn from_status(status: u8) -> Self {
        match status >> 4 {
            0x8 => MessageKind::NoteOff,
            0x9 => MessageKind::NoteOn,
            0xA => MessageKind::PolyPressure,
            CONTROL_CHANGE => MessageKind::ControlChange,
            0xC => MessageKind::ProgramChange,
            0xD => MessageKind::ChannelPressure,
            0xE => MessageKind::PitchBend,
            0xF => MessageKind::System,
            _ => MessageKind::Data,
        }
    }
}

/// A decoded Control Change, before it is attributed to a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlChange {
    /// Channel (0-15)
    pub channel: u8,
    /// Controller number (0-127)
    pub controller: u8,
    /// Controller value (0-127)
    pub value: u8,
}

impl ControlChange {
    /// Build a Control Change, clamping every field into its MIDI range
    pub fn new(channel: u8, controller: u8, value: u8) -> Self {
        Self {
            channel: channel & 0x0F,
            controller: controller.min(DATA_MAX),
            value: value.min(DATA_MAX),
        }
    }

    /// Wire bytes for this message
    pub fn to_bytes(&self) -> [u8; 3] {
        [
            (CONTROL_CHANGE << 4) | (self.channel & 0x0F),
            self.controller,
            self.value,
        ]
    }
}

impl fmt::Display for ControlChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CC ch:{} cc:{} v:{}",
            self.channel + 1,
            self.controller,
            self.value
        )
    }
}

/// Decode one raw message.
///
/// Returns `Ok(Some(_))` for a complete Control Change, `Ok(None)` for any
/// other (or truncated Control Change) message, and `Err(ShortMessage)` for
/// fewer than two bytes.
pub fn decode(data: &[u8]) -> Result<Option<ControlChange>, DecodeError> {
    if data.len() < 2 {
        return Err(DecodeError::ShortMessage { len: data.len() });
    }

    let status = data[0];
    let channel = status & 0x0F;

    match MessageKind::from_status(status) {
        MessageKind::ControlChange if data.len() >= 3 => {
            Ok(Some(ControlChange::new(channel, data[1], data[2])))
        }
        _ => Ok(None),
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_control_change() {
        let data = vec![0xB2, 7, 100]; // CC ch 3, volume, value 100
        let cc = decode(&data).unwrap().unwrap();

        assert_eq!(
            cc,
            ControlChange {
                channel: 2,
                controller: 7,
                value: 100,
            }
        );
    }

    #[test]
    fn test_short_message() {
        assert_eq!(decode(&[]), Err(DecodeError::ShortMessage { len: 0 }));
        assert_eq!(decode(&[0xB0]), Err(DecodeError::ShortMessage { len: 1 }));
    }

    #[test]
    fn test_truncated_control_change_is_ignored() {
        assert_eq!(decode(&[0xB0, 7]), Ok(None));
    }

    #[test]
    fn test_other_messages_are_ignored() {
        assert_eq!(decode(&[0x90, 60, 100]), Ok(None)); // Note On
        assert_eq!(decode(&[0x80, 60, 0]), Ok(None)); // Note Off
        assert_eq!(decode(&[0xE0, 0x00, 0x40]), Ok(None)); // Pitch Bend
        assert_eq!(decode(&[0xC0, 5]), Ok(None)); // Program Change
        assert_eq!(decode(&[0xF0, 0x7E, 0xF7]), Ok(None)); // SysEx
    }

    #[test]
    fn test_extra_bytes_are_tolerated() {
        let cc = decode(&[0xB0, 21, 64, 0x00, 0x00]).unwrap().unwrap();
        assert_eq!(cc.controller, 21);
        assert_eq!(cc.value, 64);
    }

    #[test]
    fn test_out_of_range_data_is_clamped() {
        let cc = decode(&[0xBF, 0xFF, 0x80]).unwrap().unwrap();
        assert_eq!(cc.channel, 15);
        assert_eq!(cc.controller, 127);
        assert_eq!(cc.value, 127);
    }

    #[test]
    fn test_message_kind() {
        assert_eq!(MessageKind::from_status(0x93), MessageKind::NoteOn);
        assert_eq!(MessageKind::from_status(0xB0), MessageKind::ControlChange);
        assert_eq!(MessageKind::from_status(0xF8), MessageKind::System);
        assert_eq!(MessageKind::from_status(0x40), MessageKind::Data);
    }

    #[test]
    fn test_display_uses_one_based_channel() {
        let cc = ControlChange::new(0, 7, 127);
        assert_eq!(cc.to_string(), "CC ch:1 cc:7 v:127");
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0xB0, 0x07, 0x7F]), "B0 07 7F");
    }

    proptest! {
        #[test]
        fn prop_short_input_always_fails(data in proptest::collection::vec(any::<u8>(), 0..2)) {
            prop_assert!(decode(&data).is_err());
        }

        #[test]
        fn prop_control_change_fields_survive(channel in 0u8..16, cc in 0u8..128, value in 0u8..128) {
            let decoded = decode(&[0xB0 | channel, cc, value]).unwrap();
            prop_assert_eq!(decoded, Some(ControlChange { channel, controller: cc, value }));
        }

        #[test]
        fn prop_non_cc_status_never_decodes(status in any::<u8>(), a in any::<u8>(), b in any::<u8>()) {
            prop_assume!(status >> 4 != CONTROL_CHANGE);
            prop_assert_eq!(decode(&[status, a, b]), Ok(None));
        }
    }
}
