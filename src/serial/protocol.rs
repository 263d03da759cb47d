//! Binary frame codec for the projector control protocol.
//!
//! Every command is a fixed 13 byte frame:
//!
//! ```text
//! +-----------------+--------+----------+---------+--------+
//! | header (5)      | crc(2) | action(2)| class(2)| code(2)|
//! | be ef 03 06 00  |        |          |         |        |
//! +-----------------+--------+----------+---------+--------+
//! ```
//!
//! Catalog entries declare their fields as (crc, class, code) but the wire
//! order puts the action selector between crc and class.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Fixed prefix of every frame.
pub const HEADER: [u8; 5] = [0xbe, 0xef, 0x03, 0x06, 0x00];

/// Total length of an encoded frame.
pub const FRAME_LEN: usize = 13;

// Reply codes sent back by the projector
pub const REPLY_ACK: u8 = 0x06;
pub const REPLY_NAK: u8 = 0x15;
pub const REPLY_ERROR: u8 = 0x1c;
pub const REPLY_DATA: u8 = 0x1d;

/// Action selector carried in bytes 7..9 of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionCode {
    Set,
    Get,
    Increment,
    Decrement,
    Execute,
}

impl ActionCode {
    pub const ALL: [ActionCode; 5] = [
        ActionCode::Set,
        ActionCode::Get,
        ActionCode::Increment,
        ActionCode::Decrement,
        ActionCode::Execute,
    ];

    /// The two selector bytes transmitted for this action.
    pub const fn selector(self) -> [u8; 2] {
        match self {
            ActionCode::Set => [0x01, 0x00],
            ActionCode::Get => [0x02, 0x00],
            ActionCode::Increment => [0x04, 0x00],
            ActionCode::Decrement => [0x05, 0x00],
            ActionCode::Execute => [0x06, 0x00],
        }
    }

    pub fn from_selector(selector: [u8; 2]) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.selector() == selector)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionCode::Set => "set",
            ActionCode::Get => "get",
            ActionCode::Increment => "increment",
            ActionCode::Decrement => "decrement",
            ActionCode::Execute => "execute",
        }
    }
}

impl fmt::Display for ActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three vendor-supplied fields that, together with an action, make a frame.
///
/// `crc` is taken verbatim from the vendor command table; it is never computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodecInput {
    #[serde(with = "hex_pair")]
    pub crc: [u8; 2],
    #[serde(with = "hex_pair")]
    pub class: [u8; 2],
    #[serde(with = "hex_pair")]
    pub code: [u8; 2],
}

impl CodecInput {
    pub const fn new(crc: [u8; 2], class: [u8; 2], code: [u8; 2]) -> Self {
        Self { crc, class, code }
    }
}

/// An encoded, immutable 13 byte command frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Decode the action selector back out of the frame.
    pub fn action(&self) -> Option<ActionCode> {
        ActionCode::from_selector([self.0[7], self.0[8]])
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self.to_hex())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Build the wire frame for `action` applied to `input`.
pub fn encode(action: ActionCode, input: &CodecInput) -> Frame {
    let mut bytes = [0u8; FRAME_LEN];
    bytes[0..5].copy_from_slice(&HEADER);
    bytes[5..7].copy_from_slice(&input.crc);
    bytes[7..9].copy_from_slice(&action.selector());
    bytes[9..11].copy_from_slice(&input.class);
    bytes[11..13].copy_from_slice(&input.code);
    Frame(bytes)
}

/// Classification of the bytes the projector sends back after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceReply {
    Ack,
    Nak,
    Error([u8; 2]),
    Data([u8; 2]),
    /// Anything that does not follow the reply layout, including a bare
    /// two byte value.
    Unrecognized,
}

impl DeviceReply {
    pub fn parse(bytes: &[u8]) -> Self {
        match bytes {
            [REPLY_ACK] => DeviceReply::Ack,
            [REPLY_NAK] => DeviceReply::Nak,
            [REPLY_ERROR, a, b] => DeviceReply::Error([*a, *b]),
            [REPLY_DATA, a, b] => DeviceReply::Data([*a, *b]),
            _ => DeviceReply::Unrecognized,
        }
    }

    /// The two data bytes of a reply, if it carries a value.
    ///
    /// A bare two byte response is treated as the value itself.
    pub fn value(bytes: &[u8]) -> Option<[u8; 2]> {
        match Self::parse(bytes) {
            DeviceReply::Data(value) => Some(value),
            _ => <[u8; 2]>::try_from(bytes).ok(),
        }
    }
}

/// Serde adapter writing `[u8; 2]` as a four digit hex string (`"bad2"`).
pub(crate) mod hex_pair {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8; 2], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 2], D::Error> {
        let text = String::deserialize(deserializer)?;
        let cleaned = text.trim_start_matches("0x").replace(' ', "");
        let bytes = hex::decode(&cleaned).map_err(D::Error::custom)?;
        <[u8; 2]>::try_from(bytes.as_slice())
            .map_err(|_| D::Error::custom(format!("expected 2 bytes, got {:?}", text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_order_puts_action_after_crc() {
        let input = CodecInput::new([0xaa, 0xbb], [0xcc, 0xdd], [0xee, 0xff]);
        let frame = encode(ActionCode::Decrement, &input);
        assert_eq!(
            frame.as_bytes(),
            &[0xbe, 0xef, 0x03, 0x06, 0x00, 0xaa, 0xbb, 0x05, 0x00, 0xcc, 0xdd, 0xee, 0xff]
        );
        assert_eq!(frame.action(), Some(ActionCode::Decrement));
    }

    #[test]
    fn selectors_round_trip() {
        for action in ActionCode::ALL {
            assert_eq!(ActionCode::from_selector(action.selector()), Some(action));
        }
        assert_eq!(ActionCode::from_selector([0x03, 0x00]), None);
    }

    #[test]
    fn reply_classification() {
        assert_eq!(DeviceReply::parse(&[0x06]), DeviceReply::Ack);
        assert_eq!(DeviceReply::parse(&[0x15]), DeviceReply::Nak);
        assert_eq!(DeviceReply::parse(&[0x1d, 0x01, 0x00]), DeviceReply::Data([0x01, 0x00]));
        assert_eq!(DeviceReply::parse(&[0x1c, 0x00, 0x00]), DeviceReply::Error([0x00, 0x00]));
        assert_eq!(DeviceReply::parse(&[]), DeviceReply::Unrecognized);

        assert_eq!(DeviceReply::value(&[0x1d, 0x02, 0x00]), Some([0x02, 0x00]));
        assert_eq!(DeviceReply::value(&[0x02, 0x00]), Some([0x02, 0x00]));
        assert_eq!(DeviceReply::value(&[0x06]), None);
    }

    #[test]
    fn codec_input_uses_hex_strings() {
        let input: CodecInput =
            serde_json::from_str(r#"{"crc":"bad2","class":"0060","code":"0x0100"}"#).unwrap();
        assert_eq!(input, CodecInput::new([0xba, 0xd2], [0x00, 0x60], [0x01, 0x00]));

        let json = serde_json::to_string(&input).unwrap();
        assert_eq!(json, r#"{"crc":"bad2","class":"0060","code":"0100"}"#);

        assert!(serde_json::from_str::<CodecInput>(r#"{"crc":"ba","class":"0060","code":"0100"}"#).is_err());
    }
}
