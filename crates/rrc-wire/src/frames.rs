//! Frame codecs for the heartbeat and RIB attribute protocols.
//!
//! Frame layouts (all multi-byte integers big-endian):
//! - Heartbeat request:   `[frame_type][trigger]`
//! - Heartbeat response:  `[frame_type][flags][action_kind][payload...]`
//! - RIB get request:     `[frame_type][identifier][index][length]`
//! - RIB get response:    `[frame_type][identifier][index][length][data...]`
//! - RIB set request:     `[frame_type][identifier][index][length][data...]`
//! - RIB set response:    `[frame_type][identifier][index][achieved_length]`
//!
//! A RIB set response with `achieved_length == 0` signals rejection; the
//! stored value is unchanged on the target.

use bytes::{BufMut, BytesMut};

use crate::WireError;

// ============================================================================
// Frame Type Constants
// ============================================================================

/// RIB attribute read request (remote -> target or target -> remote).
pub const FRAME_RIB_GET: u8 = 0x21;
/// RIB attribute read response.
pub const FRAME_RIB_GET_RESPONSE: u8 = 0x22;
/// RIB attribute write request.
pub const FRAME_RIB_SET: u8 = 0x23;
/// RIB attribute write response.
pub const FRAME_RIB_SET_RESPONSE: u8 = 0x24;
/// Heartbeat check-in from the remote.
pub const FRAME_HEARTBEAT: u8 = 0x31;
/// Heartbeat response from the target.
pub const FRAME_HEARTBEAT_RESPONSE: u8 = 0x32;

/// Maximum payload carried inside a heartbeat response.
pub const HEARTBEAT_PAYLOAD_MAX: usize = 5;

// ============================================================================
// Heartbeat Trigger Flags
// ============================================================================

/// Trigger bits carried in a heartbeat request.
pub mod trigger {
    /// Periodic time-based check-in.
    pub const TIME: u8 = 0x01;
    /// Check-in accelerated by a key press.
    pub const KEY_PRESS: u8 = 0x02;
    /// Remote reports a status change (battery, reboot counter, ...).
    pub const STATUS: u8 = 0x04;
    /// Remote believes a voice session is active.
    pub const VOICE_SESSION: u8 = 0x08;
    /// First check-in after a remote reboot.
    pub const REBOOT: u8 = 0x10;
}

/// Response flag bits carried in a heartbeat response.
pub mod response_flags {
    /// The heartbeat was accepted and processed.
    pub const ACK: u8 = 0x01;
    /// More actions are queued; the remote should poll again promptly.
    pub const POLL_AGAIN: u8 = 0x02;
    /// A network-wide attribute changed since this remote's last check-in;
    /// it should re-read the shared configuration.
    pub const RIB_PENDING: u8 = 0x04;
}

// ============================================================================
// Polling Action Kind
// ============================================================================

/// Action kinds deliverable to a remote through a heartbeat response.
///
/// The discriminant is the wire byte. Precedence among queued actions is a
/// separate fixed table owned by the polling engine, not the wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PollingActionKind {
    /// Nothing for the remote to do.
    NoAction = 0x00,
    /// Remote should reboot.
    Reboot = 0x01,
    /// Remote should drop its pairing and re-pair.
    Repair = 0x02,
    /// New polling configuration follows in the payload.
    PollingConfiguration = 0x03,
    /// Remote should re-report its IRDB status attribute.
    IrdbStatus = 0x04,
    /// Remote should initiate a link-key rotation exchange.
    KeyRotation = 0x05,
    /// Remote should upload its metrics counters.
    Metrics = 0x06,
    /// Cosmetic indication (LED blink pattern).
    Led = 0x07,
}

impl PollingActionKind {
    /// Decode an action kind from its wire byte.
    pub fn from_wire(b: u8) -> Result<Self, WireError> {
        match b {
            0x00 => Ok(PollingActionKind::NoAction),
            0x01 => Ok(PollingActionKind::Reboot),
            0x02 => Ok(PollingActionKind::Repair),
            0x03 => Ok(PollingActionKind::PollingConfiguration),
            0x04 => Ok(PollingActionKind::IrdbStatus),
            0x05 => Ok(PollingActionKind::KeyRotation),
            0x06 => Ok(PollingActionKind::Metrics),
            0x07 => Ok(PollingActionKind::Led),
            other => Err(WireError::UnknownActionKind(other)),
        }
    }
}

// ============================================================================
// Heartbeat Frames
// ============================================================================

/// Heartbeat check-in sent by a remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatFrame {
    /// Trigger bits (see [`trigger`]).
    pub trigger: u8,
}

impl HeartbeatFrame {
    /// Encoded length of a heartbeat request.
    pub const WIRE_LEN: usize = 2;

    /// Encode into a freshly allocated buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u8(FRAME_HEARTBEAT);
        buf.put_u8(self.trigger);
        buf
    }

    /// Decode from a raw frame, validating the frame type byte.
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < Self::WIRE_LEN {
            return Err(WireError::Truncated { needed: Self::WIRE_LEN, got: raw.len() });
        }
        if raw[0] != FRAME_HEARTBEAT {
            return Err(WireError::UnknownFrameType(raw[0]));
        }
        Ok(HeartbeatFrame { trigger: raw[1] })
    }
}

/// Heartbeat response sent by the target, optionally carrying one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatResponse {
    /// Response flags (see [`response_flags`]).
    pub flags: u8,
    /// Action for the remote to perform, `NoAction` if the queue was empty.
    pub action: PollingActionKind,
    /// Action payload, at most [`HEARTBEAT_PAYLOAD_MAX`] bytes.
    pub payload: Vec<u8>,
}

impl HeartbeatResponse {
    /// A bare "no action" response, used before a controller is validated.
    pub fn no_action() -> Self {
        HeartbeatResponse {
            flags: response_flags::ACK,
            action: PollingActionKind::NoAction,
            payload: Vec::new(),
        }
    }

    /// Encode into a freshly allocated buffer.
    pub fn encode(&self) -> Result<BytesMut, WireError> {
        if self.payload.len() > HEARTBEAT_PAYLOAD_MAX {
            return Err(WireError::PayloadTooLong {
                max: HEARTBEAT_PAYLOAD_MAX,
                got: self.payload.len(),
            });
        }
        let mut buf = BytesMut::with_capacity(3 + self.payload.len());
        buf.put_u8(FRAME_HEARTBEAT_RESPONSE);
        buf.put_u8(self.flags);
        buf.put_u8(self.action as u8);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decode from a raw frame, validating the frame type byte.
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < 3 {
            return Err(WireError::Truncated { needed: 3, got: raw.len() });
        }
        if raw[0] != FRAME_HEARTBEAT_RESPONSE {
            return Err(WireError::UnknownFrameType(raw[0]));
        }
        let payload = raw[3..].to_vec();
        if payload.len() > HEARTBEAT_PAYLOAD_MAX {
            return Err(WireError::PayloadTooLong {
                max: HEARTBEAT_PAYLOAD_MAX,
                got: payload.len(),
            });
        }
        Ok(HeartbeatResponse {
            flags: raw[1],
            action: PollingActionKind::from_wire(raw[2])?,
            payload,
        })
    }
}

// ============================================================================
// RIB Frames
// ============================================================================

/// RIB attribute read request: `identifier(1) index(1) length(1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RibGetRequest {
    pub identifier: u8,
    pub index: u8,
    /// Number of bytes the requester wants back.
    pub length: u8,
}

impl RibGetRequest {
    pub const WIRE_LEN: usize = 4;

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u8(FRAME_RIB_GET);
        buf.put_u8(self.identifier);
        buf.put_u8(self.index);
        buf.put_u8(self.length);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < Self::WIRE_LEN {
            return Err(WireError::Truncated { needed: Self::WIRE_LEN, got: raw.len() });
        }
        if raw[0] != FRAME_RIB_GET {
            return Err(WireError::UnknownFrameType(raw[0]));
        }
        Ok(RibGetRequest { identifier: raw[1], index: raw[2], length: raw[3] })
    }
}

/// RIB attribute read response, mirroring the request shape with data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RibGetResponse {
    pub identifier: u8,
    pub index: u8,
    /// Attribute bytes; empty on rejection (length byte encodes 0).
    pub data: Vec<u8>,
}

impl RibGetResponse {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(4 + self.data.len());
        buf.put_u8(FRAME_RIB_GET_RESPONSE);
        buf.put_u8(self.identifier);
        buf.put_u8(self.index);
        buf.put_u8(self.data.len() as u8);
        buf.put_slice(&self.data);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < 4 {
            return Err(WireError::Truncated { needed: 4, got: raw.len() });
        }
        if raw[0] != FRAME_RIB_GET_RESPONSE {
            return Err(WireError::UnknownFrameType(raw[0]));
        }
        let len = raw[3] as usize;
        if raw.len() < 4 + len {
            return Err(WireError::Truncated { needed: 4 + len, got: raw.len() });
        }
        Ok(RibGetResponse {
            identifier: raw[1],
            index: raw[2],
            data: raw[4..4 + len].to_vec(),
        })
    }
}

/// RIB attribute write request: `identifier(1) index(1) length(1) data(length)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RibSetRequest {
    pub identifier: u8,
    pub index: u8,
    pub data: Vec<u8>,
}

impl RibSetRequest {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(4 + self.data.len());
        buf.put_u8(FRAME_RIB_SET);
        buf.put_u8(self.identifier);
        buf.put_u8(self.index);
        buf.put_u8(self.data.len() as u8);
        buf.put_slice(&self.data);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < 4 {
            return Err(WireError::Truncated { needed: 4, got: raw.len() });
        }
        if raw[0] != FRAME_RIB_SET {
            return Err(WireError::UnknownFrameType(raw[0]));
        }
        let len = raw[3] as usize;
        if raw.len() < 4 + len {
            return Err(WireError::Truncated { needed: 4 + len, got: raw.len() });
        }
        Ok(RibSetRequest {
            identifier: raw[1],
            index: raw[2],
            data: raw[4..4 + len].to_vec(),
        })
    }
}

/// RIB attribute write response: achieved length, or 0 on rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RibSetResponse {
    pub identifier: u8,
    pub index: u8,
    pub achieved_length: u8,
}

impl RibSetResponse {
    pub const WIRE_LEN: usize = 4;

    /// True when the write was rejected by the receiver.
    pub fn is_rejection(&self) -> bool {
        self.achieved_length == 0
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u8(FRAME_RIB_SET_RESPONSE);
        buf.put_u8(self.identifier);
        buf.put_u8(self.index);
        buf.put_u8(self.achieved_length);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < Self::WIRE_LEN {
            return Err(WireError::Truncated { needed: Self::WIRE_LEN, got: raw.len() });
        }
        if raw[0] != FRAME_RIB_SET_RESPONSE {
            return Err(WireError::UnknownFrameType(raw[0]));
        }
        Ok(RibSetResponse { identifier: raw[1], index: raw[2], achieved_length: raw[3] })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_round_trip() {
        let frame = HeartbeatFrame { trigger: trigger::TIME | trigger::STATUS };
        let wire = frame.encode();
        assert_eq!(wire.len(), HeartbeatFrame::WIRE_LEN);
        assert_eq!(HeartbeatFrame::decode(&wire).unwrap(), frame);
    }

    #[test]
    fn heartbeat_rejects_wrong_frame_type() {
        let err = HeartbeatFrame::decode(&[FRAME_RIB_GET, 0x01]).unwrap_err();
        assert_eq!(err, WireError::UnknownFrameType(FRAME_RIB_GET));
    }

    #[test]
    fn heartbeat_response_round_trip_with_payload() {
        let resp = HeartbeatResponse {
            flags: response_flags::ACK | response_flags::POLL_AGAIN,
            action: PollingActionKind::PollingConfiguration,
            payload: vec![0xAA, 0xBB, 0xCC],
        };
        let wire = resp.encode().unwrap();
        assert_eq!(HeartbeatResponse::decode(&wire).unwrap(), resp);
    }

    #[test]
    fn heartbeat_response_payload_cap() {
        let resp = HeartbeatResponse {
            flags: response_flags::ACK,
            action: PollingActionKind::Led,
            payload: vec![0u8; HEARTBEAT_PAYLOAD_MAX + 1],
        };
        assert!(matches!(resp.encode(), Err(WireError::PayloadTooLong { .. })));
    }

    #[test]
    fn rib_set_round_trip() {
        let req = RibSetRequest { identifier: 0x10, index: 0, data: vec![1u8; 16] };
        let wire = req.encode();
        assert_eq!(wire[3], 16);
        assert_eq!(RibSetRequest::decode(&wire).unwrap(), req);
    }

    #[test]
    fn rib_set_truncated_data_detected() {
        let mut wire = RibSetRequest { identifier: 0x02, index: 1, data: vec![9u8; 4] }
            .encode()
            .to_vec();
        wire.truncate(6);
        assert!(matches!(
            RibSetRequest::decode(&wire),
            Err(WireError::Truncated { needed: 8, got: 6 })
        ));
    }

    #[test]
    fn rib_set_response_rejection() {
        let resp = RibSetResponse { identifier: 0x10, index: 0, achieved_length: 0 };
        assert!(resp.is_rejection());
        let wire = resp.encode();
        assert_eq!(RibSetResponse::decode(&wire).unwrap(), resp);
    }

    #[test]
    fn action_kind_unknown_byte() {
        assert!(matches!(
            PollingActionKind::from_wire(0x7F),
            Err(WireError::UnknownActionKind(0x7F))
        ));
    }
}
