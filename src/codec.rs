// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The 42-byte MAAP wire frame (C3): an Ethernet header followed by the
//! AVTP MAAP PDU, all big-endian. See spec.md §4.3 for the field table.

use bitfield::bitfield;

use crate::address::{Address, MAAP_DEST_MAC};
use crate::error::MaapError;

/// Total length of a MAAP frame on the wire.
pub const FRAME_LEN: usize = 42;

const ETHERTYPE_AVTP: u16 = 0x22F0;
const SUBTYPE_MAAP: u8 = 0xFE;
const MAAP_VERSION: u8 = 0;
const MAAP_DATA_LENGTH: u16 = 16;

bitfield! {
    #[derive(Copy, Clone, Eq, PartialEq)]
    struct SubtypeByte(u8);
    sv, set_sv: 7;
    avtp_version, set_avtp_version: 6, 4;
    msg_type_raw, set_msg_type_raw: 3, 0;
}

bitfield! {
    #[derive(Copy, Clone, Eq, PartialEq)]
    struct VersionLength(u16);
    maap_version, set_maap_version: 15, 11;
    data_length, set_data_length: 10, 0;
}

/// The three MAAP message types (spec.md §4.3). Values match the wire
/// encoding directly.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MsgType {
    Probe = 1,
    Defend = 2,
    Announce = 3,
}

impl MsgType {
    fn from_wire(v: u8) -> Option<Self> {
        match v {
            1 => Some(MsgType::Probe),
            2 => Some(MsgType::Defend),
            3 => Some(MsgType::Announce),
            _ => None,
        }
    }
}

/// The decoded contents of a MAAP PDU, independent of the Ethernet framing
/// around it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Pdu {
    pub msg_type: MsgType,
    pub requested_start: Address,
    pub requested_count: u32,
    /// Only meaningful for [`MsgType::Defend`].
    pub conflict_start: Address,
    pub conflict_count: u32,
}

impl Pdu {
    /// Encodes this PDU into a full 42-byte frame, addressed from `src_mac`
    /// to the fixed MAAP multicast destination. `stream_id` is zeroed on
    /// transmit per spec.md §4.3.
    pub fn encode(&self, src_mac: Address) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];

        put_mac(&mut buf[0..6], MAAP_DEST_MAC);
        put_mac(&mut buf[6..12], src_mac);
        buf[12..14].copy_from_slice(&ETHERTYPE_AVTP.to_be_bytes());
        buf[14] = SUBTYPE_MAAP;

        let mut subtype_byte = SubtypeByte(0);
        subtype_byte.set_sv(true);
        subtype_byte.set_avtp_version(0);
        subtype_byte.set_msg_type_raw(self.msg_type as u8);
        buf[15] = subtype_byte.0;

        let mut vl = VersionLength(0);
        vl.set_maap_version(MAAP_VERSION as u16);
        vl.set_data_length(MAAP_DATA_LENGTH);
        buf[16..18].copy_from_slice(&vl.0.to_be_bytes());

        // buf[18..26] stream_id stays zero.

        put_mac(&mut buf[26..32], self.requested_start);
        buf[32..34].copy_from_slice(&(self.requested_count as u16).to_be_bytes());
        put_mac(&mut buf[34..40], self.conflict_start);
        buf[40..42].copy_from_slice(&(self.conflict_count as u16).to_be_bytes());

        buf
    }

    /// Decodes a received frame, returning the peer's source MAC alongside
    /// the PDU. Fails with [`MaapError::MalformedFrame`] if the length,
    /// Ethertype, subtype, or message type don't validate; in that case the
    /// engine's state is left untouched.
    pub fn decode(buf: &[u8]) -> Result<(Address, Pdu), MaapError> {
        if buf.len() != FRAME_LEN {
            return Err(MaapError::MalformedFrame);
        }

        let ethertype = u16::from_be_bytes([buf[12], buf[13]]);
        if ethertype != ETHERTYPE_AVTP {
            return Err(MaapError::MalformedFrame);
        }
        if buf[14] != SUBTYPE_MAAP {
            return Err(MaapError::MalformedFrame);
        }

        let subtype_byte = SubtypeByte(buf[15]);
        let msg_type = MsgType::from_wire(subtype_byte.msg_type_raw())
            .ok_or(MaapError::MalformedFrame)?;

        let src_mac = get_mac(&buf[6..12]);
        let requested_start = get_mac(&buf[26..32]);
        let requested_count = u16::from_be_bytes([buf[32], buf[33]]) as u32;
        let conflict_start = get_mac(&buf[34..40]);
        let conflict_count = u16::from_be_bytes([buf[40], buf[41]]) as u32;

        Ok((
            src_mac,
            Pdu {
                msg_type,
                requested_start,
                requested_count,
                conflict_start,
                conflict_count,
            },
        ))
    }
}

fn put_mac(dst: &mut [u8], mac: Address) {
    debug_assert_eq!(dst.len(), 6);
    dst.copy_from_slice(&mac.to_be_bytes()[2..8]);
}

fn get_mac(src: &[u8]) -> Address {
    debug_assert_eq!(src.len(), 6);
    let mut bytes = [0u8; 8];
    bytes[2..8].copy_from_slice(src);
    Address::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(msg_type: MsgType) -> Pdu {
        Pdu {
            msg_type,
            requested_start: 0x91_E0_F0_00_12_34,
            requested_count: 8,
            conflict_start: 0x91_E0_F0_00_56_78,
            conflict_count: 4,
        }
    }

    #[test]
    fn round_trips_every_msg_type() {
        let src = 0x00_11_22_33_44_55;
        for msg_type in [MsgType::Probe, MsgType::Defend, MsgType::Announce] {
            let pdu = sample(msg_type);
            let frame = pdu.encode(src);
            assert_eq!(frame.len(), FRAME_LEN);
            let (decoded_src, decoded) = Pdu::decode(&frame).unwrap();
            assert_eq!(decoded_src, src);
            assert_eq!(decoded, pdu);
        }
    }

    #[test]
    fn frame_has_fixed_header_fields() {
        let pdu = sample(MsgType::Probe);
        let frame = pdu.encode(0x00_11_22_33_44_55);
        assert_eq!(&frame[0..6], &MAAP_DEST_MAC.to_be_bytes()[2..8]);
        assert_eq!(u16::from_be_bytes([frame[12], frame[13]]), ETHERTYPE_AVTP);
        assert_eq!(frame[14], SUBTYPE_MAAP);
    }

    #[test]
    fn rejects_wrong_length() {
        let mut frame = sample(MsgType::Probe).encode(1).to_vec();
        frame.push(0);
        assert_eq!(Pdu::decode(&frame), Err(MaapError::MalformedFrame));
    }

    #[test]
    fn rejects_wrong_ethertype() {
        let mut frame = sample(MsgType::Probe).encode(1);
        frame[12] = 0;
        frame[13] = 0;
        assert_eq!(Pdu::decode(&frame), Err(MaapError::MalformedFrame));
    }

    #[test]
    fn rejects_wrong_subtype() {
        let mut frame = sample(MsgType::Probe).encode(1);
        frame[14] = 0;
        assert_eq!(Pdu::decode(&frame), Err(MaapError::MalformedFrame));
    }

    #[test]
    fn rejects_unknown_msg_type() {
        let mut frame = sample(MsgType::Probe).encode(1);
        let mut b = SubtypeByte(frame[15]);
        b.set_msg_type_raw(0);
        frame[15] = b.0;
        assert_eq!(Pdu::decode(&frame), Err(MaapError::MalformedFrame));
    }
}
