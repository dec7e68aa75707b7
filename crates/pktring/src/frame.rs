//! Record framing.
//!
//! Every record in the data region is `header || payload`, byte-packed and
//! little-endian. The on-wire layout is unaligned, so fields are encoded and
//! decoded through fixed byte arrays rather than by casting pointers into
//! the mapped region.
//!
//! ```text
//! header (16 bytes):  u16 type | u16 flags | u32 len | u64 ts_ns
//! drop payload (20):  u32 lost | u64 start_ns | u64 end_ns
//! ```

/// Packet record: payload is opaque bytes.
pub const REC_TYPE_PKT: u16 = 1;

/// Drop summary record: payload is a [`DropPayload`].
pub const REC_TYPE_DROP: u16 = 0xFFFF;

/// Encoded size of a [`RecordHeader`].
pub const HEADER_LEN: usize = 16;

/// Encoded size of a [`DropPayload`].
pub const DROP_PAYLOAD_LEN: usize = 20;

/// Total size of a drop record (header plus payload).
pub const DROP_RECORD_LEN: u64 = (HEADER_LEN + DROP_PAYLOAD_LEN) as u64;

/// Fixed-size header preceding every record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub rec_type: u16,
    pub flags: u16,
    pub len: u32,
    pub ts_ns: u64,
}

impl RecordHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&self.rec_type.to_le_bytes());
        buf[2..4].copy_from_slice(&self.flags.to_le_bytes());
        buf[4..8].copy_from_slice(&self.len.to_le_bytes());
        buf[8..16].copy_from_slice(&self.ts_ns.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        Self {
            rec_type: u16::from_le_bytes([buf[0], buf[1]]),
            flags: u16::from_le_bytes([buf[2], buf[3]]),
            len: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ts_ns: u64::from_le_bytes([
                buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
            ]),
        }
    }

    /// Total on-wire size of the record this header describes.
    #[inline]
    pub fn record_len(&self) -> u64 {
        HEADER_LEN as u64 + self.len as u64
    }
}

/// Payload of a [`REC_TYPE_DROP`] record: one coalesced overflow burst.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DropPayload {
    /// Packets lost during the burst.
    pub lost: u32,
    /// Timestamp of the first failed reservation.
    pub start_ns: u64,
    /// Timestamp at which the burst was reported.
    pub end_ns: u64,
}

impl DropPayload {
    pub fn encode(&self) -> [u8; DROP_PAYLOAD_LEN] {
        let mut buf = [0u8; DROP_PAYLOAD_LEN];
        buf[0..4].copy_from_slice(&self.lost.to_le_bytes());
        buf[4..12].copy_from_slice(&self.start_ns.to_le_bytes());
        buf[12..20].copy_from_slice(&self.end_ns.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; DROP_PAYLOAD_LEN]) -> Self {
        Self {
            lost: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            start_ns: u64::from_le_bytes([
                buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
            ]),
            end_ns: u64::from_le_bytes([
                buf[12], buf[13], buf[14], buf[15], buf[16], buf[17], buf[18], buf[19],
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encodes_little_endian() {
        let hdr = RecordHeader {
            rec_type: REC_TYPE_PKT,
            flags: 0,
            len: 2,
            ts_ns: 1000,
        };
        let bytes = hdr.encode();
        assert_eq!(
            bytes,
            [
                0x01, 0x00, // type
                0x00, 0x00, // flags
                0x02, 0x00, 0x00, 0x00, // len
                0xE8, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // ts_ns = 1000
            ]
        );
        assert_eq!(RecordHeader::decode(&bytes), hdr);
    }

    #[test]
    fn drop_type_is_sentinel() {
        let hdr = RecordHeader {
            rec_type: REC_TYPE_DROP,
            flags: 0,
            len: DROP_PAYLOAD_LEN as u32,
            ts_ns: u64::MAX,
        };
        let bytes = hdr.encode();
        assert_eq!(bytes[0], 0xFF);
        assert_eq!(bytes[1], 0xFF);
        assert_eq!(RecordHeader::decode(&bytes).record_len(), DROP_RECORD_LEN);
    }

    #[test]
    fn drop_payload_round_trip() {
        let payload = DropPayload {
            lost: 4,
            start_ns: 10_000,
            end_ns: 25_000,
        };
        let bytes = payload.encode();
        assert_eq!(bytes[0..4], [0x04, 0x00, 0x00, 0x00]);
        assert_eq!(DropPayload::decode(&bytes), payload);
    }
}
