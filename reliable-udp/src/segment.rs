//! Wire format for protocol segments.
//!
//! Every datagram exchanged between peers is one [`Segment`].  This module
//! owns the explicit binary layout and nothing else: no I/O happens here.
//!
//! # Wire format (version 1)
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0       1               3               5               7
//! +-------+---------------+---------------+---------------+
//! |version|  source port  |   dest port   |    length     |
//! +-------+---------------+---------------+---------------+-------+
//! |        sequence number        |  ACK  |   ack number          |
//! +-------+-------+---------------+-------+-----------------------+
//! |  SYN  |  FIN  |  window size  |addrlen| source address ...    |
//! +-------+-------+---------------+-------+-----------------------+
//! |  CRC32 checksum (iff payload) |  payload ...                  |
//! +-------------------------------+-------------------------------+
//! ```
//!
//! Fixed part: [`FIXED_HEADER_LEN`] = 21 bytes.  `length` covers the whole
//! datagram.  Whatever follows the address is the trailer: empty for a
//! control-only segment, otherwise a 4-byte checksum followed by the payload
//! (which may itself be empty).

use std::fmt;
use std::net::IpAddr;

use crate::checksum;
use crate::error::{ChecksumMismatch, DecodeError, EncodeError};

/// Wire layout version written into every segment.
pub const VERSION: u8 = 1;

/// Byte length of the fixed-size part of the header.
pub const FIXED_HEADER_LEN: usize = 21;

/// Bytes taken by the checksum when a payload is present.
pub const CHECKSUM_LEN: usize = 4;

/// Largest datagram the 16-bit `length` field can describe.
pub const MAX_SEGMENT_LEN: usize = u16::MAX as usize;

const OFF_VERSION: usize = 0;
const OFF_SRC_PORT: usize = 1;
const OFF_DST_PORT: usize = 3;
const OFF_LENGTH: usize = 5;
const OFF_SEQ: usize = 7;
const OFF_ACK_FLAG: usize = 11;
const OFF_ACK_NUM: usize = 12;
const OFF_SYN: usize = 16;
const OFF_FIN: usize = 17;
const OFF_WINDOW: usize = 18;
const OFF_ADDR_LEN: usize = 20;

/// One protocol datagram.
///
/// The checksum is not settable: it is computed whenever a payload is
/// attached and recomputed again by [`Segment::encode`].  A decoded segment
/// carries whatever checksum was on the wire; check it with
/// [`Segment::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub source_port: u16,
    pub dest_port: u16,
    /// Text form of the initiator's address; only set on the opening SYN.
    pub source_address: Option<String>,
    /// Position in the segment stream (one slot per segment, not per byte).
    pub seq: u32,
    pub ack: bool,
    /// One past the highest sequence number accepted, when `ack` is set.
    pub ack_number: u32,
    pub syn: bool,
    pub fin: bool,
    /// Advertised receive window; meaningful on handshake segments only.
    pub window_size: u16,
    checksum: Option<u32>,
    payload: Option<Vec<u8>>,
}

impl Segment {
    /// A bare control segment with every flag cleared.
    pub fn new(source_port: u16, dest_port: u16, seq: u32) -> Self {
        Self {
            source_port,
            dest_port,
            source_address: None,
            seq,
            ack: false,
            ack_number: 0,
            syn: false,
            fin: false,
            window_size: 0,
            checksum: None,
            payload: None,
        }
    }

    pub fn with_syn(mut self) -> Self {
        self.syn = true;
        self
    }

    pub fn with_fin(mut self) -> Self {
        self.fin = true;
        self
    }

    pub fn with_ack(mut self, ack_number: u32) -> Self {
        self.ack = true;
        self.ack_number = ack_number;
        self
    }

    pub fn with_window(mut self, window_size: u16) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_source_address(mut self, addr: IpAddr) -> Self {
        self.source_address = Some(addr.to_string());
        self
    }

    /// Attach `payload`, computing its checksum.
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.set_payload(Some(payload));
        self
    }

    /// Replace the payload; the checksum follows it.
    pub fn set_payload(&mut self, payload: Option<Vec<u8>>) {
        self.checksum = payload.as_deref().map(checksum::compute);
        self.payload = payload;
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn into_payload(self) -> Option<Vec<u8>> {
        self.payload
    }

    pub fn checksum(&self) -> Option<u32> {
        self.checksum
    }

    /// `true` for a segment carrying application data.
    pub fn is_data(&self) -> bool {
        self.payload.is_some()
    }

    /// Header size plus payload length: the value of the `length` field.
    pub fn length(&self) -> usize {
        let addr = self.source_address.as_ref().map_or(0, String::len);
        let trailer = self.payload.as_ref().map_or(0, |p| CHECKSUM_LEN + p.len());
        FIXED_HEADER_LEN + addr + trailer
    }

    /// Compare the carried checksum against the payload.
    ///
    /// Control-only segments always pass.
    pub fn verify(&self) -> Result<(), ChecksumMismatch> {
        match (&self.payload, self.checksum) {
            (Some(payload), Some(carried)) => checksum::validate(carried, payload),
            (Some(payload), None) => Err(ChecksumMismatch {
                carried: 0,
                computed: checksum::compute(payload),
            }),
            (None, _) => Ok(()),
        }
    }

    /// Serialise into a newly allocated datagram.
    ///
    /// The checksum is recomputed from the current payload; any stored value
    /// is ignored.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let addr = self.source_address.as_deref().unwrap_or("").as_bytes();
        let addr_len = u8::try_from(addr.len()).map_err(|_| EncodeError::AddressTooLong(addr.len()))?;
        let total = self.length();
        let length = u16::try_from(total).map_err(|_| EncodeError::TooLarge(total))?;

        let mut buf = vec![0u8; FIXED_HEADER_LEN];
        buf[OFF_VERSION] = VERSION;
        buf[OFF_SRC_PORT..OFF_SRC_PORT + 2].copy_from_slice(&self.source_port.to_be_bytes());
        buf[OFF_DST_PORT..OFF_DST_PORT + 2].copy_from_slice(&self.dest_port.to_be_bytes());
        buf[OFF_LENGTH..OFF_LENGTH + 2].copy_from_slice(&length.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK_FLAG] = u8::from(self.ack);
        buf[OFF_ACK_NUM..OFF_ACK_NUM + 4].copy_from_slice(&self.ack_number.to_be_bytes());
        buf[OFF_SYN] = u8::from(self.syn);
        buf[OFF_FIN] = u8::from(self.fin);
        buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&self.window_size.to_be_bytes());
        buf[OFF_ADDR_LEN] = addr_len;

        buf.reserve(total - FIXED_HEADER_LEN);
        buf.extend_from_slice(addr);
        if let Some(payload) = &self.payload {
            buf.extend_from_slice(&checksum::compute(payload).to_be_bytes());
            buf.extend_from_slice(payload);
        }
        debug_assert_eq!(buf.len(), total);
        Ok(buf)
    }

    /// Parse a datagram.
    ///
    /// Fails on truncated or malformed input and never returns a partially
    /// filled segment.  The checksum is *not* validated here.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < FIXED_HEADER_LEN {
            return Err(DecodeError::BufferTooShort(buf.len()));
        }
        if buf[OFF_VERSION] != VERSION {
            return Err(DecodeError::UnsupportedVersion(buf[OFF_VERSION]));
        }

        let declared = usize::from(read_u16(buf, OFF_LENGTH));
        if declared != buf.len() {
            return Err(DecodeError::LengthMismatch {
                declared,
                actual: buf.len(),
            });
        }

        let addr_end = FIXED_HEADER_LEN + usize::from(buf[OFF_ADDR_LEN]);
        if addr_end > buf.len() {
            return Err(DecodeError::AddressTruncated);
        }
        let source_address = match &buf[FIXED_HEADER_LEN..addr_end] {
            [] => None,
            text => Some(
                std::str::from_utf8(text)
                    .map_err(|_| DecodeError::AddressNotUtf8)?
                    .to_owned(),
            ),
        };

        let (checksum, payload) = match &buf[addr_end..] {
            [] => (None, None),
            trailer if trailer.len() < CHECKSUM_LEN => {
                return Err(DecodeError::ChecksumTruncated(trailer.len()))
            }
            trailer => (
                Some(read_u32(trailer, 0)),
                Some(trailer[CHECKSUM_LEN..].to_vec()),
            ),
        };

        Ok(Self {
            source_port: read_u16(buf, OFF_SRC_PORT),
            dest_port: read_u16(buf, OFF_DST_PORT),
            source_address,
            seq: read_u32(buf, OFF_SEQ),
            ack: read_flag(buf[OFF_ACK_FLAG])?,
            ack_number: read_u32(buf, OFF_ACK_NUM),
            syn: read_flag(buf[OFF_SYN])?,
            fin: read_flag(buf[OFF_FIN])?,
            window_size: read_u16(buf, OFF_WINDOW),
            checksum,
            payload,
        })
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq={}", self.seq)?;
        if self.ack {
            write!(f, " ack={}", self.ack_number)?;
        }
        let flags: Vec<&str> = [(self.syn, "SYN"), (self.ack, "ACK"), (self.fin, "FIN")]
            .into_iter()
            .filter_map(|(set, name)| set.then_some(name))
            .collect();
        if !flags.is_empty() {
            write!(f, " [{}]", flags.join(","))?;
        }
        if let Some(payload) = &self.payload {
            write!(f, " len={}", payload.len())?;
        }
        Ok(())
    }
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_flag(byte: u8) -> Result<bool, DecodeError> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(DecodeError::InvalidFlag(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn syn() -> Segment {
        Segment::new(5000, 6000, 42)
            .with_syn()
            .with_source_address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)))
    }

    #[test]
    fn control_segment_roundtrip() {
        let seg = syn();
        assert_eq!(Segment::decode(&seg.encode().unwrap()).unwrap(), seg);
    }

    #[test]
    fn handshake_reply_roundtrip() {
        let seg = Segment::new(6000, 5000, 7).with_syn().with_ack(43).with_window(8);
        let decoded = Segment::decode(&seg.encode().unwrap()).unwrap();
        assert_eq!(decoded, seg);
        assert_eq!(decoded.window_size, 8);
        assert!(decoded.checksum().is_none());
    }

    #[test]
    fn data_segment_roundtrip_keeps_checksum() {
        let seg = Segment::new(1, 2, u32::MAX).with_payload(b"ABC".to_vec());
        let decoded = Segment::decode(&seg.encode().unwrap()).unwrap();
        assert_eq!(decoded, seg);
        assert_eq!(decoded.checksum(), Some(checksum::compute(b"ABC")));
        assert!(decoded.verify().is_ok());
    }

    #[test]
    fn empty_payload_differs_from_absent_payload() {
        let empty = Segment::new(1, 2, 3).with_fin().with_payload(Vec::new());
        let bytes = empty.encode().unwrap();
        assert_eq!(bytes.len(), FIXED_HEADER_LEN + CHECKSUM_LEN);
        let decoded = Segment::decode(&bytes).unwrap();
        assert_eq!(decoded.payload(), Some(&[][..]));
        assert!(decoded.is_data());

        let bare = Segment::new(1, 2, 3).with_fin();
        assert!(!Segment::decode(&bare.encode().unwrap()).unwrap().is_data());
    }

    #[test]
    fn length_is_header_plus_payload() {
        let seg = Segment::new(1, 2, 3).with_payload(vec![0; 10]);
        assert_eq!(seg.length(), FIXED_HEADER_LEN + CHECKSUM_LEN + 10);
        let bytes = seg.encode().unwrap();
        assert_eq!(bytes.len(), seg.length());
        assert_eq!(read_u16(&bytes, OFF_LENGTH) as usize, seg.length());
    }

    #[test]
    fn fields_are_big_endian_on_wire() {
        let bytes = Segment::new(0x0102, 0x0304, 0x0506_0708)
            .with_ack(0x090a_0b0c)
            .encode()
            .unwrap();
        assert_eq!(&bytes[OFF_SRC_PORT..OFF_SRC_PORT + 2], &[0x01, 0x02]);
        assert_eq!(&bytes[OFF_DST_PORT..OFF_DST_PORT + 2], &[0x03, 0x04]);
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[0x05, 0x06, 0x07, 0x08]);
        assert_eq!(&bytes[OFF_ACK_NUM..OFF_ACK_NUM + 4], &[0x09, 0x0a, 0x0b, 0x0c]);
        assert_eq!(bytes[OFF_ACK_FLAG], 1);
    }

    #[test]
    fn setting_payload_recomputes_checksum() {
        let mut seg = Segment::new(1, 2, 3).with_payload(b"old".to_vec());
        seg.set_payload(Some(b"new".to_vec()));
        assert_eq!(seg.checksum(), Some(checksum::compute(b"new")));
        seg.set_payload(None);
        assert_eq!(seg.checksum(), None);
    }

    #[test]
    fn corrupted_payload_decodes_but_fails_verify() {
        let mut bytes = Segment::new(1, 2, 3).with_payload(b"hello".to_vec()).encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x20;
        let decoded = Segment::decode(&bytes).unwrap();
        assert!(decoded.verify().is_err());
    }

    #[test]
    fn decode_empty_buffer_fails() {
        assert_eq!(Segment::decode(&[]), Err(DecodeError::BufferTooShort(0)));
    }

    #[test]
    fn decode_short_header_fails() {
        assert_eq!(
            Segment::decode(&[VERSION; FIXED_HEADER_LEN - 1]),
            Err(DecodeError::BufferTooShort(FIXED_HEADER_LEN - 1))
        );
    }

    #[test]
    fn decode_truncated_datagram_fails() {
        let mut bytes = Segment::new(1, 2, 3).with_payload(b"data".to_vec()).encode().unwrap();
        bytes.pop();
        assert!(matches!(
            Segment::decode(&bytes),
            Err(DecodeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let mut bytes = syn().encode().unwrap();
        bytes[OFF_VERSION] = 9;
        assert_eq!(Segment::decode(&bytes), Err(DecodeError::UnsupportedVersion(9)));
    }

    #[test]
    fn decode_rejects_partial_checksum() {
        let mut bytes = Segment::new(1, 2, 3).encode().unwrap();
        bytes.extend_from_slice(&[0xaa, 0xbb]);
        let len = bytes.len() as u16;
        bytes[OFF_LENGTH..OFF_LENGTH + 2].copy_from_slice(&len.to_be_bytes());
        assert_eq!(Segment::decode(&bytes), Err(DecodeError::ChecksumTruncated(2)));
    }

    #[test]
    fn decode_rejects_overlong_address() {
        let mut bytes = Segment::new(1, 2, 3).encode().unwrap();
        bytes[OFF_ADDR_LEN] = 4;
        assert_eq!(Segment::decode(&bytes), Err(DecodeError::AddressTruncated));
    }

    #[test]
    fn decode_rejects_bad_flag_byte() {
        let mut bytes = Segment::new(1, 2, 3).encode().unwrap();
        bytes[OFF_SYN] = 2;
        assert_eq!(Segment::decode(&bytes), Err(DecodeError::InvalidFlag(2)));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let seg = Segment::new(1, 2, 3).with_payload(vec![0; MAX_SEGMENT_LEN]);
        assert!(matches!(seg.encode(), Err(EncodeError::TooLarge(_))));
    }

    #[test]
    fn display_lists_flags() {
        let seg = Segment::new(1, 2, 9).with_syn().with_ack(10);
        assert_eq!(seg.to_string(), "seq=9 ack=10 [SYN,ACK]");
    }
}
