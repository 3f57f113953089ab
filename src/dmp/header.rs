//! # DMP Header Codec
//!
//! This module decodes and encodes the fixed 8-byte DMP header that prefixes
//! every management frame. It leverages the `nom` crate for parsing the
//! binary layout.
//!
//! Layout, offsets in bytes:
//! - 0: op in the low 3 bits (values above 3 are not DMP traffic)
//! - 1: flags
//! - 2..4: payload length, big-endian
//! - 4..6: group id, big-endian
//! - 6: sequence number
//! - 7: command id

use crate::error::FuotaError;
use bytes::{BufMut, BytesMut};
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

/// Mask selecting the op bits of the first header byte
const OP_MASK: u8 = 0x07;

/// Represents the DMP operation carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmpOp {
    ReadRequest = 0,
    ReadResponse = 1,
    WriteRequest = 2,
    WriteResponse = 3,
}

impl TryFrom<u8> for DmpOp {
    type Error = FuotaError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value & OP_MASK {
            0 => Ok(DmpOp::ReadRequest),
            1 => Ok(DmpOp::ReadResponse),
            2 => Ok(DmpOp::WriteRequest),
            3 => Ok(DmpOp::WriteResponse),
            op => Err(FuotaError::MalformedResponse(format!(
                "not a DMP frame: op {op}"
            ))),
        }
    }
}

/// Represents a parsed DMP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmpHeader {
    pub op: DmpOp,
    pub flags: u8,
    /// Payload length in bytes, excluding the header itself
    pub length: u16,
    pub group_id: u16,
    pub sequence: u8,
    pub command_id: u8,
}

fn header_fields(input: &[u8]) -> IResult<&[u8], (u8, u8, u16, u16, u8, u8)> {
    let (input, op_byte) = be_u8(input)?;
    let (input, flags) = be_u8(input)?;
    let (input, length) = be_u16(input)?;
    let (input, group_id) = be_u16(input)?;
    let (input, sequence) = be_u8(input)?;
    let (input, command_id) = be_u8(input)?;
    Ok((input, (op_byte, flags, length, group_id, sequence, command_id)))
}

impl DmpHeader {
    /// Size of the encoded header in bytes
    pub const SIZE: usize = 8;

    /// Parses a header from the start of `input`.
    ///
    /// Fails with `MalformedResponse` when fewer than `SIZE` bytes are
    /// available or when the op bits name an operation above 3.
    pub fn parse(input: &[u8]) -> Result<DmpHeader, FuotaError> {
        let (_, (op_byte, flags, length, group_id, sequence, command_id)) =
            header_fields(input).map_err(|_| {
                FuotaError::MalformedResponse(format!(
                    "buffer of {} B is shorter than a DMP header",
                    input.len()
                ))
            })?;
        Ok(DmpHeader {
            op: DmpOp::try_from(op_byte)?,
            flags,
            length,
            group_id,
            sequence,
            command_id,
        })
    }

    /// Packs the header into its 8-byte wire form.
    pub fn pack(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u8(self.op as u8);
        buf.put_u8(self.flags);
        buf.put_u16(self.length);
        buf.put_u16(self.group_id);
        buf.put_u8(self.sequence);
        buf.put_u8(self.command_id);
        buf
    }

    /// Total size of the message this header describes, header included.
    pub fn total_len(&self) -> usize {
        Self::SIZE + self.length as usize
    }
}

/// Identity a reassembled response must carry to be accepted.
///
/// Group and command are set when a request is sent; the sequence is
/// recorded by `send_and_receive` from the same request header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpectedResponseIdentity {
    pub group_id: u16,
    pub command_id: u8,
    pub sequence: u8,
}

impl ExpectedResponseIdentity {
    /// True when all three identity fields of `header` match.
    pub fn matches(&self, header: &DmpHeader) -> bool {
        header.group_id == self.group_id
            && header.command_id == self.command_id
            && header.sequence == self.sequence
    }

    /// True when the group and command match; the sequence is checked
    /// separately once a fragmented message is complete.
    pub fn matches_request(&self, header: &DmpHeader) -> bool {
        header.group_id == self.group_id && header.command_id == self.command_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_parse_round_trip() {
        let header = DmpHeader {
            op: DmpOp::WriteResponse,
            flags: 0,
            length: 190,
            group_id: 1,
            sequence: 7,
            command_id: 1,
        };
        let packed = header.pack();
        assert_eq!(packed.len(), DmpHeader::SIZE);
        let parsed = DmpHeader::parse(&packed).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn length_is_big_endian() {
        let header = DmpHeader {
            op: DmpOp::ReadRequest,
            flags: 0,
            length: 0x0102,
            group_id: 0x0304,
            sequence: 5,
            command_id: 6,
        };
        let packed = header.pack();
        assert_eq!(&packed[2..4], &[0x01, 0x02]);
        assert_eq!(&packed[4..6], &[0x03, 0x04]);
    }

    #[test]
    fn rejects_non_dmp_op() {
        let mut bytes = [0u8; DmpHeader::SIZE];
        bytes[0] = 0x05;
        assert!(matches!(
            DmpHeader::parse(&bytes),
            Err(FuotaError::MalformedResponse(_))
        ));
    }

    #[test]
    fn rejects_short_buffer() {
        let bytes = [0x03, 0x00, 0x00];
        assert!(matches!(
            DmpHeader::parse(&bytes),
            Err(FuotaError::MalformedResponse(_))
        ));
    }

    #[test]
    fn op_ignores_reserved_high_bits() {
        let mut bytes = [0u8; DmpHeader::SIZE];
        bytes[0] = 0x0B; // reserved bit set, op = 3
        let header = DmpHeader::parse(&bytes).unwrap();
        assert_eq!(header.op, DmpOp::WriteResponse);
    }

    #[test]
    fn identity_match_requires_all_three_fields() {
        let expected = ExpectedResponseIdentity {
            group_id: 1,
            command_id: 1,
            sequence: 9,
        };
        let mut header = DmpHeader {
            op: DmpOp::WriteResponse,
            flags: 0,
            length: 0,
            group_id: 1,
            sequence: 9,
            command_id: 1,
        };
        assert!(expected.matches(&header));
        header.sequence = 8;
        assert!(!expected.matches(&header));
        assert!(expected.matches_request(&header));
        header.group_id = 2;
        assert!(!expected.matches_request(&header));
    }
}
