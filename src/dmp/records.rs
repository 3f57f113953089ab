//! # Image-Upload Record Bodies
//!
//! CBOR codecs for the two image-management records the transport handles
//! itself: the upload write request (only its `off` field is read, to seed a
//! possible synthesized response) and the upload write response (synthesized
//! whole when the uplink confirmation is lost).

use crate::dmp::header::{DmpHeader, DmpOp};
use crate::error::FuotaError;
use serde::{Deserialize, Serialize, Serializer};

/// Image-management command group
pub const GROUP_IMAGE_MANAGEMENT: u16 = 1;

/// Image upload command id within the image-management group
pub const CMD_IMAGE_UPLOAD: u8 = 1;

fn cbor_bytes<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_bytes(data)
}

/// An image-upload write request body.
#[derive(Debug, Clone, Serialize)]
pub struct UploadWriteRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<u32>,
    /// Byte offset of this chunk within the image
    pub off: u64,
    #[serde(serialize_with = "cbor_bytes")]
    pub data: Vec<u8>,
    /// Total image length, sent with the first chunk only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len: Option<u64>,
}

/// An image-upload write response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadWriteResponse {
    pub rc: i32,
    pub off: u64,
}

/// The only request field the transport reads back out of an upload write.
#[derive(Debug, Deserialize)]
struct UploadWriteFields {
    off: u64,
}

/// Extracts the `off` field from an upload write request body.
pub fn upload_write_offset(body: &[u8]) -> Result<u64, FuotaError> {
    let fields: UploadWriteFields = ciborium::de::from_reader(body)
        .map_err(|e| FuotaError::MalformedResponse(format!("upload write body: {e}")))?;
    Ok(fields.off)
}

/// Encodes a complete upload write request frame, header included.
pub fn encode_upload_write_request(
    request: &UploadWriteRequest,
    sequence: u8,
) -> Result<Vec<u8>, FuotaError> {
    let mut body = Vec::new();
    ciborium::ser::into_writer(request, &mut body)
        .map_err(|e| FuotaError::MalformedResponse(format!("upload write request: {e}")))?;
    frame(DmpOp::WriteRequest, sequence, &body)
}

/// Encodes a complete upload write response frame, header included.
pub fn encode_upload_write_response(sequence: u8, off: u64) -> Result<Vec<u8>, FuotaError> {
    let mut body = Vec::new();
    ciborium::ser::into_writer(&UploadWriteResponse { rc: 0, off }, &mut body)
        .map_err(|e| FuotaError::MalformedResponse(format!("upload write response: {e}")))?;
    frame(DmpOp::WriteResponse, sequence, &body)
}

/// Parses a complete upload write response frame back into its sequence and
/// body fields.
pub fn decode_upload_write_response(
    message: &[u8],
) -> Result<(u8, UploadWriteResponse), FuotaError> {
    let header = DmpHeader::parse(message)?;
    if message.len() != header.total_len() {
        return Err(FuotaError::MalformedResponse(format!(
            "upload write response is {} B, header declares {} B",
            message.len(),
            header.total_len()
        )));
    }
    let response: UploadWriteResponse = ciborium::de::from_reader(&message[DmpHeader::SIZE..])
        .map_err(|e| FuotaError::MalformedResponse(format!("upload write response: {e}")))?;
    Ok((header.sequence, response))
}

fn frame(op: DmpOp, sequence: u8, body: &[u8]) -> Result<Vec<u8>, FuotaError> {
    let length = u16::try_from(body.len()).map_err(|_| {
        FuotaError::MalformedResponse(format!("record body of {} B overflows the header", body.len()))
    })?;
    let header = DmpHeader {
        op,
        flags: 0,
        length,
        group_id: GROUP_IMAGE_MANAGEMENT,
        sequence,
        command_id: CMD_IMAGE_UPLOAD,
    };
    let mut message = header.pack();
    message.extend_from_slice(body);
    Ok(message.to_vec())
}
