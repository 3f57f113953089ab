//! # DMP Codec
//!
//! Header and record-body codecs for the device-management protocol carried
//! by this transport. The transport itself only inspects the fixed header
//! and the image-upload record fields; every other payload is opaque.

pub mod header;
pub mod records;

pub use header::{DmpHeader, DmpOp, ExpectedResponseIdentity};
pub use records::{
    decode_upload_write_response, encode_upload_write_request, encode_upload_write_response,
    upload_write_offset, UploadWriteRequest, UploadWriteResponse, CMD_IMAGE_UPLOAD,
    GROUP_IMAGE_MANAGEMENT,
};
