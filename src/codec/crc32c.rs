//! The `crc32c` bytes→bytes codec: trailing CRC32C checksum verify/strip.

use bytes::Bytes;
use std::sync::Arc;

use super::{BytesToBytesCodec, Codec, CodecKind, CodecPlugin, CodecRegistry};

pub const CHECKSUM_SIZE: usize = 4;

inventory::submit! {
    CodecPlugin::new("crc32c", CodecKind::BytesToBytes, create_crc32c_codec)
}

fn create_crc32c_codec(
    configuration: &serde_json::Value,
    _registry: &CodecRegistry,
) -> crate::Result<Codec> {
    if !configuration.is_null()
        && configuration
            .as_object()
            .is_none_or(|object| !object.is_empty())
    {
        return Err(crate::Error::metadata(
            "crc32c codec does not accept configuration",
        ));
    }
    Ok(Codec::BytesToBytes(Arc::new(Crc32cCodec)))
}

#[derive(Debug, Clone, Copy)]
pub struct Crc32cCodec;

impl BytesToBytesCodec for Crc32cCodec {
    fn name(&self) -> &'static str {
        "crc32c"
    }

    /// Verify the trailing little-endian checksum, then strip it.
    fn decode(&self, bytes: Bytes) -> crate::Result<Bytes> {
        if bytes.len() < CHECKSUM_SIZE {
            return Err(crate::Error::codec(format!(
                "crc32c payload of {} bytes is too short to carry a checksum",
                bytes.len()
            )));
        }
        let (payload, checksum) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
        let stored = u32::from_le_bytes(checksum.try_into().expect("split yields 4 bytes"));
        let computed = ::crc32c::crc32c(payload);
        if stored != computed {
            return Err(crate::Error::codec(format!(
                "crc32c mismatch: stored {stored:#010x}, computed {computed:#010x}"
            )));
        }
        Ok(bytes.slice(..bytes.len() - CHECKSUM_SIZE))
    }

    fn encode(&self, bytes: Bytes) -> crate::Result<Bytes> {
        let checksum = ::crc32c::crc32c(&bytes);
        let mut out = Vec::with_capacity(bytes.len() + CHECKSUM_SIZE);
        out.extend_from_slice(&bytes);
        out.extend_from_slice(&checksum.to_le_bytes());
        Ok(Bytes::from_owner(out))
    }
}
