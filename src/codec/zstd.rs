//! The `zstd` bytes→bytes codec.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{BytesToBytesCodec, Codec, CodecKind, CodecPlugin, CodecRegistry};

inventory::submit! {
    CodecPlugin::new("zstd", CodecKind::BytesToBytes, create_zstd_codec)
}

fn create_zstd_codec(
    configuration: &serde_json::Value,
    _registry: &CodecRegistry,
) -> crate::Result<Codec> {
    let configuration: ZstdCodecConfiguration = if configuration.is_null() {
        ZstdCodecConfiguration::default()
    } else {
        serde_json::from_value(configuration.clone())?
    };
    Ok(Codec::BytesToBytes(Arc::new(ZstdCodec::new(
        configuration.level,
    ))))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ZstdCodecConfiguration {
    #[serde(default)]
    pub level: i32,
    /// Accepted for compatibility; checksums are handled by the zstd frame.
    #[serde(default)]
    pub checksum: bool,
}

impl ZstdCodecConfiguration {
    pub fn new(level: i32) -> Self {
        Self {
            level,
            checksum: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl BytesToBytesCodec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn decode(&self, bytes: Bytes) -> crate::Result<Bytes> {
        let out = zstd::stream::decode_all(bytes.as_ref()).map_err(crate::Error::wrap)?;
        Ok(Bytes::from_owner(out))
    }

    fn encode(&self, bytes: Bytes) -> crate::Result<Bytes> {
        let out =
            zstd::stream::encode_all(bytes.as_ref(), self.level).map_err(crate::Error::wrap)?;
        Ok(Bytes::from_owner(out))
    }
}
