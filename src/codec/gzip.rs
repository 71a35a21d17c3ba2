//! Gzip and zlib bytes→bytes codecs via `flate2`.
//!
//! `gzip` is the zarr v3 codec; `zlib` backs converted zarr v2 compressor
//! metadata.

use std::io::Read;

use bytes::Bytes;
use flate2::Compression;
use flate2::read::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{BytesToBytesCodec, Codec, CodecKind, CodecPlugin, CodecRegistry};

inventory::submit! {
    CodecPlugin::new("gzip", CodecKind::BytesToBytes, create_gzip_codec)
}

inventory::submit! {
    CodecPlugin::new("zlib", CodecKind::BytesToBytes, create_zlib_codec)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GzipCodecConfiguration {
    #[serde(default = "default_compression_level")]
    pub level: u32,
}

fn default_compression_level() -> u32 {
    6
}

fn parse_level(configuration: &serde_json::Value) -> crate::Result<u32> {
    let configuration: GzipCodecConfiguration = if configuration.is_null() {
        GzipCodecConfiguration {
            level: default_compression_level(),
        }
    } else {
        serde_json::from_value(configuration.clone())?
    };
    if configuration.level > 9 {
        return Err(crate::Error::metadata(format!(
            "invalid compression level {}",
            configuration.level
        )));
    }
    Ok(configuration.level)
}

fn create_gzip_codec(
    configuration: &serde_json::Value,
    _registry: &CodecRegistry,
) -> crate::Result<Codec> {
    Ok(Codec::BytesToBytes(Arc::new(GzipCodec::new(parse_level(
        configuration,
    )?))))
}

fn create_zlib_codec(
    configuration: &serde_json::Value,
    _registry: &CodecRegistry,
) -> crate::Result<Codec> {
    Ok(Codec::BytesToBytes(Arc::new(ZlibCodec::new(parse_level(
        configuration,
    )?))))
}

#[derive(Debug, Clone, Copy)]
pub struct GzipCodec {
    level: u32,
}

impl GzipCodec {
    pub fn new(level: u32) -> Self {
        Self { level }
    }
}

impl BytesToBytesCodec for GzipCodec {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn decode(&self, bytes: Bytes) -> crate::Result<Bytes> {
        let mut out = Vec::new();
        GzDecoder::new(bytes.as_ref())
            .read_to_end(&mut out)
            .map_err(crate::Error::wrap)?;
        Ok(Bytes::from_owner(out))
    }

    fn encode(&self, bytes: Bytes) -> crate::Result<Bytes> {
        let mut out = Vec::new();
        GzEncoder::new(bytes.as_ref(), Compression::new(self.level))
            .read_to_end(&mut out)
            .map_err(crate::Error::wrap)?;
        Ok(Bytes::from_owner(out))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZlibCodec {
    level: u32,
}

impl ZlibCodec {
    pub fn new(level: u32) -> Self {
        Self { level }
    }
}

impl BytesToBytesCodec for ZlibCodec {
    fn name(&self) -> &'static str {
        "zlib"
    }

    fn decode(&self, bytes: Bytes) -> crate::Result<Bytes> {
        let mut out = Vec::new();
        ZlibDecoder::new(bytes.as_ref())
            .read_to_end(&mut out)
            .map_err(crate::Error::wrap)?;
        Ok(Bytes::from_owner(out))
    }

    fn encode(&self, bytes: Bytes) -> crate::Result<Bytes> {
        let mut out = Vec::new();
        ZlibEncoder::new(bytes.as_ref(), Compression::new(self.level))
            .read_to_end(&mut out)
            .map_err(crate::Error::wrap)?;
        Ok(Bytes::from_owner(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trip() {
        let codec = GzipCodec::new(6);
        let payload = Bytes::from_static(b"volumetric data is highly compressible \0\0\0\0\0\0");
        let encoded = codec.encode(payload.clone()).unwrap();
        assert_ne!(encoded, payload);
        assert_eq!(codec.decode(encoded).unwrap(), payload);
    }

    #[test]
    fn zlib_round_trip() {
        let codec = ZlibCodec::new(6);
        let payload = Bytes::from_owner(vec![7u8; 1024]);
        let encoded = codec.encode(payload.clone()).unwrap();
        assert!(encoded.len() < payload.len());
        assert_eq!(codec.decode(encoded).unwrap(), payload);
    }

    #[test]
    fn corrupt_stream_is_a_codec_error() {
        let codec = GzipCodec::new(6);
        assert!(codec.decode(Bytes::from_static(&[1, 2, 3, 4])).is_err());
    }

    #[test]
    fn invalid_level_rejected() {
        assert!(parse_level(&serde_json::json!({"level": 12})).is_err());
    }
}
