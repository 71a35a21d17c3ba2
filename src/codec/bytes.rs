//! The `bytes` array→bytes codec: fixed-endianness element materialization.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ArrayToBytesCodec, Codec, CodecKind, CodecPlugin, CodecRegistry, num_elements};
use crate::data_type::{DataType, Endianness, TypedArray};

inventory::submit! {
    CodecPlugin::new("bytes", CodecKind::ArrayToBytes, create_bytes_codec)
}

fn create_bytes_codec(
    configuration: &serde_json::Value,
    _registry: &CodecRegistry,
) -> crate::Result<Codec> {
    let configuration: BytesCodecConfiguration = if configuration.is_null() {
        BytesCodecConfiguration::default()
    } else {
        serde_json::from_value(configuration.clone())?
    };
    Ok(Codec::ArrayToBytes(Arc::new(BytesCodec::new(
        configuration.endian.into(),
    ))))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EndianConfiguration {
    #[default]
    Little,
    Big,
}

impl From<EndianConfiguration> for Endianness {
    fn from(value: EndianConfiguration) -> Self {
        match value {
            EndianConfiguration::Little => Endianness::Little,
            EndianConfiguration::Big => Endianness::Big,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct BytesCodecConfiguration {
    #[serde(default)]
    pub endian: EndianConfiguration,
}

#[derive(Debug, Clone, Copy)]
pub struct BytesCodec {
    endianness: Endianness,
}

impl BytesCodec {
    pub fn new(endianness: Endianness) -> Self {
        Self { endianness }
    }

    pub fn little() -> Self {
        Self::new(Endianness::Little)
    }

    pub fn big() -> Self {
        Self::new(Endianness::Big)
    }
}

impl ArrayToBytesCodec for BytesCodec {
    fn name(&self) -> &'static str {
        "bytes"
    }

    fn decode(
        &self,
        bytes: Bytes,
        shape: &[u64],
        data_type: DataType,
        _fill_value: f64,
    ) -> crate::Result<TypedArray> {
        let expected = num_elements(shape) * data_type.size();
        if bytes.len() != expected {
            return Err(crate::Error::codec(format!(
                "bytes codec expected {expected} bytes for shape {shape:?} {}, got {}",
                data_type.name(),
                bytes.len()
            )));
        }
        TypedArray::from_bytes(data_type, self.endianness, &bytes)
    }

    fn encode(&self, array: &TypedArray, shape: &[u64]) -> crate::Result<Bytes> {
        debug_assert_eq!(array.num_elements(), num_elements(shape));
        Ok(array.to_bytes(self.endianness))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_both_endiannesses() {
        let array = TypedArray::UInt16(vec![1, 2, 3, 4, 5, 6]);
        for codec in [BytesCodec::little(), BytesCodec::big()] {
            let encoded = codec.encode(&array, &[2, 3]).unwrap();
            let decoded = codec
                .decode(encoded, &[2, 3], DataType::UInt16, 0.0)
                .unwrap();
            assert_eq!(decoded, array);
        }
    }

    #[test]
    fn wrong_length_is_a_codec_error() {
        let codec = BytesCodec::little();
        let err = codec.decode(Bytes::from_static(&[0, 1, 2]), &[2], DataType::UInt16, 0.0);
        assert!(err.is_err());
    }
}
