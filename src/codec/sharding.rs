//! The `sharding_indexed` array→bytes codec.
//!
//! A shard stores a grid of independently-encoded inner chunks plus an index
//! of `(offset, nbytes)` pairs, one per inner chunk, located at the start or
//! end of the shard. A missing inner chunk is marked by an all-ones pair and
//! decodes to the fill value. The inner chunks and the index each have their
//! own codec chain.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{
    ArrayToBytesCodec, Codec, CodecChainSpec, CodecKind, CodecMetadata, CodecPlugin,
    CodecRegistry, c_order_strides, decode_array, encode_array, num_elements,
    parse_codec_chain_spec,
};
use crate::cancellation::CancellationToken;
use crate::data_type::{DataType, TypedArray};

/// `(offset, nbytes)` pair marking an absent inner chunk.
const MISSING_CHUNK: u64 = u64::MAX;

inventory::submit! {
    CodecPlugin::new("sharding_indexed", CodecKind::ArrayToBytes, create_sharding_codec)
}

fn create_sharding_codec(
    configuration: &serde_json::Value,
    registry: &CodecRegistry,
) -> crate::Result<Codec> {
    let configuration: ShardingCodecConfiguration =
        serde_json::from_value(configuration.clone())?;
    Ok(Codec::ArrayToBytes(Arc::new(ShardingCodec::new(
        registry,
        configuration,
    )?)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexLocation {
    Start,
    #[default]
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardingCodecConfiguration {
    pub chunk_shape: Vec<u64>,
    pub codecs: Vec<CodecMetadata>,
    pub index_codecs: Vec<CodecMetadata>,
    #[serde(default)]
    pub index_location: IndexLocation,
}

#[derive(Debug, Clone)]
pub struct ShardingCodec {
    inner_chunk_shape: Vec<u64>,
    inner_chain: CodecChainSpec,
    index_chain: CodecChainSpec,
    index_location: IndexLocation,
}

impl ShardingCodec {
    pub fn new(
        registry: &CodecRegistry,
        configuration: ShardingCodecConfiguration,
    ) -> crate::Result<Self> {
        let inner_chain = parse_codec_chain_spec(
            registry,
            &configuration.codecs,
            &configuration.chunk_shape,
        )?;
        let index_chain =
            parse_codec_chain_spec(registry, &configuration.index_codecs, &[2])?;
        if !index_chain.array_to_array.is_empty() {
            return Err(crate::Error::metadata(
                "shard index codecs must not contain array->array codecs",
            ));
        }
        Ok(Self {
            inner_chunk_shape: configuration.chunk_shape,
            inner_chain,
            index_chain,
            index_location: configuration.index_location,
        })
    }

    fn grid_shape(&self, shard_shape: &[u64]) -> crate::Result<Vec<u64>> {
        if shard_shape.len() != self.inner_chunk_shape.len() {
            return Err(crate::Error::codec(format!(
                "shard of rank {} has inner chunk shape of rank {}",
                shard_shape.len(),
                self.inner_chunk_shape.len()
            )));
        }
        shard_shape
            .iter()
            .zip(&self.inner_chunk_shape)
            .map(|(&outer, &inner)| {
                if inner == 0 || outer % inner != 0 {
                    Err(crate::Error::codec(format!(
                        "inner chunk shape {:?} does not evenly divide shard shape {shard_shape:?}",
                        self.inner_chunk_shape
                    )))
                } else {
                    Ok(outer / inner)
                }
            })
            .collect()
    }

    /// Encoded byte size of the index for `num_chunks` inner chunks.
    ///
    /// Only fixed-size index bytes->bytes codecs are supported; the index
    /// must be seekable without decoding the whole shard.
    fn encoded_index_size(&self, num_chunks: usize) -> crate::Result<usize> {
        let mut size = num_chunks * 2 * size_of::<u64>();
        for codec in &self.index_chain.bytes_to_bytes {
            match codec.name() {
                "crc32c" => size += super::crc32c::CHECKSUM_SIZE,
                name => {
                    return Err(crate::Error::metadata(format!(
                        "index codec {name} does not have a fixed encoded size"
                    )));
                }
            }
        }
        Ok(size)
    }

    fn decode_index(&self, index_bytes: Bytes, grid_shape: &[u64]) -> crate::Result<Vec<u64>> {
        let mut index_shape = grid_shape.to_vec();
        index_shape.push(2);
        let decoded = decode_array(
            &self.index_chain,
            index_bytes,
            &index_shape,
            DataType::UInt64,
            0.0,
            &CancellationToken::new(),
        )?
        .expect("a fresh cancellation token is never cancelled");
        match decoded {
            TypedArray::UInt64(entries) => Ok(entries),
            other => Err(crate::Error::codec(format!(
                "shard index decoded to {} instead of uint64",
                other.data_type().name()
            ))),
        }
    }

    /// Flat destination indices of one inner chunk's elements within the
    /// shard, in the inner chunk's C order.
    fn inner_chunk_element_indices(
        &self,
        shard_shape: &[u64],
        grid_position: &[u64],
    ) -> Vec<usize> {
        let rank = shard_shape.len();
        let shard_strides = c_order_strides(shard_shape);
        let total = num_elements(&self.inner_chunk_shape);
        let mut indices = Vec::with_capacity(total);
        let mut position = vec![0u64; rank];
        for _ in 0..total {
            let mut flat = 0;
            for dim in 0..rank {
                let coordinate = grid_position[dim] * self.inner_chunk_shape[dim] + position[dim];
                flat += coordinate as usize * shard_strides[dim];
            }
            indices.push(flat);
            for dim in (0..rank).rev() {
                position[dim] += 1;
                if position[dim] < self.inner_chunk_shape[dim] {
                    break;
                }
                position[dim] = 0;
            }
        }
        indices
    }
}

impl ArrayToBytesCodec for ShardingCodec {
    fn name(&self) -> &'static str {
        "sharding_indexed"
    }

    fn decode(
        &self,
        bytes: Bytes,
        shape: &[u64],
        data_type: DataType,
        fill_value: f64,
    ) -> crate::Result<TypedArray> {
        let grid_shape = self.grid_shape(shape)?;
        let num_chunks = num_elements(&grid_shape);
        let index_size = self.encoded_index_size(num_chunks)?;
        if bytes.len() < index_size {
            return Err(crate::Error::codec(format!(
                "shard of {} bytes is smaller than its {index_size}-byte index",
                bytes.len()
            )));
        }
        let index_bytes = match self.index_location {
            IndexLocation::Start => bytes.slice(..index_size),
            IndexLocation::End => bytes.slice(bytes.len() - index_size..),
        };
        let entries = self.decode_index(index_bytes, &grid_shape)?;

        let mut out = TypedArray::filled(data_type, fill_value, num_elements(shape));
        let rank = shape.len();
        let mut grid_position = vec![0u64; rank];
        for chunk in 0..num_chunks {
            let offset = entries[chunk * 2];
            let nbytes = entries[chunk * 2 + 1];
            if offset != MISSING_CHUNK || nbytes != MISSING_CHUNK {
                let start = offset as usize;
                let end = start
                    .checked_add(nbytes as usize)
                    .filter(|&end| end <= bytes.len())
                    .ok_or_else(|| {
                        crate::Error::codec(format!(
                            "inner chunk range {offset}+{nbytes} exceeds shard of {} bytes",
                            bytes.len()
                        ))
                    })?;
                let inner = decode_array(
                    &self.inner_chain,
                    bytes.slice(start..end),
                    &self.inner_chunk_shape,
                    data_type,
                    fill_value,
                    &CancellationToken::new(),
                )?
                .expect("a fresh cancellation token is never cancelled");
                let indices = self.inner_chunk_element_indices(shape, &grid_position);
                inner.scatter_into(&mut out, &indices)?;
            }
            for dim in (0..rank).rev() {
                grid_position[dim] += 1;
                if grid_position[dim] < grid_shape[dim] {
                    break;
                }
                grid_position[dim] = 0;
            }
        }
        Ok(out)
    }

    fn encode(&self, array: &TypedArray, shape: &[u64]) -> crate::Result<Bytes> {
        let grid_shape = self.grid_shape(shape)?;
        let num_chunks = num_elements(&grid_shape);
        let index_size = self.encoded_index_size(num_chunks)?;
        let data_offset = match self.index_location {
            IndexLocation::Start => index_size as u64,
            IndexLocation::End => 0,
        };

        let mut data = Vec::new();
        let mut entries = Vec::with_capacity(num_chunks * 2);
        let rank = shape.len();
        let mut grid_position = vec![0u64; rank];
        for _ in 0..num_chunks {
            let indices = self.inner_chunk_element_indices(shape, &grid_position);
            let inner = array.gather(&indices);
            let encoded = encode_array(&self.inner_chain, &inner, &self.inner_chunk_shape)?;
            entries.push(data_offset + data.len() as u64);
            entries.push(encoded.len() as u64);
            data.extend_from_slice(&encoded);
            for dim in (0..rank).rev() {
                grid_position[dim] += 1;
                if grid_position[dim] < grid_shape[dim] {
                    break;
                }
                grid_position[dim] = 0;
            }
        }

        let mut index_shape = grid_shape.clone();
        index_shape.push(2);
        let index_bytes = encode_array(
            &self.index_chain,
            &TypedArray::UInt64(entries),
            &index_shape,
        )?;
        let mut shard = Vec::with_capacity(data.len() + index_bytes.len());
        match self.index_location {
            IndexLocation::Start => {
                shard.extend_from_slice(&index_bytes);
                shard.extend_from_slice(&data);
            }
            IndexLocation::End => {
                shard.extend_from_slice(&data);
                shard.extend_from_slice(&index_bytes);
            }
        }
        Ok(Bytes::from_owner(shard))
    }

    fn read_chunk_shape(&self, chunk_shape: &[u64]) -> Option<Vec<u64>> {
        debug_assert_eq!(chunk_shape.len(), self.inner_chunk_shape.len());
        Some(self.inner_chunk_shape.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sharding_codec(inner_shape: &[u64], index_location: IndexLocation) -> ShardingCodec {
        let registry = CodecRegistry::with_defaults();
        ShardingCodec::new(
            &registry,
            ShardingCodecConfiguration {
                chunk_shape: inner_shape.to_vec(),
                codecs: vec![CodecMetadata::new("bytes")],
                index_codecs: vec![CodecMetadata::new("bytes"), CodecMetadata::new("crc32c")],
                index_location,
            },
        )
        .unwrap()
    }

    #[test]
    fn round_trip_both_index_locations() {
        let array = TypedArray::UInt16((0..64).collect());
        for location in [IndexLocation::End, IndexLocation::Start] {
            let codec = sharding_codec(&[2, 4], location);
            let encoded = codec.encode(&array, &[4, 16]).unwrap();
            let decoded = codec
                .decode(encoded, &[4, 16], DataType::UInt16, 0.0)
                .unwrap();
            assert_eq!(decoded, array);
        }
    }

    #[test]
    fn missing_inner_chunks_decode_to_fill() {
        let codec = sharding_codec(&[2], IndexLocation::End);
        // Two inner chunks, both absent.
        let entries = TypedArray::UInt64(vec![u64::MAX; 4]);
        let index_bytes = encode_array(&codec.index_chain, &entries, &[2, 2]).unwrap();
        let decoded = codec
            .decode(index_bytes, &[4], DataType::UInt8, 9.0)
            .unwrap();
        assert_eq!(decoded, TypedArray::UInt8(vec![9; 4]));
    }

    #[test]
    fn truncated_shard_is_a_codec_error() {
        let codec = sharding_codec(&[2], IndexLocation::End);
        let result = codec.decode(Bytes::from_static(&[0, 1]), &[4], DataType::UInt8, 0.0);
        assert!(result.is_err());
    }

    #[test]
    fn exposes_inner_read_granularity() {
        let codec = sharding_codec(&[2, 4], IndexLocation::End);
        assert_eq!(codec.read_chunk_shape(&[4, 16]), Some(vec![2, 4]));
    }

    #[test]
    fn uneven_inner_shape_is_rejected() {
        let codec = sharding_codec(&[3], IndexLocation::End);
        let result = codec.decode(Bytes::new(), &[4], DataType::UInt8, 0.0);
        assert!(result.is_err());
    }
}
