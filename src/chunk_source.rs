//! Per-chunk fetch/decode pipeline and multiscale source resolution.
//!
//! A [VolumeChunkSource] owns one resolution level: it derives the storage
//! key for a chunk grid position, fetches the bytes through the injected
//! [ByteReader], and decodes them through the resolved codec chain. Missing
//! bytes and decode failures never surface to the caller as errors; the
//! chunk is filled with the array's fill value and an optional listener is
//! told, so rendering degrades instead of stalling.

use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::codec::{self, CodecChainSpec, CodecRegistry};
use crate::data_type::{DataType, TypedArray};
use crate::matrix::{RankedMatrix, permutation_matrix, side};
use crate::metadata::ArrayMetadata;
use crate::storage::ByteReader;

/// Progression of a single chunk request. Fill-value chunks stay at
/// `BytesMissing`, so consumers can tell real data from degraded data.
/// Requests that observe cancellation stop without reaching `Decoded` and
/// leave no other trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Requested,
    KeyComputed,
    BytesFetched,
    BytesMissing,
    Decoded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeChunk {
    /// Grid position in physical iteration order.
    pub chunk_grid_position: Vec<u64>,
    /// Extent of the decoded buffer per logical dimension.
    pub chunk_data_size: Vec<u64>,
    pub state: ChunkState,
    pub data: TypedArray,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MissingChunkNotification {
    /// `"<scale level>/<chunk key>"`.
    pub key: String,
    pub data_size: Vec<u64>,
}

pub type MissingChunkListener = Box<dyn Fn(&MissingChunkNotification) + Send + Sync>;

/// Chunk source for one resolution level of a volume.
pub struct VolumeChunkSource {
    metadata: ArrayMetadata,
    chain: CodecChainSpec,
    reader: Arc<dyn ByteReader>,
    level: usize,
    missing_chunk_listener: Option<MissingChunkListener>,
}

impl VolumeChunkSource {
    /// Resolve the metadata's codec chain against `registry`. An
    /// unregistered codec name is a fatal configuration error.
    pub fn new(
        metadata: ArrayMetadata,
        registry: &CodecRegistry,
        reader: Arc<dyn ByteReader>,
        level: usize,
    ) -> crate::Result<Self> {
        let chain = codec::parse_codec_chain_spec(registry, &metadata.codecs, &metadata.chunk_shape)?;
        Ok(Self {
            metadata,
            chain,
            reader,
            level,
            missing_chunk_listener: None,
        })
    }

    pub fn set_missing_chunk_listener(&mut self, listener: MissingChunkListener) {
        self.missing_chunk_listener = Some(listener);
    }

    pub fn metadata(&self) -> &ArrayMetadata {
        &self.metadata
    }

    /// Decoded extent of each chunk, per logical dimension. This is the
    /// codec's read granularity, which is finer than the stored chunk shape
    /// for sharded layouts.
    pub fn chunk_data_size(&self) -> &[u64] {
        &self.chain.layout_info.read_chunk_shape
    }

    fn notify_missing(&self, key: &str) {
        if let Some(listener) = &self.missing_chunk_listener {
            listener(&MissingChunkNotification {
                key: format!("{}/{key}", self.level),
                data_size: self.chunk_data_size().to_vec(),
            });
        }
    }

    fn fill_chunk(&self, grid_position: &[u64]) -> VolumeChunk {
        let data_size = self.chunk_data_size().to_vec();
        let data = TypedArray::filled(
            self.metadata.data_type,
            self.metadata.fill_value,
            codec::num_elements(&data_size),
        );
        VolumeChunk {
            chunk_grid_position: grid_position.to_vec(),
            chunk_data_size: data_size,
            state: ChunkState::BytesMissing,
            data,
        }
    }

    /// Fetch and decode one chunk.
    ///
    /// Returns `Ok(None)` when `cancel` is observed; a cancelled request
    /// notifies no listener and leaves no state behind. Missing bytes and
    /// decode failures produce a fill-value chunk plus exactly one
    /// missing-chunk notification.
    pub fn fetch_chunk(
        &self,
        grid_position: &[u64],
        cancel: &CancellationToken,
    ) -> crate::Result<Option<VolumeChunk>> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let mut state = ChunkState::Requested;
        log::trace!("chunk {grid_position:?}: {state:?}");
        let key = self.metadata.chunk_key_encoding.encode(
            grid_position,
            &self.chain.layout_info,
            &self.metadata.chunk_shape,
        );
        state = ChunkState::KeyComputed;
        log::trace!("chunk {grid_position:?}: {state:?}, key {key:?}");
        let response = match self.reader.read(&key) {
            Ok(response) => response,
            Err(err) => {
                log::warn!("read of chunk {key:?} failed: {err}");
                None
            }
        };
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let Some(response) = response else {
            log::debug!("chunk {key:?} missing, filling with {}", self.metadata.fill_value);
            self.notify_missing(&key);
            return Ok(Some(self.fill_chunk(grid_position)));
        };
        state = ChunkState::BytesFetched;
        log::trace!("chunk {grid_position:?}: {state:?}, {} bytes", response.data.len());
        let decoded = codec::decode_array(
            &self.chain,
            response.data,
            &self.metadata.chunk_shape,
            self.metadata.data_type,
            self.metadata.fill_value,
            cancel,
        );
        let array = match decoded {
            Ok(Some(array)) => array,
            Ok(None) => return Ok(None),
            Err(err) => {
                log::warn!("decode of chunk {key:?} failed: {err}");
                self.notify_missing(&key);
                return Ok(Some(self.fill_chunk(grid_position)));
            }
        };
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let data = self.extract_read_chunk(grid_position, array);
        state = ChunkState::Decoded;
        Ok(Some(VolumeChunk {
            chunk_grid_position: grid_position.to_vec(),
            chunk_data_size: self.chunk_data_size().to_vec(),
            state,
            data,
        }))
    }

    /// When the codec's read granularity is finer than the stored chunk
    /// (sharding), the chain decodes the whole stored object; pull out the
    /// requested read-chunk subarray.
    fn extract_read_chunk(&self, grid_position: &[u64], array: TypedArray) -> TypedArray {
        let chunk_shape = &self.metadata.chunk_shape;
        let read_shape = &self.chain.layout_info.read_chunk_shape;
        if read_shape == chunk_shape {
            return array;
        }
        let rank = chunk_shape.len();
        let mut inner_position = vec![0u64; rank];
        for (physical, &position) in grid_position.iter().enumerate() {
            let logical = self.chain.layout_info.physical_to_logical_dimension[physical];
            inner_position[logical] = position % (chunk_shape[logical] / read_shape[logical]);
        }
        array.gather(&read_chunk_element_indices(
            chunk_shape,
            read_shape,
            &inner_position,
        ))
    }
}

impl std::fmt::Debug for VolumeChunkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeChunkSource")
            .field("level", &self.level)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Element indices of the read chunk at `inner_position` within a decoded
/// stored chunk, in C order.
fn read_chunk_element_indices(
    chunk_shape: &[u64],
    read_shape: &[u64],
    inner_position: &[u64],
) -> Vec<usize> {
    let rank = chunk_shape.len();
    let strides = codec::c_order_strides(chunk_shape);
    let count = codec::num_elements(read_shape);
    let mut indices = Vec::with_capacity(count);
    let mut local = vec![0u64; rank];
    for _ in 0..count {
        let mut index = 0usize;
        for dim in 0..rank {
            index += (inner_position[dim] * read_shape[dim] + local[dim]) as usize * strides[dim];
        }
        indices.push(index);
        for dim in (0..rank).rev() {
            local[dim] += 1;
            if local[dim] < read_shape[dim] {
                break;
            }
            local[dim] = 0;
        }
    }
    indices
}

/// One resolution level of a multiscale volume: its array metadata plus the
/// affine transform from that level's voxel space into the shared model
/// space.
#[derive(Debug, Clone)]
pub struct ScaleLevel {
    pub metadata: ArrayMetadata,
    pub transform: RankedMatrix,
}

/// Diagonal-scale-plus-translation affine, the form declared by multiscale
/// metadata.
pub fn scale_translation_transform(scale: &[f64], translation: &[f64]) -> RankedMatrix {
    debug_assert_eq!(scale.len(), translation.len());
    let rank = scale.len();
    let n = side(rank);
    let mut data = vec![0.0; n * n];
    for dim in 0..rank {
        data[dim * n + dim] = scale[dim];
        data[rank * n + dim] = translation[dim];
    }
    data[rank * n + rank] = 1.0;
    RankedMatrix::from_data(rank, data).expect("buffer length matches the rank by construction")
}

/// Fully resolved description of one scale, ready for a consumer that walks
/// chunks in physical iteration order.
pub struct VolumeSourceSpecification {
    /// Read-chunk shape in physical iteration order.
    pub chunk_shape: Vec<u64>,
    /// Array shape in physical iteration order.
    pub data_shape: Vec<u64>,
    /// Physical voxel coordinates to model space.
    pub transform: RankedMatrix,
    pub source: VolumeChunkSource,
}

/// A multiscale volume: one array per resolution level, all sharing rank
/// and data type, each carrying its own transform into model space.
#[derive(Debug, Clone)]
pub struct MultiscaleVolumeChunkSource {
    scales: Vec<ScaleLevel>,
}

impl MultiscaleVolumeChunkSource {
    /// Rank and data type must agree across levels; disagreement is a
    /// configuration error in the source dataset.
    pub fn new(scales: Vec<ScaleLevel>) -> crate::Result<Self> {
        let Some(first) = scales.first() else {
            return Err(crate::Error::metadata(
                "multiscale volume declares no scale levels",
            ));
        };
        for (level, scale) in scales.iter().enumerate().skip(1) {
            if scale.metadata.rank != first.metadata.rank {
                return Err(crate::Error::metadata(format!(
                    "scale level {level} has rank {}, level 0 has rank {}",
                    scale.metadata.rank, first.metadata.rank
                )));
            }
            if scale.metadata.data_type != first.metadata.data_type {
                return Err(crate::Error::metadata(format!(
                    "scale level {level} has data type {}, level 0 has {}",
                    scale.metadata.data_type.name(),
                    first.metadata.data_type.name()
                )));
            }
        }
        Ok(Self { scales })
    }

    pub fn rank(&self) -> usize {
        self.scales[0].metadata.rank
    }

    pub fn data_type(&self) -> DataType {
        self.scales[0].metadata.data_type
    }

    pub fn scales(&self) -> &[ScaleLevel] {
        &self.scales
    }

    /// Construct one chunk source per scale level.
    ///
    /// Shapes are reordered into the codec chain's physical iteration
    /// order, and each level's transform is composed with the matching
    /// permutation so chunks from every resolution project into model space
    /// consistently.
    pub fn get_sources(
        &self,
        registry: &CodecRegistry,
        reader: Arc<dyn ByteReader>,
    ) -> crate::Result<Vec<VolumeSourceSpecification>> {
        let rank = self.rank();
        let mut specifications = Vec::with_capacity(self.scales.len());
        for (level, scale) in self.scales.iter().enumerate() {
            let source =
                VolumeChunkSource::new(scale.metadata.clone(), registry, reader.clone(), level)?;
            let physical_to_logical = &source.chain.layout_info.physical_to_logical_dimension;
            let chunk_shape: Vec<u64> = physical_to_logical
                .iter()
                .map(|&logical| source.chain.layout_info.read_chunk_shape[logical])
                .collect();
            let data_shape: Vec<u64> = physical_to_logical
                .iter()
                .map(|&logical| scale.metadata.shape[logical])
                .collect();
            // Physical -> logical as a matrix: output dimension l reads
            // input dimension p where physical_to_logical[p] == l.
            let mut logical_to_physical = vec![0usize; rank];
            for (physical, &logical) in physical_to_logical.iter().enumerate() {
                logical_to_physical[logical] = physical;
            }
            let permutation =
                RankedMatrix::from_data(rank, permutation_matrix(&logical_to_physical))?;
            let transform = scale.transform.compose(&permutation);
            specifications.push(VolumeSourceSpecification {
                chunk_shape,
                data_shape,
                transform,
                source,
            });
        }
        Ok(specifications)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::chunk_key_encoding::ChunkKeyEncoding;
    use crate::codec::CodecMetadata;
    use crate::storage::MemoryStore;

    fn uint8_metadata(shape: Vec<u64>, chunk_shape: Vec<u64>, fill_value: f64) -> ArrayMetadata {
        ArrayMetadata {
            rank: shape.len(),
            shape,
            chunk_shape,
            data_type: DataType::UInt8,
            fill_value,
            chunk_key_encoding: ChunkKeyEncoding::Default { separator: '/' },
            codecs: vec![CodecMetadata::with_configuration(
                "bytes",
                serde_json::json!({"endian": "little"}),
            )],
            dimension_names: None,
            attributes: serde_json::Map::new(),
        }
    }

    fn collecting_listener() -> (MissingChunkListener, Arc<Mutex<Vec<MissingChunkNotification>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: MissingChunkListener = Box::new(move |notification| {
            sink.lock().unwrap().push(notification.clone());
        });
        (listener, seen)
    }

    #[test]
    fn present_chunk_decodes() {
        let mut store = MemoryStore::new();
        store.insert("c/1/0", bytes::Bytes::from(vec![1u8, 2, 3, 4]));
        let source = VolumeChunkSource::new(
            uint8_metadata(vec![4, 2], vec![2, 2], 0.0),
            &CodecRegistry::with_defaults(),
            Arc::new(store),
            0,
        )
        .unwrap();
        let chunk = source
            .fetch_chunk(&[1, 0], &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(chunk.state, ChunkState::Decoded);
        assert_eq!(chunk.chunk_data_size, vec![2, 2]);
        assert_eq!(chunk.data, TypedArray::UInt8(vec![1, 2, 3, 4]));
    }

    #[test]
    fn missing_chunk_fills_and_notifies_once() {
        let mut source = VolumeChunkSource::new(
            uint8_metadata(vec![8, 8, 8], vec![4, 4, 4], 7.0),
            &CodecRegistry::with_defaults(),
            Arc::new(MemoryStore::new()),
            2,
        )
        .unwrap();
        let (listener, seen) = collecting_listener();
        source.set_missing_chunk_listener(listener);
        let chunk = source
            .fetch_chunk(&[0, 1, 0], &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(chunk.state, ChunkState::BytesMissing);
        assert_eq!(chunk.data, TypedArray::UInt8(vec![7; 64]));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].key, "2/c/0/1/0");
        assert_eq!(seen[0].data_size, vec![4, 4, 4]);
    }

    #[test]
    fn corrupt_chunk_is_treated_as_missing() {
        let mut store = MemoryStore::new();
        // Wrong length for a 2x2 uint8 chunk.
        store.insert("c/0/0", bytes::Bytes::from(vec![1u8, 2, 3]));
        let mut source = VolumeChunkSource::new(
            uint8_metadata(vec![2, 2], vec![2, 2], 5.0),
            &CodecRegistry::with_defaults(),
            Arc::new(store),
            0,
        )
        .unwrap();
        let (listener, seen) = collecting_listener();
        source.set_missing_chunk_listener(listener);
        let chunk = source
            .fetch_chunk(&[0, 0], &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(chunk.state, ChunkState::BytesMissing);
        assert_eq!(chunk.data, TypedArray::UInt8(vec![5; 4]));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn cancelled_request_returns_none_without_notifying() {
        let mut source = VolumeChunkSource::new(
            uint8_metadata(vec![4], vec![2], 0.0),
            &CodecRegistry::with_defaults(),
            Arc::new(MemoryStore::new()),
            0,
        )
        .unwrap();
        let (listener, seen) = collecting_listener();
        source.set_missing_chunk_listener(listener);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(source.fetch_chunk(&[0], &cancel).unwrap().is_none());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn sharded_source_extracts_read_chunks() {
        let registry = CodecRegistry::with_defaults();
        let metadata = ArrayMetadata {
            rank: 1,
            shape: vec![4],
            chunk_shape: vec![4],
            data_type: DataType::UInt8,
            fill_value: 0.0,
            chunk_key_encoding: ChunkKeyEncoding::Default { separator: '/' },
            codecs: vec![CodecMetadata::with_configuration(
                "sharding_indexed",
                serde_json::json!({
                    "chunk_shape": [2],
                    "codecs": [{"name": "bytes", "configuration": {"endian": "little"}}],
                    "index_codecs": [
                        {"name": "bytes", "configuration": {"endian": "little"}},
                        {"name": "crc32c"},
                    ],
                }),
            )],
            dimension_names: None,
            attributes: serde_json::Map::new(),
        };
        let chain =
            codec::parse_codec_chain_spec(&registry, &metadata.codecs, &metadata.chunk_shape)
                .unwrap();
        let shard =
            codec::encode_array(&chain, &TypedArray::UInt8(vec![10, 11, 12, 13]), &[4]).unwrap();
        let mut store = MemoryStore::new();
        store.insert("c/0", shard);
        let source =
            VolumeChunkSource::new(metadata, &registry, Arc::new(store), 0).unwrap();
        assert_eq!(source.chunk_data_size(), &[2]);
        // Read-chunk grid position 1 lives in stored chunk 0.
        let chunk = source
            .fetch_chunk(&[1], &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(chunk.data, TypedArray::UInt8(vec![12, 13]));
        let chunk = source
            .fetch_chunk(&[0], &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(chunk.data, TypedArray::UInt8(vec![10, 11]));
    }

    #[test]
    fn multiscale_levels_must_agree_on_rank_and_dtype() {
        let identity = RankedMatrix::identity(2);
        let level0 = ScaleLevel {
            metadata: uint8_metadata(vec![8, 8], vec![4, 4], 0.0),
            transform: identity.clone(),
        };
        let mismatched = ScaleLevel {
            metadata: uint8_metadata(vec![4, 4, 4], vec![2, 2, 2], 0.0),
            transform: RankedMatrix::identity(3),
        };
        assert!(MultiscaleVolumeChunkSource::new(vec![level0.clone()]).is_ok());
        assert!(MultiscaleVolumeChunkSource::new(vec![level0, mismatched]).is_err());
        assert!(MultiscaleVolumeChunkSource::new(Vec::new()).is_err());
    }

    #[test]
    fn get_sources_carries_per_scale_transforms() {
        let scales = vec![
            ScaleLevel {
                metadata: uint8_metadata(vec![8, 8], vec![4, 4], 0.0),
                transform: scale_translation_transform(&[8.0, 8.0], &[0.0, 0.0]),
            },
            ScaleLevel {
                metadata: uint8_metadata(vec![4, 4], vec![2, 2], 0.0),
                transform: scale_translation_transform(&[16.0, 16.0], &[4.0, 4.0]),
            },
        ];
        let multiscale = MultiscaleVolumeChunkSource::new(scales).unwrap();
        let sources = multiscale
            .get_sources(&CodecRegistry::with_defaults(), Arc::new(MemoryStore::new()))
            .unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].chunk_shape, vec![4, 4]);
        assert_eq!(sources[0].data_shape, vec![8, 8]);
        // Voxel (1, 1) at each level lands at a level-dependent model point.
        assert_eq!(sources[0].transform.transform_point(&[1.0, 1.0]), vec![8.0, 8.0]);
        assert_eq!(
            sources[1].transform.transform_point(&[1.0, 1.0]),
            vec![20.0, 20.0]
        );
    }
}
