//! Codec chains: ordered, named, reversible byte- and array-level
//! transforms applied to raw chunk bytes to produce a typed array.
//!
//! A chain has three ordered lists keyed by kind: array→array codecs, exactly
//! one array→bytes codec, and bytes→bytes codecs. Decoding unwinds an encode
//! pipeline, so bytes→bytes and array→array codecs run in *reverse*
//! registration order.
//!
//! Codec implementations register themselves under a name via
//! [`inventory::submit!`] of a [CodecPlugin]; a [CodecRegistry] collects the
//! submitted plugins (or is populated explicitly for test isolation) and is
//! injected into chain resolution.

pub mod bytes;
pub mod crc32c;
pub mod gzip;
pub mod sharding;
pub mod transpose;
pub mod zstd;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use ::bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::cancellation::CancellationToken;
use crate::data_type::{DataType, TypedArray};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    ArrayToArray,
    ArrayToBytes,
    BytesToBytes,
}

impl CodecKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArrayToArray => "array_to_array",
            Self::ArrayToBytes => "array_to_bytes",
            Self::BytesToBytes => "bytes_to_bytes",
        }
    }
}

/// A byte-level transform (compression, checksum). Must be order-preserving
/// and idempotent on well-formed input.
pub trait BytesToBytesCodec: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(&self, bytes: Bytes) -> crate::Result<Bytes>;

    /// Forward transform, used by encode paths and round-trip tests.
    fn encode(&self, bytes: Bytes) -> crate::Result<Bytes>;
}

/// The pivot of a chain: materializes decompressed bytes into a typed array
/// of the stated shape.
pub trait ArrayToBytesCodec: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(
        &self,
        bytes: Bytes,
        shape: &[u64],
        data_type: DataType,
        fill_value: f64,
    ) -> crate::Result<TypedArray>;

    fn encode(&self, array: &TypedArray, shape: &[u64]) -> crate::Result<Bytes>;

    /// The codec's nominal read granularity, if it differs from the stored
    /// chunk shape (e.g. the inner chunks of a sharded layout). Shapes are in
    /// the codec's input dimension order.
    fn read_chunk_shape(&self, chunk_shape: &[u64]) -> Option<Vec<u64>> {
        let _ = chunk_shape;
        None
    }
}

/// A typed-array-to-typed-array transform (e.g. axis transposition).
pub trait ArrayToArrayCodec: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Decode from the encoded layout back to `decoded_shape` (C order).
    fn decode(&self, array: TypedArray, decoded_shape: &[u64]) -> crate::Result<TypedArray>;

    fn encode(&self, array: TypedArray, decoded_shape: &[u64]) -> crate::Result<TypedArray>;

    /// Shape of the encoded array for a given decoded shape.
    fn encoded_shape(&self, decoded_shape: &[u64]) -> Vec<u64> {
        decoded_shape.to_vec()
    }

    /// Permutation mapping encoded (physical) dimensions to decoded
    /// (logical) dimensions, if this codec permutes dimensions.
    fn physical_to_logical(&self, rank: usize) -> Option<Vec<usize>> {
        let _ = rank;
        None
    }
}

/// A resolved codec of any kind.
#[derive(Debug, Clone)]
pub enum Codec {
    ArrayToArray(Arc<dyn ArrayToArrayCodec>),
    ArrayToBytes(Arc<dyn ArrayToBytesCodec>),
    BytesToBytes(Arc<dyn BytesToBytesCodec>),
}

impl Codec {
    pub fn kind(&self) -> CodecKind {
        match self {
            Self::ArrayToArray(_) => CodecKind::ArrayToArray,
            Self::ArrayToBytes(_) => CodecKind::ArrayToBytes,
            Self::BytesToBytes(_) => CodecKind::BytesToBytes,
        }
    }
}

/// A metadata-declared codec chain entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecMetadata {
    pub name: String,
    #[serde(default)]
    pub configuration: serde_json::Value,
}

impl CodecMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            configuration: serde_json::Value::Null,
        }
    }

    pub fn with_configuration(
        name: impl Into<String>,
        configuration: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            configuration,
        }
    }
}

type CreateCodecFn = fn(&serde_json::Value, &CodecRegistry) -> crate::Result<Codec>;

/// An inventory-submitted codec registration.
pub struct CodecPlugin {
    pub name: &'static str,
    pub kind: CodecKind,
    pub create: CreateCodecFn,
}

inventory::collect!(CodecPlugin);

impl CodecPlugin {
    pub const fn new(name: &'static str, kind: CodecKind, create: CreateCodecFn) -> Self {
        Self { name, kind, create }
    }
}

/// Process-wide codec name resolution, write-once-per-name.
///
/// Constructed once at startup (usually via [CodecRegistry::with_defaults])
/// and injected into chain resolution; tests may build a fresh registry with
/// only the codecs under test.
pub struct CodecRegistry {
    factories: HashMap<&'static str, (CodecKind, CreateCodecFn)>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// All codecs submitted through [`inventory::submit!`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for plugin in inventory::iter::<CodecPlugin> {
            if let Err(err) = registry.register(plugin.name, plugin.kind, plugin.create) {
                log::error!("conflicting codec plugin registration: {err}");
            }
        }
        registry
    }

    /// Re-registering a name is a programming error, reported rather than
    /// silently overwritten.
    pub fn register(
        &mut self,
        name: &'static str,
        kind: CodecKind,
        create: CreateCodecFn,
    ) -> crate::Result<()> {
        if let Some((existing_kind, _)) = self.factories.get(name) {
            return Err(crate::Error::DuplicateCodec {
                name: name.into(),
                kind: existing_kind.as_str(),
            });
        }
        self.factories.insert(name, (kind, create));
        Ok(())
    }

    pub fn create(&self, name: &str, configuration: &serde_json::Value) -> crate::Result<Codec> {
        let (_, create) = self
            .factories
            .get(name)
            .ok_or_else(|| crate::Error::UnknownCodec { name: name.into() })?;
        create(configuration, self)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Chunk layout facts derived during chain resolution, needed later for
/// chunk key derivation.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecLayoutInfo {
    /// Maps physical (iteration-order) dimensions to logical (metadata-order)
    /// dimensions.
    pub physical_to_logical_dimension: Vec<usize>,
    /// Nominal read granularity per logical dimension; equals the stored
    /// chunk shape unless an array→bytes codec reads at a finer grain.
    pub read_chunk_shape: Vec<u64>,
}

/// A validated, resolved codec chain.
#[derive(Debug, Clone)]
pub struct CodecChainSpec {
    pub array_to_array: Vec<Arc<dyn ArrayToArrayCodec>>,
    pub array_to_bytes: Arc<dyn ArrayToBytesCodec>,
    pub bytes_to_bytes: Vec<Arc<dyn BytesToBytesCodec>>,
    pub layout_info: CodecLayoutInfo,
}

/// Resolve a metadata-declared codec list against a registry.
///
/// Validates ordering (array→array before the single array→bytes codec,
/// bytes→bytes after it) and derives [CodecLayoutInfo] for the given chunk
/// shape. An unregistered name is a fatal configuration error.
pub fn parse_codec_chain_spec(
    registry: &CodecRegistry,
    entries: &[CodecMetadata],
    chunk_shape: &[u64],
) -> crate::Result<CodecChainSpec> {
    let mut array_to_array: Vec<Arc<dyn ArrayToArrayCodec>> = Vec::new();
    let mut array_to_bytes: Option<Arc<dyn ArrayToBytesCodec>> = None;
    let mut bytes_to_bytes: Vec<Arc<dyn BytesToBytesCodec>> = Vec::new();
    for entry in entries {
        match registry.create(&entry.name, &entry.configuration)? {
            Codec::ArrayToArray(codec) => {
                if array_to_bytes.is_some() {
                    return Err(crate::Error::metadata(format!(
                        "array->array codec {} appears after the array->bytes codec",
                        entry.name
                    )));
                }
                array_to_array.push(codec);
            }
            Codec::ArrayToBytes(codec) => {
                if array_to_bytes.is_some() {
                    return Err(crate::Error::metadata(
                        "codec chain contains more than one array->bytes codec",
                    ));
                }
                array_to_bytes = Some(codec);
            }
            Codec::BytesToBytes(codec) => {
                if array_to_bytes.is_none() {
                    return Err(crate::Error::metadata(format!(
                        "bytes->bytes codec {} appears before the array->bytes codec",
                        entry.name
                    )));
                }
                bytes_to_bytes.push(codec);
            }
        }
    }
    let array_to_bytes = array_to_bytes.ok_or_else(|| {
        crate::Error::metadata("codec chain must contain exactly one array->bytes codec")
    })?;

    let rank = chunk_shape.len();
    let mut physical_to_logical: Vec<usize> = (0..rank).collect();
    let mut physical_chunk_shape = chunk_shape.to_vec();
    for codec in &array_to_array {
        if let Some(perm) = codec.physical_to_logical(rank) {
            if perm.len() != rank {
                return Err(crate::Error::metadata(format!(
                    "codec {} permutation has length {}, expected rank {rank}",
                    codec.name(),
                    perm.len()
                )));
            }
            physical_to_logical = perm.iter().map(|&i| physical_to_logical[i]).collect();
        }
        physical_chunk_shape = codec.encoded_shape(&physical_chunk_shape);
    }
    let read_chunk_shape = match array_to_bytes.read_chunk_shape(&physical_chunk_shape) {
        Some(physical_read_shape) => {
            // Map the codec's physical-order read shape back to logical order.
            let mut logical = vec![0; rank];
            for (physical_dim, &extent) in physical_read_shape.iter().enumerate() {
                logical[physical_to_logical[physical_dim]] = extent;
            }
            logical
        }
        None => chunk_shape.to_vec(),
    };

    Ok(CodecChainSpec {
        array_to_array,
        array_to_bytes,
        bytes_to_bytes,
        layout_info: CodecLayoutInfo {
            physical_to_logical_dimension: physical_to_logical,
            read_chunk_shape,
        },
    })
}

/// Decode raw chunk bytes through a resolved chain.
///
/// Returns `Ok(None)` if cancellation is observed between stages; no partial
/// result escapes in that case.
pub fn decode_array(
    chain: &CodecChainSpec,
    bytes: Bytes,
    decoded_shape: &[u64],
    data_type: DataType,
    fill_value: f64,
    cancel: &CancellationToken,
) -> crate::Result<Option<TypedArray>> {
    // Shape after each array->array encode stage; the last entry is the
    // shape the array->bytes codec decodes to.
    let mut stage_shapes = Vec::with_capacity(chain.array_to_array.len() + 1);
    stage_shapes.push(decoded_shape.to_vec());
    for codec in &chain.array_to_array {
        let shape = codec.encoded_shape(stage_shapes.last().expect("nonempty"));
        stage_shapes.push(shape);
    }

    let mut bytes = bytes;
    for codec in chain.bytes_to_bytes.iter().rev() {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        bytes = codec.decode(bytes)?;
    }
    if cancel.is_cancelled() {
        return Ok(None);
    }
    let mut array = chain.array_to_bytes.decode(
        bytes,
        stage_shapes.last().expect("nonempty"),
        data_type,
        fill_value,
    )?;
    for (codec, shape) in chain
        .array_to_array
        .iter()
        .zip(&stage_shapes)
        .rev()
    {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        array = codec.decode(array, shape)?;
    }
    if cancel.is_cancelled() {
        return Ok(None);
    }
    Ok(Some(array))
}

/// Run a chain's forward transforms. Backs write paths and the round-trip
/// tests.
pub fn encode_array(
    chain: &CodecChainSpec,
    array: &TypedArray,
    decoded_shape: &[u64],
) -> crate::Result<Bytes> {
    let mut array = array.clone();
    let mut shape = decoded_shape.to_vec();
    for codec in &chain.array_to_array {
        array = codec.encode(array, &shape)?;
        shape = codec.encoded_shape(&shape);
    }
    let mut bytes = chain.array_to_bytes.encode(&array, &shape)?;
    for codec in &chain.bytes_to_bytes {
        bytes = codec.encode(bytes)?;
    }
    Ok(bytes)
}

/// Element count of a C-order array of the given shape.
pub fn num_elements(shape: &[u64]) -> usize {
    shape.iter().map(|&n| n as usize).product()
}

/// C-order (row-major) strides in elements.
pub(crate) fn c_order_strides(shape: &[u64]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for dim in (0..shape.len().saturating_sub(1)).rev() {
        strides[dim] = strides[dim + 1] * shape[dim + 1] as usize;
    }
    strides
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> CodecRegistry {
        CodecRegistry::with_defaults()
    }

    #[test]
    fn default_registry_resolves_builtin_codecs() {
        let registry = test_registry();
        let cases = [
            ("bytes", serde_json::json!({"endian": "little"})),
            ("transpose", serde_json::json!({"order": [1, 0]})),
            ("gzip", serde_json::json!({"level": 5})),
            ("zlib", serde_json::Value::Null),
            ("zstd", serde_json::json!({"level": 3})),
            ("crc32c", serde_json::Value::Null),
            (
                "sharding_indexed",
                serde_json::json!({
                    "chunk_shape": [2, 2],
                    "codecs": [{"name": "bytes"}],
                    "index_codecs": [{"name": "bytes"}, {"name": "crc32c"}],
                }),
            ),
        ];
        for (name, configuration) in cases {
            registry
                .create(name, &configuration)
                .unwrap_or_else(|err| panic!("codec {name} should resolve: {err}"));
        }
    }

    #[test]
    fn unknown_codec_name_is_fatal() {
        let registry = test_registry();
        let entries = [CodecMetadata::new("nonexistent")];
        let err = parse_codec_chain_spec(&registry, &entries, &[4]).unwrap_err();
        assert!(matches!(err, crate::Error::UnknownCodec { .. }));
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut registry = CodecRegistry::new();
        fn create(_: &serde_json::Value, _: &CodecRegistry) -> crate::Result<Codec> {
            unreachable!()
        }
        registry
            .register("example", CodecKind::BytesToBytes, create)
            .unwrap();
        let err = registry
            .register("example", CodecKind::BytesToBytes, create)
            .unwrap_err();
        assert!(matches!(err, crate::Error::DuplicateCodec { .. }));
    }

    #[test]
    fn chain_requires_exactly_one_array_to_bytes_codec() {
        let registry = test_registry();
        let err = parse_codec_chain_spec(&registry, &[CodecMetadata::new("gzip")], &[4]);
        assert!(err.is_err());
        let err = parse_codec_chain_spec(
            &registry,
            &[CodecMetadata::new("bytes"), CodecMetadata::new("bytes")],
            &[4],
        );
        assert!(err.is_err());
    }

    #[test]
    fn bytes_to_bytes_before_pivot_is_rejected() {
        let registry = test_registry();
        let err = parse_codec_chain_spec(
            &registry,
            &[CodecMetadata::new("gzip"), CodecMetadata::new("bytes")],
            &[4],
        );
        assert!(err.is_err());
    }

    #[test]
    fn layout_info_defaults_to_identity() {
        let registry = test_registry();
        let chain =
            parse_codec_chain_spec(&registry, &[CodecMetadata::new("bytes")], &[2, 3, 4]).unwrap();
        assert_eq!(
            chain.layout_info.physical_to_logical_dimension,
            vec![0, 1, 2]
        );
        assert_eq!(chain.layout_info.read_chunk_shape, vec![2, 3, 4]);
    }

    #[test]
    fn strides_are_row_major() {
        assert_eq!(c_order_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(c_order_strides(&[]), Vec::<usize>::new());
    }
}
