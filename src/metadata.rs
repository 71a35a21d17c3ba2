//! Array and group metadata documents.
//!
//! Two on-disk generations are supported: zarr v3 (`zarr.json`, one document
//! per node) and zarr v2 (`.zarray` plus optional `.zattrs`). Either parses
//! into the normalized [ArrayMetadata], after which the rest of the pipeline
//! is generation-agnostic: v2 dtype/order/compressor fields become ordinary
//! codec chain entries.
//!
//! A group document without array metadata is a container; if its attributes
//! carry an OME-style `multiscales` declaration it describes a multiscale
//! volume whose per-scale arrays live under the declared paths.

use serde::{Deserialize, Serialize};

use crate::chunk_key_encoding::ChunkKeyEncoding;
use crate::codec::CodecMetadata;
use crate::data_type::{DataType, Endianness};

/// Normalized, generation-independent array description. Parsed once per
/// array resource and immutable thereafter.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayMetadata {
    pub rank: usize,
    pub shape: Vec<u64>,
    pub chunk_shape: Vec<u64>,
    pub data_type: DataType,
    /// Value synthesized for missing chunks; non-numeric metadata fill
    /// values collapse to `0`.
    pub fill_value: f64,
    pub chunk_key_encoding: ChunkKeyEncoding,
    pub codecs: Vec<CodecMetadata>,
    pub dimension_names: Option<Vec<String>>,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl ArrayMetadata {
    fn validate(self) -> crate::Result<Self> {
        if self.chunk_shape.len() != self.rank {
            return Err(crate::Error::metadata(format!(
                "chunk shape {:?} does not match array rank {}",
                self.chunk_shape, self.rank
            )));
        }
        if self.chunk_shape.iter().any(|&extent| extent == 0) {
            return Err(crate::Error::metadata(format!(
                "chunk shape {:?} contains a zero extent",
                self.chunk_shape
            )));
        }
        if let Some(names) = &self.dimension_names {
            if names.len() != self.rank {
                return Err(crate::Error::metadata(format!(
                    "dimension names {names:?} do not match array rank {}",
                    self.rank
                )));
            }
        }
        Ok(self)
    }
}

/// Parsed node metadata: an array, or a group (potential multiscale
/// container).
#[derive(Debug, Clone)]
pub enum NodeMetadata {
    Array(ArrayMetadata),
    Group {
        attributes: serde_json::Map<String, serde_json::Value>,
    },
}

// ---------------------------------------------------------------------------
// zarr v3
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "lowercase")]
pub enum ZarrV3NodeMetadata {
    Array(ZarrV3ArrayMetadata),
    Group(ZarrV3GroupMetadata),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZarrV3GroupMetadata {
    pub zarr_format: u32,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZarrV3ArrayMetadata {
    pub zarr_format: u32,
    pub shape: Vec<u64>,
    pub data_type: String,
    pub chunk_grid: ChunkGridMetadata,
    #[serde(default)]
    pub chunk_key_encoding: Option<ChunkKeyEncodingMetadata>,
    pub fill_value: serde_json::Value,
    pub codecs: Vec<CodecMetadata>,
    #[serde(default)]
    pub dimension_names: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkGridMetadata {
    pub name: String,
    pub configuration: ChunkGridConfiguration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkGridConfiguration {
    pub chunk_shape: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkKeyEncodingMetadata {
    pub name: String,
    #[serde(default)]
    pub configuration: ChunkKeyEncodingConfiguration,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChunkKeyEncodingConfiguration {
    #[serde(default)]
    pub separator: Option<String>,
}

fn fill_value_to_number(value: &serde_json::Value) -> f64 {
    match value {
        serde_json::Value::Number(number) => number.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => match s.as_str() {
            "NaN" => f64::NAN,
            "Infinity" => f64::INFINITY,
            "-Infinity" => f64::NEG_INFINITY,
            _ => 0.0,
        },
        _ => 0.0,
    }
}

fn parse_separator(separator: Option<&str>, default: char) -> crate::Result<char> {
    match separator {
        None => Ok(default),
        Some(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c @ ('/' | '.')), None) => Ok(c),
                _ => Err(crate::Error::metadata(format!(
                    "invalid dimension separator {s:?}"
                ))),
            }
        }
    }
}

impl TryFrom<ZarrV3ArrayMetadata> for ArrayMetadata {
    type Error = crate::Error;

    fn try_from(value: ZarrV3ArrayMetadata) -> Result<Self, Self::Error> {
        if value.zarr_format != 3 {
            return Err(crate::Error::metadata(format!(
                "expected zarr_format 3, got {}",
                value.zarr_format
            )));
        }
        if value.chunk_grid.name != "regular" {
            return Err(crate::Error::metadata(format!(
                "unsupported chunk grid: {}",
                value.chunk_grid.name
            )));
        }
        let (encoding_name, separator) = match &value.chunk_key_encoding {
            Some(encoding) => (
                encoding.name.as_str(),
                parse_separator(encoding.configuration.separator.as_deref(), '/')?,
            ),
            None => ("default", '/'),
        };
        let chunk_key_encoding = ChunkKeyEncoding::from_name(encoding_name, separator)?;
        let dimension_names = value.dimension_names.map(|names| {
            names
                .into_iter()
                .enumerate()
                .map(|(dim, name)| name.unwrap_or_else(|| format!("d{dim}")))
                .collect()
        });
        ArrayMetadata {
            rank: value.shape.len(),
            shape: value.shape,
            chunk_shape: value.chunk_grid.configuration.chunk_shape,
            data_type: DataType::from_v3_name(&value.data_type)?,
            fill_value: fill_value_to_number(&value.fill_value),
            chunk_key_encoding,
            codecs: value.codecs,
            dimension_names,
            attributes: value.attributes,
        }
        .validate()
    }
}

/// Parse a v3 `zarr.json` document into normalized node metadata.
pub fn parse_v3_node_metadata(document: &[u8]) -> crate::Result<NodeMetadata> {
    let node: ZarrV3NodeMetadata = serde_json::from_slice(document)?;
    match node {
        ZarrV3NodeMetadata::Array(array) => Ok(NodeMetadata::Array(array.try_into()?)),
        ZarrV3NodeMetadata::Group(group) => Ok(NodeMetadata::Group {
            attributes: group.attributes,
        }),
    }
}

// ---------------------------------------------------------------------------
// zarr v2
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZarrV2ArrayMetadata {
    pub zarr_format: u32,
    pub shape: Vec<u64>,
    pub chunks: Vec<u64>,
    pub dtype: String,
    #[serde(default)]
    pub compressor: Option<ZarrV2Compressor>,
    #[serde(default)]
    pub fill_value: Option<serde_json::Value>,
    pub order: String,
    #[serde(default)]
    pub dimension_separator: Option<String>,
    #[serde(default)]
    pub filters: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZarrV2Compressor {
    pub id: String,
    #[serde(flatten)]
    pub configuration: serde_json::Map<String, serde_json::Value>,
}

impl ZarrV2Compressor {
    fn to_codec_metadata(&self) -> crate::Result<CodecMetadata> {
        let level = self
            .configuration
            .get("level")
            .or_else(|| self.configuration.get("clevel"))
            .and_then(serde_json::Value::as_i64);
        let entry = match self.id.as_str() {
            "zlib" => CodecMetadata::with_configuration(
                "zlib",
                serde_json::json!({"level": level.unwrap_or(6).clamp(0, 9)}),
            ),
            "gzip" => CodecMetadata::with_configuration(
                "gzip",
                serde_json::json!({"level": level.unwrap_or(6).clamp(0, 9)}),
            ),
            "zstd" => CodecMetadata::with_configuration(
                "zstd",
                serde_json::json!({"level": level.unwrap_or(0)}),
            ),
            id => {
                return Err(crate::Error::metadata(format!(
                    "unsupported v2 compressor: {id}"
                )));
            }
        };
        Ok(entry)
    }
}

/// Parse a v2 `.zarray` document (plus optional `.zattrs`) into the
/// normalized form. An explicit `separator` overrides the document's
/// `dimension_separator` (data-source URL query parameter).
pub fn parse_v2_array_metadata(
    zarray: &[u8],
    zattrs: Option<&[u8]>,
    separator_override: Option<char>,
) -> crate::Result<ArrayMetadata> {
    let value: ZarrV2ArrayMetadata = serde_json::from_slice(zarray)?;
    if value.zarr_format != 2 {
        return Err(crate::Error::metadata(format!(
            "expected zarr_format 2, got {}",
            value.zarr_format
        )));
    }
    if let Some(filters) = &value.filters {
        if !filters.is_empty() {
            return Err(crate::Error::metadata("v2 filters are not supported"));
        }
    }
    let (data_type, endianness) = DataType::from_v2_dtype(&value.dtype)?;
    let rank = value.shape.len();

    let mut codecs = Vec::new();
    match value.order.as_str() {
        "C" => {}
        "F" => {
            // Fortran order stores dimensions reversed; expressed as a
            // transpose codec so the decode pipeline needs no special case.
            let order: Vec<usize> = (0..rank).rev().collect();
            codecs.push(CodecMetadata::with_configuration(
                "transpose",
                serde_json::json!({"order": order}),
            ));
        }
        order => {
            return Err(crate::Error::metadata(format!(
                "invalid v2 order: {order:?}"
            )));
        }
    }
    codecs.push(CodecMetadata::with_configuration(
        "bytes",
        serde_json::json!({
            "endian": match endianness {
                Endianness::Little => "little",
                Endianness::Big => "big",
            }
        }),
    ));
    if let Some(compressor) = &value.compressor {
        codecs.push(compressor.to_codec_metadata()?);
    }

    let separator = match separator_override {
        Some(separator) => separator,
        None => parse_separator(value.dimension_separator.as_deref(), '.')?,
    };
    let attributes = match zattrs {
        Some(document) => serde_json::from_slice(document)?,
        None => serde_json::Map::new(),
    };
    ArrayMetadata {
        rank,
        shape: value.shape,
        chunk_shape: value.chunks,
        data_type,
        fill_value: value
            .fill_value
            .as_ref()
            .map(fill_value_to_number)
            .unwrap_or(0.0),
        chunk_key_encoding: ChunkKeyEncoding::V2 { separator },
        codecs,
        dimension_names: None,
        attributes,
    }
    .validate()
}

/// Extract a `dimension_separator` override from a data-source URL query
/// string.
pub fn dimension_separator_from_query(url: &str) -> crate::Result<Option<char>> {
    let Some((_, query)) = url.split_once('?') else {
        return Ok(None);
    };
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key == "dimension_separator" {
            return parse_separator(Some(value), '.').map(Some);
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// OME multiscale declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct OmeAxis {
    pub name: String,
    #[serde(default, rename = "type")]
    pub axis_type: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OmeCoordinateTransformation {
    Scale { scale: Vec<f64> },
    Translation { translation: Vec<f64> },
}

#[derive(Debug, Clone, Deserialize)]
pub struct OmeDataset {
    pub path: String,
    #[serde(default, rename = "coordinateTransformations")]
    pub coordinate_transformations: Vec<OmeCoordinateTransformation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OmeMultiscale {
    pub axes: Vec<OmeAxis>,
    pub datasets: Vec<OmeDataset>,
}

impl OmeDataset {
    /// Per-dimension `(scale, translation)` for this resolution level.
    pub fn scale_and_translation(&self, rank: usize) -> crate::Result<(Vec<f64>, Vec<f64>)> {
        let mut scale = vec![1.0; rank];
        let mut translation = vec![0.0; rank];
        for transformation in &self.coordinate_transformations {
            match transformation {
                OmeCoordinateTransformation::Scale { scale: s } => {
                    if s.len() != rank {
                        return Err(crate::Error::metadata(format!(
                            "scale of length {} does not match rank {rank}",
                            s.len()
                        )));
                    }
                    scale.clone_from(s);
                }
                OmeCoordinateTransformation::Translation { translation: t } => {
                    if t.len() != rank {
                        return Err(crate::Error::metadata(format!(
                            "translation of length {} does not match rank {rank}",
                            t.len()
                        )));
                    }
                    translation.clone_from(t);
                }
            }
        }
        Ok((scale, translation))
    }
}

/// Inspect group attributes for an OME-style multiscale declaration.
pub fn parse_ome_multiscales(
    attributes: &serde_json::Map<String, serde_json::Value>,
) -> crate::Result<Option<Vec<OmeMultiscale>>> {
    let Some(value) = attributes
        .get("multiscales")
        .or_else(|| attributes.get("ome").and_then(|ome| ome.get("multiscales")))
    else {
        return Ok(None);
    };
    let multiscales: Vec<OmeMultiscale> = serde_json::from_value(value.clone())?;
    Ok(Some(multiscales))
}
