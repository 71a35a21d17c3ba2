//! Derivation of storage keys from chunk grid positions.
//!
//! Two conventions exist on disk: the default `"c"`-prefixed form
//! (`c/2/0/1`) and the legacy v2 form joining coordinates directly
//! (`2/0/1`, or `2.0.1` with a `.` separator; `"0"` for rank-0 arrays).

use crate::codec::CodecLayoutInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKeyEncoding {
    Default { separator: char },
    V2 { separator: char },
}

impl ChunkKeyEncoding {
    pub fn from_name(name: &str, separator: char) -> crate::Result<Self> {
        match name {
            "default" => Ok(Self::Default { separator }),
            "v2" => Ok(Self::V2 { separator }),
            other => Err(crate::Error::metadata(format!(
                "unknown chunk key encoding: {other}"
            ))),
        }
    }

    pub fn separator(&self) -> char {
        match self {
            Self::Default { separator } | Self::V2 { separator } => *separator,
        }
    }

    /// Derive the storage key for a chunk grid position.
    ///
    /// `grid_position` is in physical iteration order; each coordinate is
    /// mapped back to its logical dimension and scaled by the ratio of the
    /// codec's nominal read-chunk shape to the stored chunk shape, so that
    /// codecs whose read granularity is finer than the stored chunk (e.g.
    /// sharding) address the containing stored object.
    pub fn encode(
        &self,
        grid_position: &[u64],
        layout: &CodecLayoutInfo,
        chunk_shape: &[u64],
    ) -> String {
        let rank = grid_position.len();
        debug_assert_eq!(layout.physical_to_logical_dimension.len(), rank);
        let mut coordinates = vec![0u64; rank];
        for (physical, &position) in grid_position.iter().enumerate() {
            let logical = layout.physical_to_logical_dimension[physical];
            coordinates[logical] =
                position * layout.read_chunk_shape[logical] / chunk_shape[logical];
        }
        match self {
            Self::Default { separator } => {
                let mut key = String::from("c");
                for coordinate in &coordinates {
                    key.push(*separator);
                    key.push_str(&coordinate.to_string());
                }
                key
            }
            Self::V2 { separator } => {
                if coordinates.is_empty() {
                    return "0".to_string();
                }
                coordinates
                    .iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join(&separator.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_layout(chunk_shape: &[u64]) -> CodecLayoutInfo {
        CodecLayoutInfo {
            physical_to_logical_dimension: (0..chunk_shape.len()).collect(),
            read_chunk_shape: chunk_shape.to_vec(),
        }
    }

    #[test]
    fn default_encoding_prefixes_c() {
        let encoding = ChunkKeyEncoding::Default { separator: '/' };
        let layout = identity_layout(&[5, 5, 5]);
        assert_eq!(
            encoding.encode(&[2, 0, 1], &layout, &[5, 5, 5]),
            "c/2/0/1"
        );
    }

    #[test]
    fn v2_encoding_is_flat() {
        let encoding = ChunkKeyEncoding::V2 { separator: '.' };
        let layout = identity_layout(&[4, 4]);
        assert_eq!(encoding.encode(&[3, 7], &layout, &[4, 4]), "3.7");
    }

    #[test]
    fn rank_zero_keys() {
        let layout = identity_layout(&[]);
        assert_eq!(
            ChunkKeyEncoding::V2 { separator: '.' }.encode(&[], &layout, &[]),
            "0"
        );
        assert_eq!(
            ChunkKeyEncoding::Default { separator: '/' }.encode(&[], &layout, &[]),
            "c"
        );
    }

    #[test]
    fn read_chunk_ratio_scales_coordinates() {
        // Sharded layout: stored chunks of 4, read granularity 2. Read
        // chunk 3 lives in stored chunk 1.
        let encoding = ChunkKeyEncoding::Default { separator: '/' };
        let layout = CodecLayoutInfo {
            physical_to_logical_dimension: vec![0],
            read_chunk_shape: vec![2],
        };
        assert_eq!(encoding.encode(&[3], &layout, &[4]), "c/1");
    }

    #[test]
    fn physical_to_logical_mapping_reorders_coordinates() {
        let encoding = ChunkKeyEncoding::Default { separator: '/' };
        let layout = CodecLayoutInfo {
            physical_to_logical_dimension: vec![2, 0, 1],
            read_chunk_shape: vec![1, 1, 1],
        };
        // Physical position (a, b, c) maps to logical (b, c, a).
        assert_eq!(
            encoding.encode(&[10, 20, 30], &layout, &[1, 1, 1]),
            "c/20/30/10"
        );
    }

    #[test]
    fn unknown_encoding_name_is_rejected() {
        assert!(ChunkKeyEncoding::from_name("default", '/').is_ok());
        assert!(ChunkKeyEncoding::from_name("n5", '/').is_err());
    }
}
