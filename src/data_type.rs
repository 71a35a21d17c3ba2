//! Element data types and decoded chunk buffers.

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    UInt64,
    Int64,
    Float32,
    Float64,
}

impl DataType {
    /// Parse a zarr v3 data type name.
    pub fn from_v3_name(name: &str) -> crate::Result<Self> {
        let out = match name {
            "uint8" => Self::UInt8,
            "int8" => Self::Int8,
            "uint16" => Self::UInt16,
            "int16" => Self::Int16,
            "uint32" => Self::UInt32,
            "int32" => Self::Int32,
            "uint64" => Self::UInt64,
            "int64" => Self::Int64,
            "float32" => Self::Float32,
            "float64" => Self::Float64,
            s => {
                return Err(crate::Error::metadata(format!(
                    "unsupported data type: {s}"
                )));
            }
        };
        Ok(out)
    }

    /// Parse a zarr v2 dtype string such as `"<u2"`, `"|u1"`, `">f4"`.
    ///
    /// Single-byte types report [Endianness::Little]; the distinction is
    /// immaterial for them.
    pub fn from_v2_dtype(dtype: &str) -> crate::Result<(Self, Endianness)> {
        let mut chars = dtype.chars();
        let order = chars.next();
        let endianness = match order {
            Some('<') | Some('|') => Endianness::Little,
            Some('>') => Endianness::Big,
            _ => {
                return Err(crate::Error::metadata(format!(
                    "invalid dtype byte order in {dtype:?}"
                )));
            }
        };
        let data_type = match chars.as_str() {
            "u1" => Self::UInt8,
            "i1" => Self::Int8,
            "u2" => Self::UInt16,
            "i2" => Self::Int16,
            "u4" => Self::UInt32,
            "i4" => Self::Int32,
            "u8" => Self::UInt64,
            "i8" => Self::Int64,
            "f4" => Self::Float32,
            "f8" => Self::Float64,
            s => {
                return Err(crate::Error::metadata(format!(
                    "unsupported dtype kind {s:?} in {dtype:?}"
                )));
            }
        };
        Ok((data_type, endianness))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::UInt8 => "uint8",
            Self::Int8 => "int8",
            Self::UInt16 => "uint16",
            Self::Int16 => "int16",
            Self::UInt32 => "uint32",
            Self::Int32 => "int32",
            Self::UInt64 => "uint64",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// Element size in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 => 1,
            Self::UInt16 | Self::Int16 => 2,
            Self::UInt32 | Self::Int32 | Self::Float32 => 4,
            Self::UInt64 | Self::Int64 | Self::Float64 => 8,
        }
    }
}

/// A decoded, contiguous chunk buffer typed per [DataType].
#[derive(Debug, Clone, PartialEq)]
pub enum TypedArray {
    UInt8(Vec<u8>),
    Int8(Vec<i8>),
    UInt16(Vec<u16>),
    Int16(Vec<i16>),
    UInt32(Vec<u32>),
    Int32(Vec<i32>),
    UInt64(Vec<u64>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

macro_rules! for_each_variant {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            TypedArray::UInt8($inner) => $body,
            TypedArray::Int8($inner) => $body,
            TypedArray::UInt16($inner) => $body,
            TypedArray::Int16($inner) => $body,
            TypedArray::UInt32($inner) => $body,
            TypedArray::Int32($inner) => $body,
            TypedArray::UInt64($inner) => $body,
            TypedArray::Int64($inner) => $body,
            TypedArray::Float32($inner) => $body,
            TypedArray::Float64($inner) => $body,
        }
    };
}

macro_rules! map_variant {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            TypedArray::UInt8($inner) => TypedArray::UInt8($body),
            TypedArray::Int8($inner) => TypedArray::Int8($body),
            TypedArray::UInt16($inner) => TypedArray::UInt16($body),
            TypedArray::Int16($inner) => TypedArray::Int16($body),
            TypedArray::UInt32($inner) => TypedArray::UInt32($body),
            TypedArray::Int32($inner) => TypedArray::Int32($body),
            TypedArray::UInt64($inner) => TypedArray::UInt64($body),
            TypedArray::Int64($inner) => TypedArray::Int64($body),
            TypedArray::Float32($inner) => TypedArray::Float32($body),
            TypedArray::Float64($inner) => TypedArray::Float64($body),
        }
    };
}

macro_rules! for_each_variant_pair {
    ($a:expr, $b:expr, ($x:ident, $y:ident) => $body:expr, $mismatch:expr) => {
        match ($a, $b) {
            (TypedArray::UInt8($x), TypedArray::UInt8($y)) => $body,
            (TypedArray::Int8($x), TypedArray::Int8($y)) => $body,
            (TypedArray::UInt16($x), TypedArray::UInt16($y)) => $body,
            (TypedArray::Int16($x), TypedArray::Int16($y)) => $body,
            (TypedArray::UInt32($x), TypedArray::UInt32($y)) => $body,
            (TypedArray::Int32($x), TypedArray::Int32($y)) => $body,
            (TypedArray::UInt64($x), TypedArray::UInt64($y)) => $body,
            (TypedArray::Int64($x), TypedArray::Int64($y)) => $body,
            (TypedArray::Float32($x), TypedArray::Float32($y)) => $body,
            (TypedArray::Float64($x), TypedArray::Float64($y)) => $body,
            _ => $mismatch,
        }
    };
}

macro_rules! decode_elements {
    ($bytes:expr, $endianness:expr, $ty:ty, $variant:ident) => {{
        const SIZE: usize = size_of::<$ty>();
        let elements = $bytes
            .chunks_exact(SIZE)
            .map(|chunk| {
                let arr: [u8; SIZE] = chunk.try_into().expect("chunks_exact yields exact slices");
                match $endianness {
                    Endianness::Little => <$ty>::from_le_bytes(arr),
                    Endianness::Big => <$ty>::from_be_bytes(arr),
                }
            })
            .collect();
        TypedArray::$variant(elements)
    }};
}

macro_rules! encode_elements {
    ($values:expr, $endianness:expr) => {
        $values
            .iter()
            .flat_map(|v| match $endianness {
                Endianness::Little => v.to_le_bytes(),
                Endianness::Big => v.to_be_bytes(),
            })
            .collect()
    };
}

impl TypedArray {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::UInt8(_) => DataType::UInt8,
            Self::Int8(_) => DataType::Int8,
            Self::UInt16(_) => DataType::UInt16,
            Self::Int16(_) => DataType::Int16,
            Self::UInt32(_) => DataType::UInt32,
            Self::Int32(_) => DataType::Int32,
            Self::UInt64(_) => DataType::UInt64,
            Self::Int64(_) => DataType::Int64,
            Self::Float32(_) => DataType::Float32,
            Self::Float64(_) => DataType::Float64,
        }
    }

    pub fn num_elements(&self) -> usize {
        for_each_variant!(self, v => v.len())
    }

    /// Materialize a typed buffer from raw element bytes.
    ///
    /// The byte length must be an exact multiple of the element size.
    pub fn from_bytes(
        data_type: DataType,
        endianness: Endianness,
        bytes: &[u8],
    ) -> crate::Result<Self> {
        if bytes.len() % data_type.size() != 0 {
            return Err(crate::Error::codec(format!(
                "byte length {} is not a multiple of {} element size {}",
                bytes.len(),
                data_type.name(),
                data_type.size()
            )));
        }
        let out = match data_type {
            DataType::UInt8 => Self::UInt8(bytes.to_vec()),
            DataType::Int8 => Self::Int8(bytes.iter().map(|&b| b as i8).collect()),
            DataType::UInt16 => decode_elements!(bytes, endianness, u16, UInt16),
            DataType::Int16 => decode_elements!(bytes, endianness, i16, Int16),
            DataType::UInt32 => decode_elements!(bytes, endianness, u32, UInt32),
            DataType::Int32 => decode_elements!(bytes, endianness, i32, Int32),
            DataType::UInt64 => decode_elements!(bytes, endianness, u64, UInt64),
            DataType::Int64 => decode_elements!(bytes, endianness, i64, Int64),
            DataType::Float32 => decode_elements!(bytes, endianness, f32, Float32),
            DataType::Float64 => decode_elements!(bytes, endianness, f64, Float64),
        };
        Ok(out)
    }

    /// Serialize back to element bytes. Used by encode paths and tests.
    pub fn to_bytes(&self, endianness: Endianness) -> Bytes {
        let out: Vec<u8> = match self {
            Self::UInt8(v) => v.clone(),
            Self::Int8(v) => v.iter().map(|&b| b as u8).collect(),
            Self::UInt16(v) => encode_elements!(v, endianness),
            Self::Int16(v) => encode_elements!(v, endianness),
            Self::UInt32(v) => encode_elements!(v, endianness),
            Self::Int32(v) => encode_elements!(v, endianness),
            Self::UInt64(v) => encode_elements!(v, endianness),
            Self::Int64(v) => encode_elements!(v, endianness),
            Self::Float32(v) => encode_elements!(v, endianness),
            Self::Float64(v) => encode_elements!(v, endianness),
        };
        Bytes::from_owner(out)
    }

    /// Reindex: `out[k] = self[indices[k]]`.
    ///
    /// Backs axis permutation and subarray extraction.
    pub fn gather(&self, indices: &[usize]) -> TypedArray {
        map_variant!(self, v => indices.iter().map(|&i| v[i]).collect())
    }

    /// Write `self[k]` into `dst[dst_indices[k]]`. Fails on a type mismatch.
    pub fn scatter_into(&self, dst: &mut TypedArray, dst_indices: &[usize]) -> crate::Result<()> {
        let (src_type, dst_type) = (self.data_type(), dst.data_type());
        for_each_variant_pair!(self, dst, (src, out) => {
            for (k, &dst_index) in dst_indices.iter().enumerate() {
                out[dst_index] = src[k];
            }
            Ok(())
        }, Err(crate::Error::codec(format!(
            "cannot scatter {} elements into {} buffer",
            src_type.name(),
            dst_type.name()
        ))))
    }

    /// A buffer of `num_elements` copies of `fill_value`, cast to the type.
    pub fn filled(data_type: DataType, fill_value: f64, num_elements: usize) -> Self {
        match data_type {
            DataType::UInt8 => Self::UInt8(vec![fill_value as u8; num_elements]),
            DataType::Int8 => Self::Int8(vec![fill_value as i8; num_elements]),
            DataType::UInt16 => Self::UInt16(vec![fill_value as u16; num_elements]),
            DataType::Int16 => Self::Int16(vec![fill_value as i16; num_elements]),
            DataType::UInt32 => Self::UInt32(vec![fill_value as u32; num_elements]),
            DataType::Int32 => Self::Int32(vec![fill_value as i32; num_elements]),
            DataType::UInt64 => Self::UInt64(vec![fill_value as u64; num_elements]),
            DataType::Int64 => Self::Int64(vec![fill_value as i64; num_elements]),
            DataType::Float32 => Self::Float32(vec![fill_value as f32; num_elements]),
            DataType::Float64 => Self::Float64(vec![fill_value; num_elements]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v3_names_round_trip() {
        for name in [
            "uint8", "int8", "uint16", "int16", "uint32", "int32", "uint64", "int64", "float32",
            "float64",
        ] {
            let dt = DataType::from_v3_name(name).unwrap();
            assert_eq!(dt.name(), name);
        }
        assert!(DataType::from_v3_name("complex64").is_err());
    }

    #[test]
    fn v2_dtype_strings() {
        assert_eq!(
            DataType::from_v2_dtype("|u1").unwrap(),
            (DataType::UInt8, Endianness::Little)
        );
        assert_eq!(
            DataType::from_v2_dtype("<u2").unwrap(),
            (DataType::UInt16, Endianness::Little)
        );
        assert_eq!(
            DataType::from_v2_dtype(">f4").unwrap(),
            (DataType::Float32, Endianness::Big)
        );
        assert!(DataType::from_v2_dtype("u2").is_err());
    }

    #[test]
    fn endian_materialization() {
        let bytes = [0x01, 0x02, 0x03, 0x04];
        let le = TypedArray::from_bytes(DataType::UInt16, Endianness::Little, &bytes).unwrap();
        assert_eq!(le, TypedArray::UInt16(vec![0x0201, 0x0403]));
        let be = TypedArray::from_bytes(DataType::UInt16, Endianness::Big, &bytes).unwrap();
        assert_eq!(be, TypedArray::UInt16(vec![0x0102, 0x0304]));
        assert_eq!(le.to_bytes(Endianness::Little).as_ref(), &bytes);
    }

    #[test]
    fn misaligned_bytes_rejected() {
        assert!(TypedArray::from_bytes(DataType::UInt32, Endianness::Little, &[0, 1, 2]).is_err());
    }

    #[test]
    fn fill_casts_to_type() {
        assert_eq!(
            TypedArray::filled(DataType::UInt8, 7.0, 3),
            TypedArray::UInt8(vec![7, 7, 7])
        );
        assert_eq!(
            TypedArray::filled(DataType::Float32, 0.5, 2),
            TypedArray::Float32(vec![0.5, 0.5])
        );
    }
}
