//! The `transpose` array→array codec: axis permutation.
//!
//! Configuration `{"order": [..]}`: encoded dimension `i` stores decoded
//! dimension `order[i]`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ArrayToArrayCodec, Codec, CodecKind, CodecPlugin, CodecRegistry, c_order_strides};
use crate::data_type::TypedArray;

inventory::submit! {
    CodecPlugin::new("transpose", CodecKind::ArrayToArray, create_transpose_codec)
}

fn create_transpose_codec(
    configuration: &serde_json::Value,
    _registry: &CodecRegistry,
) -> crate::Result<Codec> {
    let configuration: TransposeCodecConfiguration =
        serde_json::from_value(configuration.clone())?;
    Ok(Codec::ArrayToArray(Arc::new(TransposeCodec::new(
        configuration.order,
    )?)))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransposeCodecConfiguration {
    pub order: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct TransposeCodec {
    order: Vec<usize>,
}

impl TransposeCodec {
    pub fn new(order: Vec<usize>) -> crate::Result<Self> {
        let rank = order.len();
        let mut seen = vec![false; rank];
        for &dim in &order {
            if dim >= rank || seen[dim] {
                return Err(crate::Error::metadata(format!(
                    "transpose order {order:?} is not a permutation of 0..{rank}"
                )));
            }
            seen[dim] = true;
        }
        Ok(Self { order })
    }

    fn check_rank(&self, decoded_shape: &[u64]) -> crate::Result<()> {
        if decoded_shape.len() != self.order.len() {
            return Err(crate::Error::codec(format!(
                "transpose order has rank {}, array has rank {}",
                self.order.len(),
                decoded_shape.len()
            )));
        }
        Ok(())
    }

    /// Gather indices mapping a C-order destination of `dst_shape` from a
    /// C-order source, where destination dimension `j` reads source
    /// dimension `src_dim[j]`.
    fn gather_indices(dst_shape: &[u64], src_shape: &[u64], src_dim: &[usize]) -> Vec<usize> {
        let rank = dst_shape.len();
        let src_strides = c_order_strides(src_shape);
        let total: usize = dst_shape.iter().map(|&n| n as usize).product();
        let mut indices = Vec::with_capacity(total);
        let mut position = vec![0u64; rank];
        for _ in 0..total {
            let mut src_index = 0;
            for (j, &p) in position.iter().enumerate() {
                src_index += p as usize * src_strides[src_dim[j]];
            }
            indices.push(src_index);
            for dim in (0..rank).rev() {
                position[dim] += 1;
                if position[dim] < dst_shape[dim] {
                    break;
                }
                position[dim] = 0;
            }
        }
        indices
    }
}

impl ArrayToArrayCodec for TransposeCodec {
    fn name(&self) -> &'static str {
        "transpose"
    }

    fn decode(&self, array: TypedArray, decoded_shape: &[u64]) -> crate::Result<TypedArray> {
        self.check_rank(decoded_shape)?;
        let encoded_shape = self.encoded_shape(decoded_shape);
        // Decoded dimension order[i] was stored as encoded dimension i.
        let mut src_dim = vec![0; self.order.len()];
        for (encoded, &decoded) in self.order.iter().enumerate() {
            src_dim[decoded] = encoded;
        }
        let indices = Self::gather_indices(decoded_shape, &encoded_shape, &src_dim);
        Ok(array.gather(&indices))
    }

    fn encode(&self, array: TypedArray, decoded_shape: &[u64]) -> crate::Result<TypedArray> {
        self.check_rank(decoded_shape)?;
        let encoded_shape = self.encoded_shape(decoded_shape);
        let indices = Self::gather_indices(&encoded_shape, decoded_shape, &self.order);
        Ok(array.gather(&indices))
    }

    fn encoded_shape(&self, decoded_shape: &[u64]) -> Vec<u64> {
        self.order.iter().map(|&dim| decoded_shape[dim]).collect()
    }

    fn physical_to_logical(&self, rank: usize) -> Option<Vec<usize>> {
        debug_assert_eq!(rank, self.order.len());
        Some(self.order.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_permutations() {
        assert!(TransposeCodec::new(vec![0, 0]).is_err());
        assert!(TransposeCodec::new(vec![0, 2]).is_err());
    }

    #[test]
    fn encode_permutes_and_decode_restores() {
        // 2x3 C-order array.
        let array = TypedArray::UInt8(vec![1, 2, 3, 4, 5, 6]);
        let codec = TransposeCodec::new(vec![1, 0]).unwrap();
        let encoded = codec.encode(array.clone(), &[2, 3]).unwrap();
        // Transposed 3x2: columns become rows.
        assert_eq!(encoded, TypedArray::UInt8(vec![1, 4, 2, 5, 3, 6]));
        let decoded = codec.decode(encoded, &[2, 3]).unwrap();
        assert_eq!(decoded, array);
    }

    #[test]
    fn three_dimensional_round_trip() {
        let array = TypedArray::UInt8((0..24).collect());
        let codec = TransposeCodec::new(vec![2, 0, 1]).unwrap();
        let shape = [2, 3, 4];
        assert_eq!(codec.encoded_shape(&shape), vec![4, 2, 3]);
        let encoded = codec.encode(array.clone(), &shape).unwrap();
        let decoded = codec.decode(encoded, &shape).unwrap();
        assert_eq!(decoded, array);
    }
}
