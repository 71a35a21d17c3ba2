//! Affine transforms between per-source model spaces and the render layer
//! view space.
//!
//! Transforms are immutable; a change produces a replacement value so
//! watchers can diff by equality.

use crate::coordinate_space::CoordinateSpace;
use crate::matrix::{RankedMatrix, inverse_homogeneous};

/// An affine transform from an input coordinate space (e.g. the voxel space
/// of one data source) to an output space (e.g. the global view space).
///
/// Dimensions at index `source_rank..rank` are synthetic unit-range padding
/// added to align sources of differing rank.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateSpaceTransform {
    pub rank: usize,
    pub source_rank: usize,
    pub input_space: CoordinateSpace,
    pub output_space: CoordinateSpace,
    pub transform: RankedMatrix,
}

impl CoordinateSpaceTransform {
    pub fn new(
        source_rank: usize,
        input_space: CoordinateSpace,
        output_space: CoordinateSpace,
        transform: RankedMatrix,
    ) -> crate::Result<Self> {
        let rank = transform.rank();
        if source_rank > rank {
            return Err(crate::Error::general(format!(
                "source rank {source_rank} exceeds transform rank {rank}"
            )));
        }
        if input_space.rank != rank || output_space.rank != rank {
            return Err(crate::Error::general(format!(
                "input/output spaces of ranks {}/{} do not match transform rank {rank}",
                input_space.rank, output_space.rank
            )));
        }
        Ok(Self {
            rank,
            source_rank,
            input_space,
            output_space,
            transform,
        })
    }

    pub fn identity(input_space: CoordinateSpace, output_space: CoordinateSpace) -> Self {
        let rank = input_space.rank;
        debug_assert_eq!(output_space.rank, rank);
        Self {
            rank,
            source_rank: rank,
            input_space,
            output_space,
            transform: RankedMatrix::identity(rank),
        }
    }
}

/// How a render layer's model dimensions map onto the global, local, and
/// channel coordinate spaces.
///
/// The `Some` entries of the three dimension maps partition `[0, rank)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderLayerTransform {
    pub rank: usize,
    pub global_to_render_layer_dimensions: Vec<Option<usize>>,
    pub local_to_render_layer_dimensions: Vec<Option<usize>>,
    pub channel_to_render_layer_dimensions: Vec<Option<usize>>,
    pub channel_space_shape: Vec<u64>,
    pub model_to_render_layer_transform: RankedMatrix,
}

/// Compose a layer's declared model-to-layer transform with the global,
/// local, and channel coordinate spaces.
///
/// Every output dimension name of `model_transform` must resolve to exactly
/// one of the three spaces; anything else is a configuration error.
pub fn get_render_layer_transform(
    global_space: &CoordinateSpace,
    local_space: &CoordinateSpace,
    channel_space: &CoordinateSpace,
    model_transform: &CoordinateSpaceTransform,
) -> crate::Result<RenderLayerTransform> {
    let rank = model_transform.rank;
    let mut global_map = vec![None; global_space.rank];
    let mut local_map = vec![None; local_space.rank];
    let mut channel_map = vec![None; channel_space.rank];
    for (render_dim, name) in model_transform.output_space.names.iter().enumerate() {
        let global = global_space.dimension_index(name);
        let local = local_space.dimension_index(name);
        let channel = channel_space.dimension_index(name);
        match (global, local, channel) {
            (Some(dim), None, None) => global_map[dim] = Some(render_dim),
            (None, Some(dim), None) => local_map[dim] = Some(render_dim),
            (None, None, Some(dim)) => channel_map[dim] = Some(render_dim),
            (None, None, None) => {
                return Err(crate::Error::general(format!(
                    "model dimension {name:?} is not present in the global, local, \
                     or channel coordinate space"
                )));
            }
            _ => {
                return Err(crate::Error::general(format!(
                    "model dimension {name:?} is ambiguous across coordinate spaces"
                )));
            }
        }
    }
    let channel_space_shape = channel_space
        .bounds
        .lower_bounds
        .iter()
        .zip(&channel_space.bounds.upper_bounds)
        .map(|(&lower, &upper)| {
            if lower.is_finite() && upper.is_finite() && upper > lower {
                (upper - lower) as u64
            } else {
                1
            }
        })
        .collect();
    Ok(RenderLayerTransform {
        rank,
        global_to_render_layer_dimensions: global_map,
        local_to_render_layer_dimensions: local_map,
        channel_to_render_layer_dimensions: channel_map,
        channel_space_shape,
        model_to_render_layer_transform: model_transform.transform.clone(),
    })
}

/// Chunk-to-layer transform and its inverse, supporting picking and
/// position round-trips.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkTransformParameters {
    pub chunk_to_layer_transform: RankedMatrix,
    pub layer_to_chunk_transform: RankedMatrix,
    pub determinant: f64,
}

/// Compose a subsource's chunk-to-model transform (if it uses a coordinate
/// subspace) with the layer's model transform, and invert the result.
pub fn get_chunk_transform_parameters(
    layer_transform: &RenderLayerTransform,
    chunk_to_model_transform: Option<&RankedMatrix>,
) -> crate::Result<ChunkTransformParameters> {
    let chunk_to_layer = match chunk_to_model_transform {
        Some(chunk_to_model) => layer_transform
            .model_to_render_layer_transform
            .compose(chunk_to_model),
        None => layer_transform.model_to_render_layer_transform.clone(),
    };
    let (layer_to_chunk, determinant) = chunk_to_layer.inverse();
    if determinant == 0.0 {
        return Err(crate::Error::DegenerateTransform { determinant });
    }
    Ok(ChunkTransformParameters {
        chunk_to_layer_transform: chunk_to_layer,
        layer_to_chunk_transform: layer_to_chunk,
        determinant,
    })
}

/// Projection of the ≤3-dimensional display subspace of a chunk into 4×4
/// matrices for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDisplayTransformParameters {
    /// Column-major 4×4 mapping chunk display dimensions to display space.
    pub chunk_to_display: [f64; 16],
    pub display_to_chunk: [f64; 16],
    /// Chunk dimensions spanning the display subspace, in discovery order;
    /// `None` for unused slots.
    pub chunk_display_dimension_indices: [Option<usize>; 3],
    pub num_display_dimensions: usize,
}

/// Project the layer's display dimensions (at most 3) out of the chunk
/// transform into a 4×4 matrix plus its inverse.
pub fn get_chunk_display_transform_parameters(
    chunk_transform: &ChunkTransformParameters,
    display_dimensions: &[usize],
) -> crate::Result<ChunkDisplayTransformParameters> {
    if display_dimensions.len() > 3 {
        return Err(crate::Error::general(format!(
            "at most 3 display dimensions are supported, got {}",
            display_dimensions.len()
        )));
    }
    let chunk_to_layer = &chunk_transform.chunk_to_layer_transform;
    let rank = chunk_to_layer.rank();
    let n = rank + 1;
    let data = chunk_to_layer.data();

    // Chunk dimensions with a nonzero coefficient in any display row, in
    // discovery order. Under rotation or shear a display row draws on more
    // than one chunk dimension, so the spanning set is collected across all
    // rows rather than one per row.
    let mut spanning: Vec<usize> = Vec::new();
    for &layer_dim in display_dimensions {
        for col in 0..rank {
            if data[col * n + layer_dim] != 0.0 && !spanning.contains(&col) {
                spanning.push(col);
            }
        }
    }
    if spanning.len() > 3 {
        return Err(crate::Error::general(format!(
            "display dimensions depend on {} chunk dimensions, at most 3 are supported",
            spanning.len()
        )));
    }
    let mut chunk_display_dimension_indices = [None; 3];
    for (slot, &chunk_dim) in spanning.iter().enumerate() {
        chunk_display_dimension_indices[slot] = Some(chunk_dim);
    }

    let mut chunk_to_display = [0.0; 16];
    for i in 0..4 {
        chunk_to_display[i * 4 + i] = 1.0;
    }
    for (row, &layer_dim) in display_dimensions.iter().enumerate() {
        for (col_slot, &chunk_dim) in spanning.iter().enumerate() {
            chunk_to_display[col_slot * 4 + row] = data[chunk_dim * n + layer_dim];
        }
        // Translation for this display dimension.
        chunk_to_display[3 * 4 + row] = data[rank * n + layer_dim];
    }

    let mut display_to_chunk = [0.0; 16];
    let determinant = inverse_homogeneous(&mut display_to_chunk, 3, &chunk_to_display);
    if determinant == 0.0 {
        return Err(crate::Error::DegenerateTransform { determinant });
    }
    Ok(ChunkDisplayTransformParameters {
        chunk_to_display,
        display_to_chunk,
        chunk_display_dimension_indices,
        num_display_dimensions: display_dimensions.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinate_space::{CoordinateSpaceSpec, make_coordinate_space};

    fn space(names: &[&str]) -> CoordinateSpace {
        make_coordinate_space(CoordinateSpaceSpec {
            names: names.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
        .unwrap()
    }

    fn model_transform(output_names: &[&str]) -> CoordinateSpaceTransform {
        let input_names: Vec<String> = (0..output_names.len()).map(|i| format!("d{i}")).collect();
        let input = make_coordinate_space(CoordinateSpaceSpec {
            names: input_names,
            ..Default::default()
        })
        .unwrap();
        CoordinateSpaceTransform::identity(input, space(output_names))
    }

    #[test]
    fn dimension_maps_partition_render_dimensions() {
        let transform = model_transform(&["x", "y", "c^", "l'"]);
        let layer = get_render_layer_transform(
            &space(&["x", "y", "z"]),
            &space(&["l'"]),
            &space(&["c^"]),
            &transform,
        )
        .unwrap();
        assert_eq!(
            layer.global_to_render_layer_dimensions,
            vec![Some(0), Some(1), None]
        );
        assert_eq!(layer.local_to_render_layer_dimensions, vec![Some(3)]);
        assert_eq!(layer.channel_to_render_layer_dimensions, vec![Some(2)]);

        let mut seen: Vec<usize> = layer
            .global_to_render_layer_dimensions
            .iter()
            .chain(&layer.local_to_render_layer_dimensions)
            .chain(&layer.channel_to_render_layer_dimensions)
            .flatten()
            .copied()
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn unknown_model_dimension_is_an_error() {
        let transform = model_transform(&["x", "w"]);
        let result = get_render_layer_transform(
            &space(&["x", "y"]),
            &space(&[]),
            &space(&[]),
            &transform,
        );
        assert!(result.is_err());
    }

    #[test]
    fn chunk_transform_round_trips_positions() {
        let transform = model_transform(&["x", "y"]);
        let layer =
            get_render_layer_transform(&space(&["x", "y"]), &space(&[]), &space(&[]), &transform)
                .unwrap();
        // Chunk-local transform scaling by 2 with an offset.
        let mut data = crate::matrix::create_homogeneous_identity(2);
        data[0] = 2.0;
        data[2 * 3 + 1] = 7.0;
        let chunk_to_model = RankedMatrix::from_data(2, data).unwrap();
        let params = get_chunk_transform_parameters(&layer, Some(&chunk_to_model)).unwrap();
        assert!(params.determinant != 0.0);
        let p = [3.0, 4.0];
        let layer_pos = params.chunk_to_layer_transform.transform_point(&p);
        let back = params.layer_to_chunk_transform.transform_point(&layer_pos);
        assert!((back[0] - p[0]).abs() < 1e-9);
        assert!((back[1] - p[1]).abs() < 1e-9);
    }

    #[test]
    fn degenerate_chunk_transform_is_rejected() {
        let transform = model_transform(&["x"]);
        let layer =
            get_render_layer_transform(&space(&["x"]), &space(&[]), &space(&[]), &transform)
                .unwrap();
        let singular = RankedMatrix::from_data(1, vec![0.0, 0.0, 0.0, 1.0]).unwrap();
        let result = get_chunk_transform_parameters(&layer, Some(&singular));
        assert!(matches!(
            result,
            Err(crate::Error::DegenerateTransform { .. })
        ));
    }

    #[test]
    fn display_projection_selects_backing_chunk_dimensions() {
        let transform = model_transform(&["x", "y", "z"]);
        let layer = get_render_layer_transform(
            &space(&["x", "y", "z"]),
            &space(&[]),
            &space(&[]),
            &transform,
        )
        .unwrap();
        let params = get_chunk_transform_parameters(&layer, None).unwrap();
        let display = get_chunk_display_transform_parameters(&params, &[2, 0]).unwrap();
        assert_eq!(display.num_display_dimensions, 2);
        assert_eq!(
            display.chunk_display_dimension_indices,
            [Some(2), Some(0), None]
        );
        // Unused display dimension defaults to identity.
        assert_eq!(display.chunk_to_display[2 * 4 + 2], 1.0);
    }

    #[test]
    fn display_projection_preserves_rotation() {
        let transform = model_transform(&["x", "y"]);
        let layer =
            get_render_layer_transform(&space(&["x", "y"]), &space(&[]), &space(&[]), &transform)
                .unwrap();
        // 45° rotation in the xy plane as the chunk-to-model transform.
        let (s, c) = std::f64::consts::FRAC_PI_4.sin_cos();
        let mut data = crate::matrix::create_homogeneous_identity(2);
        data[0] = c;
        data[1] = s;
        data[3] = -s;
        data[4] = c;
        let chunk_to_model = RankedMatrix::from_data(2, data).unwrap();
        let params = get_chunk_transform_parameters(&layer, Some(&chunk_to_model)).unwrap();
        let display = get_chunk_display_transform_parameters(&params, &[0, 1]).unwrap();
        assert_eq!(
            display.chunk_display_dimension_indices,
            [Some(0), Some(1), None]
        );

        // The projected 4×4 must agree with the full transform on display
        // dimensions, cross terms included.
        let expected = params.chunk_to_layer_transform.transform_point(&[1.0, 0.0]);
        let m = &display.chunk_to_display;
        let projected = [m[0] + m[3 * 4], m[1] + m[3 * 4 + 1]];
        assert!((projected[0] - expected[0]).abs() < 1e-12);
        assert!((projected[1] - expected[1]).abs() < 1e-12);

        // And the inverse must round-trip through the rotated frame.
        let inv = &display.display_to_chunk;
        let back = [
            inv[0] * projected[0] + inv[4] * projected[1] + inv[3 * 4],
            inv[1] * projected[0] + inv[5] * projected[1] + inv[3 * 4 + 1],
        ];
        assert!((back[0] - 1.0).abs() < 1e-12);
        assert!(back[1].abs() < 1e-12);
    }
}
