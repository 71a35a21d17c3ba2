//! Coordinate spaces: named, scaled, unit-bearing dimensions with combined
//! bounds derived from per-source bounding boxes.
//!
//! Spaces are immutable value snapshots compared structurally; any change
//! produces a new space via [make_coordinate_space].

use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque dimension identifier, stable across combiner merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DimensionId(u64);

static NEXT_DIMENSION_ID: AtomicU64 = AtomicU64::new(1);

impl DimensionId {
    pub fn next() -> Self {
        Self(NEXT_DIMENSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Dimension-name namespaces: a trailing `'` marks a layer-local dimension
/// and a trailing `^` a channel dimension; everything else is global.
pub fn is_local_dimension(name: &str) -> bool {
    name.ends_with('\'')
}

pub fn is_channel_dimension(name: &str) -> bool {
    name.ends_with('^')
}

pub fn is_global_dimension(name: &str) -> bool {
    !is_local_dimension(name) && !is_channel_dimension(name)
}

/// Axis-aligned box in some input rank.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub lower_bounds: Vec<f64>,
    pub upper_bounds: Vec<f64>,
}

/// A bounding box plus the affine transform mapping its input rank into a
/// target space.
///
/// `transform` is column-major with `output_rank` rows and `input_rank + 1`
/// columns; the final column is the translation. Element `(row, col)` lives
/// at `col * output_rank + row`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedBoundingBox {
    pub bounding_box: BoundingBox,
    pub input_rank: usize,
    pub output_rank: usize,
    pub transform: Vec<f64>,
}

impl TransformedBoundingBox {
    /// An identity-transformed box (input rank == output rank).
    pub fn axis_aligned(lower_bounds: Vec<f64>, upper_bounds: Vec<f64>) -> Self {
        let rank = lower_bounds.len();
        debug_assert_eq!(upper_bounds.len(), rank);
        let mut transform = vec![0.0; (rank + 1) * rank];
        for i in 0..rank {
            transform[i * rank + i] = 1.0;
        }
        Self {
            bounding_box: BoundingBox {
                lower_bounds,
                upper_bounds,
            },
            input_rank: rank,
            output_rank: rank,
            transform,
        }
    }

    fn coefficient(&self, row: usize, col: usize) -> f64 {
        self.transform[col * self.output_rank + row]
    }

    /// Map the box through its transform, returning `(lower, upper)` per
    /// output dimension, or `None` for output dimensions with no coefficient.
    fn mapped_interval(&self, output_dim: usize) -> Option<(f64, f64)> {
        let mut lower = self.coefficient(output_dim, self.input_rank);
        let mut upper = lower;
        let mut any = false;
        for input_dim in 0..self.input_rank {
            let c = self.coefficient(output_dim, input_dim);
            if c == 0.0 {
                continue;
            }
            any = true;
            let a = c * self.bounding_box.lower_bounds[input_dim];
            let b = c * self.bounding_box.upper_bounds[input_dim];
            lower += a.min(b);
            upper += a.max(b);
        }
        any.then_some((lower, upper))
    }
}

/// Combined per-dimension bounds plus the voxel-center convention flag.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateSpaceBounds {
    pub lower_bounds: Vec<f64>,
    pub upper_bounds: Vec<f64>,
    /// If true for a dimension, voxel centers sit on integer coordinates;
    /// otherwise they sit at `x.5`.
    pub voxel_centers_at_integer_coordinates: Vec<bool>,
}

impl CoordinateSpaceBounds {
    pub fn unbounded(rank: usize) -> Self {
        Self {
            lower_bounds: vec![f64::NEG_INFINITY; rank],
            upper_bounds: vec![f64::INFINITY; rank],
            voxel_centers_at_integer_coordinates: vec![false; rank],
        }
    }
}

fn is_integer(x: f64) -> bool {
    x.is_finite() && x.fract() == 0.0
}

fn is_half_integer(x: f64) -> bool {
    x.is_finite() && (x - 0.5).fract() == 0.0
}

/// Accumulate combined `[min(lower), max(upper)]` bounds per output dimension
/// over all contributed bounding boxes, deriving the voxel-center flag from
/// integer-vs-half-integer bound counting.
pub fn compute_combined_bounds(
    bounding_boxes: &[TransformedBoundingBox],
    rank: usize,
) -> CoordinateSpaceBounds {
    let mut bounds = CoordinateSpaceBounds::unbounded(rank);
    for dim in 0..rank {
        let mut lower = f64::INFINITY;
        let mut upper = f64::NEG_INFINITY;
        let mut integer_boxes = 0usize;
        let mut half_integer_boxes = 0usize;
        for tbb in bounding_boxes {
            if dim >= tbb.output_rank {
                continue;
            }
            let Some((lo, hi)) = tbb.mapped_interval(dim) else {
                continue;
            };
            lower = lower.min(lo);
            upper = upper.max(hi);
            if is_integer(lo) && is_integer(hi) {
                integer_boxes += 1;
            } else if is_half_integer(lo) && is_half_integer(hi) {
                half_integer_boxes += 1;
            }
        }
        if lower <= upper {
            bounds.lower_bounds[dim] = lower;
            bounds.upper_bounds[dim] = upper;
        }
        bounds.voxel_centers_at_integer_coordinates[dim] =
            half_integer_boxes > 0 && integer_boxes == 0;
    }
    bounds
}

/// Clamp a coordinate into the dimension's bounds and snap it to the nearest
/// voxel center under the dimension's rounding convention. Idempotent.
pub fn clamp_and_round_coordinate_to_voxel_center(
    bounds: &CoordinateSpaceBounds,
    dim: usize,
    x: f64,
) -> f64 {
    let mut x = x;
    let lower = bounds.lower_bounds[dim];
    let upper = bounds.upper_bounds[dim];
    if lower.is_finite() {
        x = x.max(lower);
    }
    if upper.is_finite() {
        x = x.min(upper - 1.0);
    }
    if bounds.voxel_centers_at_integer_coordinates[dim] {
        x.round()
    } else {
        x.floor() + 0.5
    }
}

/// Explicit non-uniform coordinate labels for one dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateArray {
    pub coordinates: Vec<i64>,
    pub labels: Vec<String>,
}

/// Immutable description of a coordinate system: named, unit-bearing, scaled
/// dimensions plus derived combined bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateSpace {
    pub valid: bool,
    pub rank: usize,
    pub names: Vec<String>,
    pub ids: Vec<DimensionId>,
    pub units: Vec<String>,
    /// Physical units per voxel.
    pub scales: Vec<f64>,
    /// Last user-edit time per dimension; `-inf` if never edited.
    pub timestamps: Vec<f64>,
    pub bounding_boxes: Vec<TransformedBoundingBox>,
    pub bounds: CoordinateSpaceBounds,
    pub coordinate_arrays: Vec<Option<CoordinateArray>>,
}

impl CoordinateSpace {
    pub fn empty() -> Self {
        make_coordinate_space(CoordinateSpaceSpec {
            names: vec![],
            ..Default::default()
        })
        .expect("empty space is always valid")
    }

    pub fn dimension_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Input to [make_coordinate_space]; omitted fields are defaulted.
#[derive(Debug, Clone, Default)]
pub struct CoordinateSpaceSpec {
    pub valid: Option<bool>,
    pub names: Vec<String>,
    pub ids: Option<Vec<DimensionId>>,
    pub units: Option<Vec<String>>,
    pub scales: Option<Vec<f64>>,
    pub timestamps: Option<Vec<f64>>,
    pub bounding_boxes: Vec<TransformedBoundingBox>,
    pub coordinate_arrays: Option<Vec<Option<CoordinateArray>>>,
}

/// Sole constructor for [CoordinateSpace]: fills defaults and derives
/// `bounds` from the supplied bounding boxes.
pub fn make_coordinate_space(spec: CoordinateSpaceSpec) -> crate::Result<CoordinateSpace> {
    let rank = spec.names.len();
    for (i, name) in spec.names.iter().enumerate() {
        if spec.names[..i].contains(name) {
            return Err(crate::Error::general(format!(
                "duplicate dimension name {name:?}"
            )));
        }
    }
    let check_len = |len: usize, what: &str| {
        if len != rank {
            Err(crate::Error::general(format!(
                "{what} has length {len}, expected rank {rank}"
            )))
        } else {
            Ok(())
        }
    };
    let ids = match spec.ids {
        Some(ids) => {
            check_len(ids.len(), "ids")?;
            ids
        }
        None => (0..rank).map(|_| DimensionId::next()).collect(),
    };
    let units = match spec.units {
        Some(units) => {
            check_len(units.len(), "units")?;
            units
        }
        None => vec![String::new(); rank],
    };
    let scales = match spec.scales {
        Some(scales) => {
            check_len(scales.len(), "scales")?;
            scales
        }
        None => vec![1.0; rank],
    };
    let timestamps = match spec.timestamps {
        Some(timestamps) => {
            check_len(timestamps.len(), "timestamps")?;
            timestamps
        }
        None => vec![f64::NEG_INFINITY; rank],
    };
    let coordinate_arrays = match spec.coordinate_arrays {
        Some(arrays) => {
            check_len(arrays.len(), "coordinate arrays")?;
            arrays
        }
        None => vec![None; rank],
    };
    let bounds = compute_combined_bounds(&spec.bounding_boxes, rank);
    Ok(CoordinateSpace {
        valid: spec.valid.unwrap_or(true),
        rank,
        names: spec.names,
        ids,
        units,
        scales,
        timestamps,
        bounding_boxes: spec.bounding_boxes,
        bounds,
        coordinate_arrays,
    })
}
