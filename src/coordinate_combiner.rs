//! Merging of per-source coordinate spaces into one combined space.
//!
//! A [CoordinateSpaceCombiner] owns a set of bound spaces, filters their
//! dimensions through a name predicate (global vs local vs channel
//! namespaces), and deterministically recombines on every bind, update, or
//! unbind. Recombination also propagates each dimension's canonical
//! `(unit, scale, timestamp)` back into the contributing spaces.

use crate::coordinate_space::{
    CoordinateSpace, CoordinateSpaceSpec, DimensionId, TransformedBoundingBox,
    make_coordinate_space,
};

pub type BindingId = u64;

/// Re-express a bounding box whose transform targets a source space in the
/// dimension indices of a combined space.
///
/// `dimension_map[i]` gives the combined dimension for source dimension `i`,
/// or `None` if the dimension is not part of the combined space.
pub fn extend_transformed_bounding_box(
    tbb: &TransformedBoundingBox,
    dimension_map: &[Option<usize>],
    combined_rank: usize,
) -> TransformedBoundingBox {
    debug_assert_eq!(dimension_map.len(), tbb.output_rank);
    let cols = tbb.input_rank + 1;
    let mut transform = vec![0.0; cols * combined_rank];
    for col in 0..cols {
        for (row, target) in dimension_map.iter().enumerate() {
            if let Some(combined_row) = target {
                transform[col * combined_rank + combined_row] =
                    tbb.transform[col * tbb.output_rank + row];
            }
        }
    }
    TransformedBoundingBox {
        bounding_box: tbb.bounding_box.clone(),
        input_rank: tbb.input_rank,
        output_rank: combined_rank,
        transform,
    }
}

struct Binding {
    id: BindingId,
    space: CoordinateSpace,
}

type ChangeListener = Box<dyn FnMut(&CoordinateSpace)>;

pub struct CoordinateSpaceCombiner {
    include_dimension: Box<dyn Fn(&str) -> bool>,
    bindings: Vec<Binding>,
    retain_count: usize,
    combined: CoordinateSpace,
    next_binding_id: BindingId,
    listeners: Vec<ChangeListener>,
}

impl CoordinateSpaceCombiner {
    pub fn new(include_dimension: impl Fn(&str) -> bool + 'static) -> Self {
        Self {
            include_dimension: Box::new(include_dimension),
            bindings: Vec::new(),
            retain_count: 0,
            combined: CoordinateSpace::empty(),
            next_binding_id: 1,
            listeners: Vec::new(),
        }
    }

    pub fn combined(&self) -> &CoordinateSpace {
        &self.combined
    }

    /// Register a change callback; invoked synchronously after each
    /// recombination that alters the combined space.
    pub fn on_change(&mut self, listener: impl FnMut(&CoordinateSpace) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Keep the combined space alive while no spaces are bound.
    pub fn retain(&mut self) {
        self.retain_count += 1;
    }

    /// Unbalanced releases are ignored rather than wrapping the count.
    pub fn release(&mut self) {
        if self.retain_count == 0 {
            return;
        }
        self.retain_count -= 1;
        if self.retain_count == 0 && self.bindings.is_empty() {
            self.recombine();
        }
    }

    pub fn bind(&mut self, space: CoordinateSpace) -> BindingId {
        let id = self.next_binding_id;
        self.next_binding_id += 1;
        self.bindings.push(Binding { id, space });
        self.recombine();
        id
    }

    pub fn update(&mut self, id: BindingId, space: CoordinateSpace) -> crate::Result<()> {
        let binding = self
            .bindings
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| crate::Error::general(format!("unknown binding {id}")))?;
        binding.space = space;
        self.recombine();
        Ok(())
    }

    pub fn unbind(&mut self, id: BindingId) {
        self.bindings.retain(|b| b.id != id);
        self.recombine();
    }

    /// The current space for a binding, reflecting any canonical
    /// `(unit, scale, timestamp)` values propagated back during recombination.
    pub fn binding_space(&self, id: BindingId) -> Option<&CoordinateSpace> {
        self.bindings.iter().find(|b| b.id == id).map(|b| &b.space)
    }

    fn recombine(&mut self) {
        if self.bindings.is_empty() && self.retain_count > 0 {
            return;
        }

        // Combined dimension names in first-appearance order across bindings.
        let mut names: Vec<String> = Vec::new();
        for binding in &self.bindings {
            for name in &binding.space.names {
                if (self.include_dimension)(name) && !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }

        // Canonical (unit, scale, timestamp) per combined dimension: the most
        // recently updated contributor wins, later bindings winning ties.
        let mut units = Vec::with_capacity(names.len());
        let mut scales = Vec::with_capacity(names.len());
        let mut timestamps = Vec::with_capacity(names.len());
        for name in &names {
            let mut unit = String::new();
            let mut scale = 1.0;
            let mut timestamp = f64::NEG_INFINITY;
            let mut found = false;
            for binding in &self.bindings {
                let Some(dim) = binding.space.dimension_index(name) else {
                    continue;
                };
                if !found || binding.space.timestamps[dim] >= timestamp {
                    unit = binding.space.units[dim].clone();
                    scale = binding.space.scales[dim];
                    timestamp = binding.space.timestamps[dim];
                    found = true;
                }
            }
            units.push(unit);
            scales.push(scale);
            timestamps.push(timestamp);
        }

        // Dimension ids stay stable for names that survive the merge.
        let ids: Vec<DimensionId> = names
            .iter()
            .map(|name| {
                self.combined
                    .dimension_index(name)
                    .map(|dim| self.combined.ids[dim])
                    .unwrap_or_else(DimensionId::next)
            })
            .collect();

        // Propagate canonical values back into every contributing space.
        for binding in &mut self.bindings {
            let mut changed = false;
            let mut space_units = binding.space.units.clone();
            let mut space_scales = binding.space.scales.clone();
            let mut space_timestamps = binding.space.timestamps.clone();
            for (combined_dim, name) in names.iter().enumerate() {
                let Some(dim) = binding.space.dimension_index(name) else {
                    continue;
                };
                if space_units[dim] != units[combined_dim]
                    || space_scales[dim] != scales[combined_dim]
                {
                    space_units[dim] = units[combined_dim].clone();
                    space_scales[dim] = scales[combined_dim];
                    space_timestamps[dim] = timestamps[combined_dim];
                    changed = true;
                }
            }
            if changed {
                binding.space = make_coordinate_space(CoordinateSpaceSpec {
                    valid: Some(binding.space.valid),
                    names: binding.space.names.clone(),
                    ids: Some(binding.space.ids.clone()),
                    units: Some(space_units),
                    scales: Some(space_scales),
                    timestamps: Some(space_timestamps),
                    bounding_boxes: binding.space.bounding_boxes.clone(),
                    coordinate_arrays: Some(binding.space.coordinate_arrays.clone()),
                })
                .expect("rebinding an already-valid space cannot fail");
            }
        }

        // Merge bounding boxes, re-expressed in combined dimension order.
        let mut bounding_boxes = Vec::new();
        for binding in &self.bindings {
            let dimension_map: Vec<Option<usize>> = binding
                .space
                .names
                .iter()
                .map(|name| names.iter().position(|n| n == name))
                .collect();
            for tbb in &binding.space.bounding_boxes {
                bounding_boxes.push(extend_transformed_bounding_box(
                    tbb,
                    &dimension_map,
                    names.len(),
                ));
            }
        }

        // Merge coordinate arrays, preferring the existing combined space's
        // explicit entries.
        let coordinate_arrays = names
            .iter()
            .map(|name| {
                if let Some(dim) = self.combined.dimension_index(name) {
                    if let Some(existing) = &self.combined.coordinate_arrays[dim] {
                        return Some(existing.clone());
                    }
                }
                self.bindings.iter().find_map(|binding| {
                    binding
                        .space
                        .dimension_index(name)
                        .and_then(|dim| binding.space.coordinate_arrays[dim].clone())
                })
            })
            .collect();

        let combined = make_coordinate_space(CoordinateSpaceSpec {
            valid: Some(true),
            names,
            ids: Some(ids),
            units: Some(units),
            scales: Some(scales),
            timestamps: Some(timestamps),
            bounding_boxes,
            coordinate_arrays: Some(coordinate_arrays),
        })
        .expect("combined dimension names are unique by construction");

        if combined != self.combined {
            self.combined = combined;
            for listener in &mut self.listeners {
                listener(&self.combined);
            }
        }
    }
}
