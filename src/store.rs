use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;

use crate::error::PipelineError;
use crate::io::ImageSource;
use crate::layer::{Axis, ComposeRequest, Layer, LayerDefaults, LayerId, LayerProperty, VectorField};
use crate::ops::compose::{ComposeOptions, ComposeOutcome};
use crate::ops::crop::CropInfo;
use crate::settings::PipelineSettings;

/// Paint-order direction for [`LayerStore::reorder`].  `Up` moves a layer
/// towards index 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Outcome of a store mutation that may have rebuilt a texture.
#[derive(Debug)]
pub struct StoreUpdate {
    pub layer_id: LayerId,
    pub recomposed: bool,
    /// Recoverable composition failures (the layer keeps a usable image).
    pub warnings: Vec<PipelineError>,
}

impl StoreUpdate {
    fn unchanged(layer_id: LayerId) -> Self {
        Self {
            layer_id,
            recomposed: false,
            warnings: Vec::new(),
        }
    }
}

/// Plain-data copy of a store, as embedded in presets.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreSnapshot {
    pub layers: Vec<Layer>,
    pub next_layer_id: LayerId,
    pub active_layer_id: Option<LayerId>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            next_layer_id: 1,
            active_layer_id: None,
        }
    }
}

impl StoreSnapshot {
    /// Bring a snapshot read from an older or hand-edited document back to a
    /// consistent state.
    pub fn repair(&mut self) {
        let mut seen = HashSet::new();
        let mut next = self
            .layers
            .iter()
            .map(|l| l.id)
            .max()
            .map_or(1, |max| max + 1)
            .max(self.next_layer_id)
            .max(1);

        for layer in &mut self.layers {
            if !seen.insert(layer.id) {
                crate::log_warn!("Duplicate layer id {} reassigned to {}", layer.id, next);
                layer.id = next;
                seen.insert(next);
                next += 1;
            }
            if layer.original_image.is_none() {
                layer.original_image = layer.image.clone();
            }
            if layer.source_image_id.is_empty() {
                layer.source_image_id = new_source_image_id();
            }
        }
        self.next_layer_id = next;

        let active_exists = self
            .active_layer_id
            .is_some_and(|id| self.layers.iter().any(|l| l.id == id));
        if !active_exists {
            self.active_layer_id = self.layers.first().map(|l| l.id);
        }
    }
}

static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

fn next_epoch() -> u64 {
    NEXT_EPOCH.fetch_add(1, Ordering::Relaxed)
}

pub fn new_source_image_id() -> String {
    format!("src_{}", uuid::Uuid::new_v4().simple())
}

/// Ordered layer stack with the active selection.
///
/// Every mutation goes through a method here; any edit touching the crop,
/// mask radius or original image rebuilds the layer's texture before
/// returning (the `stage_*` variants hand that work to the caller instead).
#[derive(Clone, Debug)]
pub struct LayerStore {
    layers: Vec<Layer>,
    active_layer_id: Option<LayerId>,
    next_layer_id: LayerId,
    options: ComposeOptions,
    defaults: LayerDefaults,
    epoch: u64,
}

impl Default for LayerStore {
    fn default() -> Self {
        Self::new(ComposeOptions::default(), LayerDefaults::default())
    }
}

impl LayerStore {
    pub fn new(options: ComposeOptions, defaults: LayerDefaults) -> Self {
        Self {
            layers: Vec::new(),
            active_layer_id: None,
            next_layer_id: 1,
            options,
            defaults,
            epoch: next_epoch(),
        }
    }

    pub fn with_settings(settings: &PipelineSettings) -> Self {
        Self::new(settings.compose_options(), LayerDefaults::from_settings(settings))
    }

    /// Rebuild a store from a snapshot (repairing it first).
    pub fn from_snapshot(
        mut snapshot: StoreSnapshot,
        options: ComposeOptions,
        defaults: LayerDefaults,
    ) -> Self {
        snapshot.repair();
        Self {
            layers: snapshot.layers,
            active_layer_id: snapshot.active_layer_id,
            next_layer_id: snapshot.next_layer_id,
            options,
            defaults,
            epoch: next_epoch(),
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            layers: self.layers.clone(),
            next_layer_id: self.next_layer_id,
            active_layer_id: self.active_layer_id,
        }
    }

    // --- accessors ---

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn active_layer_id(&self) -> Option<LayerId> {
        self.active_layer_id
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.active_layer_id.and_then(|id| self.layer(id))
    }

    /// Process-unique tag of this store instance.  Requests taken from one
    /// store are never committed to another, even when layer ids coincide.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn next_layer_id(&self) -> LayerId {
        self.next_layer_id
    }

    pub fn options(&self) -> &ComposeOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: ComposeOptions) {
        self.options = options;
    }

    pub fn defaults(&self) -> &LayerDefaults {
        &self.defaults
    }

    // --- structure ---

    /// Add a layer built from an upload and make it active.
    pub fn create(
        &mut self,
        image: ImageSource,
        name: Option<String>,
        crop_info: Option<CropInfo>,
        source_image_id: Option<String>,
    ) -> StoreUpdate {
        let id = self.next_layer_id;
        self.next_layer_id += 1;

        let name = name.unwrap_or_else(|| format!("Layer {}", id));
        let source_image_id = source_image_id.unwrap_or_else(new_source_image_id);
        let mut layer = Layer::new(id, name, source_image_id, image, &self.defaults);

        let mut update = StoreUpdate::unchanged(id);
        if crop_info.is_some() {
            layer.apply(LayerProperty::CropInfo(crop_info));
            update.recomposed = true;
            update.warnings.extend(layer.recompose(&self.options));
        }

        self.layers.push(layer);
        self.active_layer_id = Some(id);
        update
    }

    /// Remove a layer.  If it was active, the first remaining layer becomes
    /// active.
    pub fn delete(&mut self, id: LayerId) -> Option<Layer> {
        let index = self.index_of(id)?;
        let removed = self.layers.remove(index);
        if self.active_layer_id == Some(id) {
            self.active_layer_id = self.layers.first().map(|l| l.id);
        }
        Some(removed)
    }

    /// Swap with the neighbour in paint order.  False at either end.
    pub fn reorder(&mut self, id: LayerId, direction: Direction) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let target = match direction {
            Direction::Up => index.checked_sub(1),
            Direction::Down => Some(index + 1).filter(|&i| i < self.layers.len()),
        };
        match target {
            Some(t) => {
                self.layers.swap(index, t);
                true
            }
            None => false,
        }
    }

    /// Deep copy with a fresh id and a " (Copy)" name, appended on top and
    /// made active.
    pub fn duplicate(&mut self, id: LayerId) -> Option<LayerId> {
        let mut copy = self.layer(id)?.clone();
        let new_id = self.next_layer_id;
        self.next_layer_id += 1;
        copy.id = new_id;
        copy.name = format!("{} (Copy)", copy.name);
        copy.generation = 0;
        self.layers.push(copy);
        self.active_layer_id = Some(new_id);
        Some(new_id)
    }

    pub fn select(&mut self, id: LayerId) -> bool {
        if self.layer(id).is_some() {
            self.active_layer_id = Some(id);
            true
        } else {
            false
        }
    }

    pub fn clear_selection(&mut self) {
        self.active_layer_id = None;
    }

    /// Flip visibility; returns the new state.
    pub fn toggle_visibility(&mut self, id: LayerId) -> Option<bool> {
        let layer = self.layer_mut(id)?;
        layer.visible = !layer.visible;
        Some(layer.visible)
    }

    // --- properties ---

    /// Apply an edit, recomposing the texture if the edit requires it.
    pub fn set_property(&mut self, id: LayerId, property: LayerProperty) -> Option<StoreUpdate> {
        let options = self.options;
        let layer = self.layer_mut(id)?;
        let mut update = StoreUpdate::unchanged(id);
        if layer.apply(property) {
            update.recomposed = true;
            update.warnings.extend(layer.recompose(&options));
        }
        Some(update)
    }

    /// Set one component of position, rotation or scale.
    pub fn set_vector_component(
        &mut self,
        id: LayerId,
        field: VectorField,
        axis: Axis,
        value: f32,
    ) -> Option<StoreUpdate> {
        let layer = self.layer_mut(id)?;
        layer.vector_mut(field)[axis.index()] = value;
        Some(StoreUpdate::unchanged(id))
    }

    /// [`LayerStore::set_property`] on the active layer; `None` (and no
    /// change) when nothing is selected.
    pub fn update_active(&mut self, property: LayerProperty) -> Option<StoreUpdate> {
        let Some(id) = self.active_layer_id else {
            crate::log_info!("Ignoring layer edit: no active layer");
            return None;
        };
        self.set_property(id, property)
    }

    pub fn update_active_vector(
        &mut self,
        field: VectorField,
        axis: Axis,
        value: f32,
    ) -> Option<StoreUpdate> {
        let Some(id) = self.active_layer_id else {
            crate::log_info!("Ignoring layer edit: no active layer");
            return None;
        };
        self.set_vector_component(id, field, axis, value)
    }

    /// Apply an edit without recomposing.  When the texture is now stale the
    /// returned request must be run and handed back through
    /// [`LayerStore::commit_composite`].
    pub fn stage_property(
        &mut self,
        id: LayerId,
        property: LayerProperty,
    ) -> Option<ComposeRequest> {
        let epoch = self.epoch;
        let layer = self.layer_mut(id)?;
        if layer.apply(property) {
            layer
                .compose_request()
                .map(|request| ComposeRequest { epoch, ..request })
        } else {
            None
        }
    }

    /// Store a texture computed off-thread.  Discarded (false) if the request
    /// came from another store, or the layer was deleted or edited again
    /// since the request was taken.
    pub fn commit_composite(
        &mut self,
        epoch: u64,
        id: LayerId,
        generation: u64,
        outcome: ComposeOutcome,
    ) -> bool {
        if epoch != self.epoch {
            crate::log_info!("Discarding composite for layer {} from a replaced store", id);
            return false;
        }
        let Some(layer) = self.layer_mut(id) else {
            crate::log_info!("Discarding composite for deleted layer {}", id);
            return false;
        };
        let current = layer.generation;
        if layer.commit(generation, outcome) {
            true
        } else {
            crate::log_info!(
                "Discarding stale composite for layer {} (generation {} < {})",
                id,
                generation,
                current
            );
            false
        }
    }

    /// Point every layer linked to `source_image_id` at a new upload and
    /// rebuild their textures.
    pub fn replace_source_image(
        &mut self,
        source_image_id: &str,
        new_original: ImageSource,
    ) -> Vec<StoreUpdate> {
        let epoch = self.epoch;
        let requests: Vec<ComposeRequest> = self
            .layers
            .iter_mut()
            .filter(|l| l.source_image_id == source_image_id)
            .filter_map(|l| {
                l.apply(LayerProperty::OriginalImage(new_original.clone()));
                l.compose_request()
                    .map(|request| ComposeRequest { epoch, ..request })
            })
            .collect();

        crate::log_info!(
            "Replacing source {} on {} linked layer(s)",
            source_image_id,
            requests.len()
        );

        let options = self.options;
        let outcomes: Vec<ComposeOutcome> = if options.parallel {
            requests.par_iter().map(|r| r.run(&options)).collect()
        } else {
            requests.iter().map(|r| r.run(&options)).collect()
        };

        requests
            .into_iter()
            .zip(outcomes)
            .map(|(request, mut outcome)| {
                let warnings: Vec<PipelineError> = outcome.warning.take().into_iter().collect();
                let recomposed = self.commit_composite(
                    request.epoch,
                    request.layer_id,
                    request.generation,
                    outcome,
                );
                StoreUpdate {
                    layer_id: request.layer_id,
                    recomposed,
                    warnings,
                }
            })
            .collect()
    }
}
