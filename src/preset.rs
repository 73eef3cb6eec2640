use std::f32::consts::PI;
use std::fmt;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PipelineError;
use crate::io::ImageSource;
use crate::layer::{Layer, LayerId, Vec3};
use crate::ops::compose::{ComposeOptions, ComposeOutcome, compose_source};
use crate::ops::crop::CropInfo;
use crate::store::StoreSnapshot;

// ============================================================================
// SCHEMA VERSIONS
// ============================================================================

/// `major.minor` preset schema version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
}

impl SchemaVersion {
    pub const CURRENT: SchemaVersion = SchemaVersion { major: 2, minor: 0 };
    /// Documents written before versioning.
    pub const LEGACY: SchemaVersion = SchemaVersion { major: 1, minor: 0 };

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (major, minor) = s.split_once('.').unwrap_or((s, "0"));
        Some(Self {
            major: major.trim().parse().ok()?,
            minor: minor.trim().parse().ok()?,
        })
    }

    /// Fail with `UnsupportedSchema` unless `version` is at most [`Self::CURRENT`].
    pub fn check(version: &str) -> Result<Self, PipelineError> {
        match Self::parse(version) {
            Some(v) if v <= Self::CURRENT => Ok(v),
            _ => Err(PipelineError::UnsupportedSchema {
                found: version.to_string(),
                supported: Self::CURRENT.to_string(),
            }),
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

fn legacy_version() -> String {
    SchemaVersion::LEGACY.to_string()
}

// ============================================================================
// GLOBAL STATE
// ============================================================================

pub const DEFAULT_COLOR: &str = "#EFBD48";
pub const DEFAULT_CLOTHING: &str = "tshirt";
pub const DEFAULT_LOGO_DECAL: &str = "./threejs.png";
pub const DEFAULT_FULL_DECAL: &str = "./texture.jpeg";

/// Garment-wide decal state that is not part of the layer stack: colour,
/// garment choice, the full-surface texture, front/back logo and text decals.
///
/// Every field is optional on input; anything missing keeps its default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalState {
    pub color: String,
    pub selected_clothing: String,

    pub is_full_texture: bool,
    pub full_decal: Option<ImageSource>,
    pub full_texture_position: Vec3,
    pub full_texture_rotation: Vec3,
    pub full_texture_scale: Vec3,

    pub is_front_logo_texture: bool,
    pub is_back_logo_texture: bool,
    pub front_logo_decal: Option<ImageSource>,
    pub back_logo_decal: Option<ImageSource>,
    pub front_logo_position: Vec3,
    pub front_logo_rotation: Vec3,
    pub front_logo_scale: Vec3,
    pub back_logo_position: Vec3,
    pub back_logo_rotation: Vec3,
    pub back_logo_scale: Vec3,

    pub is_front_text: bool,
    pub is_back_text: bool,
    pub front_text: String,
    pub front_text_position: Vec3,
    pub front_text_rotation: Vec3,
    pub front_text_scale: Vec3,
    pub front_text_font: String,
    pub front_text_size: f32,
    pub front_text_color: String,
    pub back_text: String,
    pub back_text_position: Vec3,
    pub back_text_rotation: Vec3,
    pub back_text_scale: Vec3,
    pub back_text_font: String,
    pub back_text_size: f32,
    pub back_text_color: String,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            color: DEFAULT_COLOR.to_string(),
            selected_clothing: DEFAULT_CLOTHING.to_string(),

            is_full_texture: false,
            full_decal: Some(ImageSource::uri(DEFAULT_FULL_DECAL)),
            full_texture_position: [0.0, 0.0, 0.0],
            full_texture_rotation: [0.0, 0.0, 0.0],
            full_texture_scale: [1.0, 1.0, 1.0],

            is_front_logo_texture: true,
            is_back_logo_texture: true,
            front_logo_decal: Some(ImageSource::uri(DEFAULT_LOGO_DECAL)),
            back_logo_decal: Some(ImageSource::uri(DEFAULT_LOGO_DECAL)),
            front_logo_position: [0.0, 0.04, 0.15],
            front_logo_rotation: [0.0, 0.0, 0.0],
            front_logo_scale: [0.15, 0.15, 0.15],
            back_logo_position: [0.0, 0.04, -0.15],
            back_logo_rotation: [0.0, PI, 0.0],
            back_logo_scale: [0.15, 0.15, 0.15],

            is_front_text: true,
            is_back_text: true,
            front_text: "Front Text".to_string(),
            front_text_position: [0.0, -0.04, 0.15],
            front_text_rotation: [0.0, 0.0, 0.0],
            front_text_scale: [0.15, 0.04, 0.1],
            front_text_font: "Arial".to_string(),
            front_text_size: 64.0,
            front_text_color: "black".to_string(),
            back_text: "Back Text".to_string(),
            back_text_position: [0.0, -0.04, -0.15],
            back_text_rotation: [0.0, PI, 0.0],
            back_text_scale: [0.15, 0.04, 0.1],
            back_text_font: "Arial".to_string(),
            back_text_size: 64.0,
            back_text_color: "white".to_string(),
        }
    }
}

impl GlobalState {
    fn decals_mut(&mut self) -> [&mut Option<ImageSource>; 3] {
        [
            &mut self.full_decal,
            &mut self.front_logo_decal,
            &mut self.back_logo_decal,
        ]
    }

    /// Drop embedded decal payloads.  Path references are kept.
    pub fn strip_images(&mut self) {
        for decal in self.decals_mut() {
            if decal.as_ref().is_some_and(ImageSource::is_embedded) {
                *decal = None;
            }
        }
    }

    /// Put the built-in decals back wherever a decal is missing.
    pub fn fill_default_decals(&mut self) {
        let defaults = GlobalState::default();
        if self.full_decal.is_none() {
            self.full_decal = defaults.full_decal;
        }
        if self.front_logo_decal.is_none() {
            self.front_logo_decal = defaults.front_logo_decal;
        }
        if self.back_logo_decal.is_none() {
            self.back_logo_decal = defaults.back_logo_decal;
        }
    }
}

// ============================================================================
// PRESET DOCUMENT
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetData {
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_layer_id: Option<LayerId>,
    #[serde(default)]
    pub active_layer_id: Option<LayerId>,
    #[serde(flatten)]
    pub globals: GlobalState,
}

/// A named, self-contained snapshot of the layer stack and global decal
/// state, as stored in the preset library and exchanged as a file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    /// ISO-8601 creation time.
    #[serde(default)]
    pub date: String,
    #[serde(default = "legacy_version", alias = "schemaVersion")]
    pub version: String,
    /// Images stripped; may only be applied with a new image.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub settings_only: bool,
    #[serde(default)]
    pub data: PresetData,
}

/// Result of [`Preset::load`]: the state to install.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedPreset {
    pub snapshot: StoreSnapshot,
    pub globals: GlobalState,
}

/// Result of [`Preset::apply_with_new_image`].
#[derive(Debug)]
pub struct ApplyReport {
    pub loaded: LoadedPreset,
    /// Layers whose crop had to be clamped to the new image.
    pub clamped: Vec<LayerId>,
    /// Layers whose legacy crop was estimated.
    pub estimated: Vec<LayerId>,
    pub warnings: Vec<(LayerId, PipelineError)>,
}

impl Preset {
    /// Capture `snapshot` and `globals` under `name`, images included.
    pub fn save(name: &str, snapshot: &StoreSnapshot, globals: &GlobalState) -> Preset {
        let now = chrono::Utc::now();
        let layers = snapshot
            .layers
            .iter()
            .map(|layer| {
                let mut layer = layer.clone();
                if layer.original_image.is_none() {
                    layer.original_image = layer.image.clone();
                }
                layer
            })
            .collect();

        Preset {
            id: now.timestamp_millis(),
            name: name.to_string(),
            date: now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            version: SchemaVersion::CURRENT.to_string(),
            settings_only: false,
            data: PresetData {
                layers,
                next_layer_id: Some(snapshot.next_layer_id),
                active_layer_id: snapshot.active_layer_id,
                globals: globals.clone(),
            },
        }
    }

    /// Copy with every layer image and embedded decal removed.
    pub fn export_settings_only(&self) -> Preset {
        let mut preset = self.clone();
        for layer in &mut preset.data.layers {
            layer.strip_images();
        }
        preset.data.globals.strip_images();
        preset.settings_only = true;
        preset
    }

    pub fn schema(&self) -> Result<SchemaVersion, PipelineError> {
        SchemaVersion::check(&self.version)
    }

    /// Restore the layer stack and global state exactly as saved.
    pub fn load(&self) -> Result<LoadedPreset, PipelineError> {
        self.schema()?;
        if self.settings_only {
            return Err(PipelineError::SettingsOnlyCannotLoad);
        }
        Ok(self.restore(self.data.layers.clone()))
    }

    /// Rebuild every layer against `image`: cropped layers have their crop
    /// re-resolved in the new image's pixel space, all other fields are kept.
    /// Works on settings-only presets too.
    pub fn apply_with_new_image(
        &self,
        image: &ImageSource,
        opts: &ComposeOptions,
    ) -> Result<ApplyReport, PipelineError> {
        self.schema()?;

        let jobs: Vec<CropJob> = self.data.layers.iter().map(CropJob::for_layer).collect();
        let outcomes: Vec<ComposeOutcome> = if opts.parallel {
            jobs.par_iter().map(|job| job.run(image, opts)).collect()
        } else {
            jobs.iter().map(|job| job.run(image, opts)).collect()
        };

        let mut clamped = Vec::new();
        let mut estimated = Vec::new();
        let mut warnings = Vec::new();
        let layers: Vec<Layer> = self
            .data
            .layers
            .iter()
            .zip(outcomes)
            .map(|(layer, mut outcome)| {
                if let Some(res) = outcome.crop {
                    if res.clamped {
                        clamped.push(layer.id);
                    }
                    if res.estimated {
                        estimated.push(layer.id);
                    }
                }
                if let Some(w) = outcome.warning.take() {
                    warnings.push((layer.id, w));
                }
                let mut layer = layer.clone();
                layer.original_image = Some(image.clone());
                layer.image = Some(outcome.image);
                layer.generation = 0;
                layer
            })
            .collect();

        crate::log_info!(
            "Applied preset \"{}\" to a new image ({} layer(s), {} warning(s))",
            self.name,
            layers.len(),
            warnings.len()
        );

        Ok(ApplyReport {
            loaded: self.restore(layers),
            clamped,
            estimated,
            warnings,
        })
    }

    fn restore(&self, layers: Vec<Layer>) -> LoadedPreset {
        let next_layer_id = self
            .data
            .next_layer_id
            .unwrap_or(layers.len() as LayerId + 1);
        let mut snapshot = StoreSnapshot {
            layers,
            next_layer_id,
            active_layer_id: self.data.active_layer_id,
        };
        snapshot.repair();

        let mut globals = self.data.globals.clone();
        globals.fill_default_decals();
        LoadedPreset { snapshot, globals }
    }

    // --- JSON ---

    /// Pretty-printed document, as written by export.
    pub fn to_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a wrapped preset document.  `null` fields count as missing, and
    /// a field or layer that does not parse is dropped (with a warning)
    /// instead of failing the document.
    pub fn from_json(json: &str) -> Result<Preset, PipelineError> {
        Preset::from_value(serde_json::from_str(json)?)
    }

    fn from_value(mut value: Value) -> Result<Preset, PipelineError> {
        strip_nulls(&mut value);
        let data = value.as_object_mut().and_then(|map| map.remove("data"));
        let mut preset: Preset = from_value_lenient(value, "preset")?;
        if let Some(data) = data {
            preset.data = parse_data(data);
        }
        Ok(preset)
    }

    /// Parse an exported file.  Besides the wrapped document this accepts the
    /// bare `{layers, fullTexture..., color}` object older exports wrote,
    /// which is read as schema 1.0.
    pub fn import_document(json: &str) -> Result<Preset, PipelineError> {
        let value: Value = serde_json::from_str(json)?;
        if value.get("data").is_some() {
            return Preset::from_value(value);
        }
        let mut data = value;
        strip_nulls(&mut data);
        let data: PresetData = if data.is_object() {
            parse_data(data)
        } else {
            serde_json::from_value(data)?
        };
        let now = chrono::Utc::now();
        crate::log_info!("Importing unwrapped legacy preset ({} layer(s))", data.layers.len());
        Ok(Preset {
            id: now.timestamp_millis(),
            name: "Imported preset".to_string(),
            date: now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            version: legacy_version(),
            settings_only: false,
            data,
        })
    }

    pub fn export_document(&self) -> Result<String, PipelineError> {
        self.to_json()
    }
}

/// Per-layer work for apply-with-new-image.
struct CropJob {
    crop_info: Option<CropInfo>,
    border_radius: u8,
    previous_output: Option<(u32, u32)>,
}

impl CropJob {
    fn for_layer(layer: &Layer) -> Self {
        let previous_output = match layer.crop_info {
            Some(CropInfo::LegacyDisplay(_)) => layer.image.as_ref().and_then(ImageSource::dimensions),
            _ => None,
        };
        Self {
            crop_info: layer.crop_info,
            border_radius: layer.effective_radius(),
            previous_output,
        }
    }

    fn run(&self, image: &ImageSource, opts: &ComposeOptions) -> ComposeOutcome {
        compose_source(
            image,
            self.crop_info.as_ref(),
            self.border_radius,
            opts,
            self.previous_output,
        )
    }
}

/// Read the `data` member: every layer on its own, then the remaining
/// members.  Layers that are not objects are skipped.
fn parse_data(mut value: Value) -> PresetData {
    let layers = match value.as_object_mut().and_then(|map| map.remove("layers")) {
        Some(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| {
                from_value_lenient::<Layer>(item, &format!("layer #{}", index))
                    .inspect_err(|e| crate::log_warn!("Skipping layer #{}: {}", index, e))
                    .ok()
            })
            .collect(),
        Some(other) => {
            crate::log_warn!("Ignoring preset layers: expected an array, found {}", other);
            Vec::new()
        }
        None => Vec::new(),
    };
    let mut data = from_value_lenient::<PresetData>(value, "preset data").unwrap_or_else(|e| {
        crate::log_warn!("Ignoring preset data: {}", e);
        PresetData::default()
    });
    data.layers = layers;
    data
}

/// Deserialize an object, dropping any member that fails on its own so it
/// falls back to its default.  Non-objects are parsed as-is.
fn from_value_lenient<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, serde_json::Error> {
    let Value::Object(map) = value else {
        return serde_json::from_value(value);
    };
    if let Ok(parsed) = serde_json::from_value(Value::Object(map.clone())) {
        return Ok(parsed);
    }
    let mut kept = Map::new();
    for (key, member) in map {
        let single = Value::Object(Map::from_iter([(key.clone(), member.clone())]));
        match serde_json::from_value::<T>(single) {
            Ok(_) => {
                kept.insert(key, member);
            }
            Err(e) => {
                crate::log_warn!("Ignoring {} field \"{}\": {}", what, key, e);
            }
        }
    }
    serde_json::from_value(Value::Object(kept))
}

/// Remove `null` members from every object so they fall back to defaults.
fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

// ============================================================================
// PRESET LIBRARY
// ============================================================================

/// Saved presets, in save order, persisted together as one JSON array.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PresetLibrary {
    presets: Vec<Preset>,
}

impl PresetLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&Preset> {
        self.presets.iter().find(|p| p.id == id)
    }

    /// Append, bumping the id if it collides.  Returns the stored id.
    pub fn add(&mut self, mut preset: Preset) -> i64 {
        if self.get(preset.id).is_some() {
            preset.id = self.presets.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        }
        let id = preset.id;
        self.presets.push(preset);
        id
    }

    pub fn remove(&mut self, id: i64) -> Result<Preset, PipelineError> {
        let index = self
            .presets
            .iter()
            .position(|p| p.id == id)
            .ok_or(PipelineError::PresetNotFound(id))?;
        Ok(self.presets.remove(index))
    }

    pub fn to_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string(&self.presets)?)
    }

    /// Parse a stored list.  Entries that fail to parse are skipped.
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let items: Vec<Value> = serde_json::from_str(json)?;
        let mut library = Self::new();
        for (index, item) in items.into_iter().enumerate() {
            match Preset::from_value(item) {
                Ok(preset) => {
                    library.add(preset);
                }
                Err(e) => {
                    crate::log_warn!("Skipping stored preset #{}: {}", index, e);
                }
            }
        }
        Ok(library)
    }

    pub fn storage_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{}.json", key))
    }

    pub fn save_to(&self, dir: &Path, key: &str) -> Result<PathBuf, PipelineError> {
        std::fs::create_dir_all(dir)?;
        let path = Self::storage_path(dir, key);
        std::fs::write(&path, self.to_json()?)?;
        Ok(path)
    }

    /// Load the stored list; a missing file is an empty library.
    pub fn load_from(dir: &Path, key: &str) -> Result<Self, PipelineError> {
        let path = Self::storage_path(dir, key);
        match std::fs::read_to_string(&path) {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }
}
