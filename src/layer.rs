use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::PipelineError;
use crate::io::ImageSource;
use crate::ops::compose::{ComposeOptions, ComposeOutcome, compose_source};
use crate::ops::crop::CropInfo;
use crate::ops::mask::FULL_ELLIPSE_PCT;
use crate::settings::PipelineSettings;

pub type LayerId = u64;
pub type Vec3 = [f32; 3];

/// How the renderer should blend a decal over the garment.  Carried through
/// presets untouched; this crate never blends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Additive,
    Overlay,
    Lighten,
    Darken,
    Subtract,
}

impl BlendMode {
    /// Returns all blend modes for UI display
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Additive,
            BlendMode::Overlay,
            BlendMode::Lighten,
            BlendMode::Darken,
            BlendMode::Subtract,
        ]
    }

    /// Stable key used in preset documents.
    pub fn key(&self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Additive => "add",
            BlendMode::Overlay => "overlay",
            BlendMode::Lighten => "lighten",
            BlendMode::Darken => "darken",
            BlendMode::Subtract => "subtract",
        }
    }

    /// Reconstruct from a document key (defaults to Normal for unknown values)
    pub fn from_key(key: &str) -> Self {
        match key.to_ascii_lowercase().as_str() {
            "multiply" => BlendMode::Multiply,
            "screen" => BlendMode::Screen,
            "add" | "additive" => BlendMode::Additive,
            "overlay" => BlendMode::Overlay,
            "lighten" => BlendMode::Lighten,
            "darken" => BlendMode::Darken,
            "subtract" => BlendMode::Subtract,
            _ => BlendMode::Normal,
        }
    }
}

impl From<String> for BlendMode {
    fn from(s: String) -> Self {
        BlendMode::from_key(&s)
    }
}

impl From<BlendMode> for String {
    fn from(m: BlendMode) -> Self {
        m.key().to_string()
    }
}

/// Placement defaults for freshly created layers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerDefaults {
    pub scale: f32,
    pub depth: f32,
    pub target_surface: u32,
}

impl Default for LayerDefaults {
    fn default() -> Self {
        Self::from_settings(&PipelineSettings::default())
    }
}

impl LayerDefaults {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            scale: settings.default_layer_scale,
            depth: settings.default_layer_depth,
            target_surface: settings.default_target_surface,
        }
    }
}

/// One decal: an uploaded image, how it is cropped and masked, and where it
/// sits on the garment.
///
/// `image` is derived from `original_image`, `crop_info` and `border_radius`
/// and must be recomposed whenever one of those changes (see
/// [`Layer::apply`]).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    /// Layers sharing this id follow the same upload.
    pub source_image_id: String,
    pub original_image: Option<ImageSource>,
    pub image: Option<ImageSource>,
    pub crop_info: Option<CropInfo>,
    #[serde(deserialize_with = "de_border_radius")]
    pub border_radius: u8,
    #[serde(deserialize_with = "de_opacity")]
    pub opacity: f32,
    pub visible: bool,
    pub position: Vec3,
    /// Euler angles in radians.
    pub rotation: Vec3,
    pub scale: Vec3,
    pub blend_mode: BlendMode,
    #[serde(rename = "targetMeshIndices", alias = "targetSurfaceIds")]
    pub target_surface_ids: BTreeSet<u32>,
    /// Bumped on every texture-affecting edit.  Not serialized.
    #[serde(skip)]
    pub generation: u64,
}

impl PartialEq for Layer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.source_image_id == other.source_image_id
            && self.original_image == other.original_image
            && self.image == other.image
            && self.crop_info == other.crop_info
            && self.border_radius == other.border_radius
            && self.opacity == other.opacity
            && self.visible == other.visible
            && self.position == other.position
            && self.rotation == other.rotation
            && self.scale == other.scale
            && self.blend_mode == other.blend_mode
            && self.target_surface_ids == other.target_surface_ids
    }
}

impl Default for Layer {
    fn default() -> Self {
        let d = LayerDefaults::default();
        Self {
            id: 0,
            name: String::new(),
            source_image_id: String::new(),
            original_image: None,
            image: None,
            crop_info: None,
            border_radius: 0,
            opacity: 1.0,
            visible: true,
            position: [0.0, 0.0, d.depth],
            rotation: [0.0; 3],
            scale: [d.scale; 3],
            blend_mode: BlendMode::Normal,
            target_surface_ids: BTreeSet::from([d.target_surface]),
            generation: 0,
        }
    }
}

fn de_border_radius<'de, D: Deserializer<'de>>(d: D) -> Result<u8, D::Error> {
    let v = Option::<f64>::deserialize(d)?.unwrap_or(0.0);
    Ok(clamp_radius(v))
}

fn de_opacity<'de, D: Deserializer<'de>>(d: D) -> Result<f32, D::Error> {
    let v = Option::<f64>::deserialize(d)?.unwrap_or(1.0);
    Ok(clamp_opacity(v as f32))
}

fn clamp_radius(v: f64) -> u8 {
    if v.is_finite() {
        v.round().clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

fn clamp_opacity(v: f32) -> f32 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 1.0 }
}

/// A single-field edit, as issued by property panels.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerProperty {
    Name(String),
    Visible(bool),
    Opacity(f32),
    BorderRadius(u8),
    CropInfo(Option<CropInfo>),
    OriginalImage(ImageSource),
    SourceImageId(String),
    Position(Vec3),
    Rotation(Vec3),
    Scale(Vec3),
    BlendMode(BlendMode),
    TargetSurfaces(BTreeSet<u32>),
}

impl LayerProperty {
    /// Whether this edit invalidates the composited texture.
    pub fn affects_texture(&self) -> bool {
        matches!(
            self,
            LayerProperty::BorderRadius(_)
                | LayerProperty::CropInfo(_)
                | LayerProperty::OriginalImage(_)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorField {
    Position,
    Rotation,
    Scale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Everything needed to rebuild a layer's texture, detached from the layer
/// so it can be sent to another thread.
#[derive(Clone, Debug)]
pub struct ComposeRequest {
    /// Store the request was taken from; see [`LayerStore::epoch`](crate::store::LayerStore::epoch).
    pub epoch: u64,
    pub layer_id: LayerId,
    pub generation: u64,
    pub original: ImageSource,
    pub crop_info: Option<CropInfo>,
    pub border_radius: u8,
    /// Size of the texture the crop produced last time (legacy crops only).
    pub previous_output: Option<(u32, u32)>,
}

impl ComposeRequest {
    pub fn run(&self, opts: &ComposeOptions) -> ComposeOutcome {
        compose_source(
            &self.original,
            self.crop_info.as_ref(),
            self.border_radius,
            opts,
            self.previous_output,
        )
    }
}

impl Layer {
    pub fn new(
        id: LayerId,
        name: String,
        source_image_id: String,
        original: ImageSource,
        defaults: &LayerDefaults,
    ) -> Self {
        Self {
            id,
            name,
            source_image_id,
            image: Some(original.clone()),
            original_image: Some(original),
            position: [0.0, 0.0, defaults.depth],
            scale: [defaults.scale; 3],
            target_surface_ids: BTreeSet::from([defaults.target_surface]),
            ..Self::default()
        }
    }

    /// Mask radius actually used, after clamping to the full ellipse.
    pub fn effective_radius(&self) -> u8 {
        self.border_radius.min(FULL_ELLIPSE_PCT)
    }

    /// Apply an edit.  Returns true when the texture must be recomposed.
    pub fn apply(&mut self, property: LayerProperty) -> bool {
        let dirty = property.affects_texture();
        match property {
            LayerProperty::Name(v) => self.name = v,
            LayerProperty::Visible(v) => self.visible = v,
            LayerProperty::Opacity(v) => self.opacity = clamp_opacity(v),
            LayerProperty::BorderRadius(v) => self.border_radius = v.min(100),
            LayerProperty::CropInfo(v) => self.crop_info = v,
            LayerProperty::OriginalImage(v) => self.original_image = Some(v),
            LayerProperty::SourceImageId(v) => self.source_image_id = v,
            LayerProperty::Position(v) => self.position = v,
            LayerProperty::Rotation(v) => self.rotation = v,
            LayerProperty::Scale(v) => self.scale = v,
            LayerProperty::BlendMode(v) => self.blend_mode = v,
            LayerProperty::TargetSurfaces(v) => self.target_surface_ids = v,
        }
        if dirty {
            self.generation += 1;
        }
        dirty
    }

    pub fn vector_mut(&mut self, field: VectorField) -> &mut Vec3 {
        match field {
            VectorField::Position => &mut self.position,
            VectorField::Rotation => &mut self.rotation,
            VectorField::Scale => &mut self.scale,
        }
    }

    pub fn vector(&self, field: VectorField) -> Vec3 {
        match field {
            VectorField::Position => self.position,
            VectorField::Rotation => self.rotation,
            VectorField::Scale => self.scale,
        }
    }

    /// Snapshot of the texture inputs, or `None` when there is no original
    /// to work from (settings-only layers).
    pub fn compose_request(&self) -> Option<ComposeRequest> {
        let original = self.original_image.clone()?;
        let previous_output = match self.crop_info {
            Some(CropInfo::LegacyDisplay(_)) => self.image.as_ref().and_then(ImageSource::dimensions),
            _ => None,
        };
        Some(ComposeRequest {
            epoch: 0,
            layer_id: self.id,
            generation: self.generation,
            original,
            crop_info: self.crop_info,
            border_radius: self.effective_radius(),
            previous_output,
        })
    }

    /// Store a finished composition.  Ignored (returns false) if the layer
    /// has been edited since `generation` was captured.
    pub fn commit(&mut self, generation: u64, outcome: ComposeOutcome) -> bool {
        if generation != self.generation {
            return false;
        }
        self.image = Some(outcome.image);
        true
    }

    /// Rebuild `image` from the original, synchronously.
    pub fn recompose(&mut self, opts: &ComposeOptions) -> Option<PipelineError> {
        let Some(request) = self.compose_request() else {
            self.image = None;
            return None;
        };
        let mut outcome = request.run(opts);
        let warning = outcome.warning.take();
        self.commit(request.generation, outcome);
        warning
    }

    /// Drop every embedded image payload.
    pub fn strip_images(&mut self) {
        self.image = None;
        self.original_image = None;
    }
}
