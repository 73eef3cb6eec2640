//! Layer texture pipeline for garment decals.
//!
//! Crops and masks source images into decal textures, keeps an ordered layer
//! stack with the derived textures in sync, and saves/replays the whole
//! arrangement as versioned preset documents.

#![allow(clippy::too_many_arguments)]

#[macro_use]
pub mod logger;
pub mod error;
pub mod io;
pub mod layer;
pub mod ops;
pub mod preset;
pub mod project;
pub mod settings;
pub mod store;
pub mod worker;

pub use error::PipelineError;
pub use io::ImageSource;
pub use layer::{Axis, BlendMode, Layer, LayerId, LayerProperty, VectorField};
pub use ops::crop::{CropInfo, CropResolution, PixelRect, resolve_crop};
pub use ops::mask::{ClipPath, compute_mask};
pub use preset::{GlobalState, Preset, PresetLibrary};
pub use project::Project;
pub use settings::PipelineSettings;
pub use store::{Direction, LayerStore, StoreUpdate};
