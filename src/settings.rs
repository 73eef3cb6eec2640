use std::path::Path;

use crate::ops::compose::ComposeOptions;
use crate::ops::crop::LegacyHeuristic;

/// Pipeline settings that persist across sessions.
///
/// Stored as plain `key=value` lines.  Unknown keys are ignored and values that
/// fail to parse keep their default, so an old or hand-edited file never
/// prevents startup.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    /// Longest display width the legacy cropper could have shown the image at.
    pub legacy_display_width: f64,
    /// Longest display height the legacy cropper could have shown the image at.
    pub legacy_display_height: f64,
    /// Growth factor applied when a legacy crop overflows the estimated display box.
    pub legacy_overflow_pad: f64,
    /// Decoded images larger than this on either axis are rejected.
    pub max_image_dimension: u32,
    /// Uniform scale given to freshly created layers.
    pub default_layer_scale: f32,
    /// Z offset given to freshly created layers so decals sit in front of the surface.
    pub default_layer_depth: f32,
    /// Surface a freshly created layer projects onto.
    pub default_target_surface: u32,
    /// Composite linked layers on the rayon pool instead of one at a time.
    pub parallel_compose: bool,
    /// File stem of the persisted preset list.
    pub preset_storage_key: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            legacy_display_width: 800.0,
            legacy_display_height: 600.0,
            legacy_overflow_pad: 1.05,
            max_image_dimension: 16_384,
            default_layer_scale: 0.3,
            default_layer_depth: 0.3,
            default_target_surface: 0,
            parallel_compose: true,
            preset_storage_key: "clothingPresets".to_string(),
        }
    }
}

impl PipelineSettings {
    /// Options handed to the compositor.
    pub fn compose_options(&self) -> ComposeOptions {
        ComposeOptions {
            legacy: LegacyHeuristic {
                display_width: self.legacy_display_width,
                display_height: self.legacy_display_height,
                overflow_pad: self.legacy_overflow_pad,
            },
            max_dimension: self.max_image_dimension,
            parallel: self.parallel_compose,
        }
    }

    /// Render as the on-disk `key=value` format.
    pub fn to_config_string(&self) -> String {
        format!(
            "legacy_display_width={}\n\
             legacy_display_height={}\n\
             legacy_overflow_pad={}\n\
             max_image_dimension={}\n\
             default_layer_scale={}\n\
             default_layer_depth={}\n\
             default_target_surface={}\n\
             parallel_compose={}\n\
             preset_storage_key={}\n",
            self.legacy_display_width,
            self.legacy_display_height,
            self.legacy_overflow_pad,
            self.max_image_dimension,
            self.default_layer_scale,
            self.default_layer_depth,
            self.default_target_surface,
            self.parallel_compose,
            self.preset_storage_key,
        )
    }

    /// Parse the `key=value` format, starting from defaults.
    pub fn from_config_str(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "legacy_display_width" => {
                    if let Ok(v) = val.parse::<f64>()
                        && v > 0.0
                    {
                        s.legacy_display_width = v;
                    }
                }
                "legacy_display_height" => {
                    if let Ok(v) = val.parse::<f64>()
                        && v > 0.0
                    {
                        s.legacy_display_height = v;
                    }
                }
                "legacy_overflow_pad" => {
                    if let Ok(v) = val.parse::<f64>()
                        && v >= 1.0
                    {
                        s.legacy_overflow_pad = v;
                    }
                }
                "max_image_dimension" => {
                    if let Ok(v) = val.parse::<u32>()
                        && v > 0
                    {
                        s.max_image_dimension = v;
                    }
                }
                "default_layer_scale" => {
                    if let Ok(v) = val.parse::<f32>() {
                        s.default_layer_scale = v;
                    }
                }
                "default_layer_depth" => {
                    if let Ok(v) = val.parse::<f32>() {
                        s.default_layer_depth = v;
                    }
                }
                "default_target_surface" => {
                    if let Ok(v) = val.parse::<u32>() {
                        s.default_target_surface = v;
                    }
                }
                "parallel_compose" => {
                    s.parallel_compose = val == "true";
                }
                "preset_storage_key" => {
                    if !val.is_empty() {
                        s.preset_storage_key = val.to_string();
                    }
                }
                _ => {}
            }
        }
        s
    }

    /// Save settings to disk.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }

    /// Load settings from disk (returns default if file missing or unreadable).
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_config_str(&content),
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_string_round_trips() {
        let mut s = PipelineSettings::default();
        s.legacy_display_width = 1024.0;
        s.parallel_compose = false;
        s.preset_storage_key = "hoodiePresets".to_string();
        assert_eq!(PipelineSettings::from_config_str(&s.to_config_string()), s);
    }

    #[test]
    fn bad_values_keep_defaults() {
        let s = PipelineSettings::from_config_str(
            "legacy_display_width=-3\nmax_image_dimension=lots\nunknown=1\nno equals sign\n",
        );
        assert_eq!(s, PipelineSettings::default());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = PipelineSettings::load(&dir.path().join("nope.cfg"));
        assert_eq!(s, PipelineSettings::default());
    }
}
