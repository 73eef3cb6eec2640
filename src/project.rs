use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::io::ImageSource;
use crate::layer::LayerDefaults;
use crate::preset::{ApplyReport, GlobalState, Preset, PresetLibrary};
use crate::settings::PipelineSettings;
use crate::store::LayerStore;

pub const SETTINGS_FILE: &str = "settings.cfg";
pub const LOG_FILE: &str = "decalfe.log";

/// One garment design: the layer stack, global decal state and the saved
/// preset library, plus the settings they were built with.
///
/// Preset loads are transactional: on any error the current stack and
/// globals are left untouched.
pub struct Project {
    pub id: Uuid,
    /// Display name
    pub name: String,
    store: LayerStore,
    globals: GlobalState,
    presets: PresetLibrary,
    settings: PipelineSettings,
    /// Where settings and presets are persisted; `None` keeps everything in memory.
    storage_dir: Option<PathBuf>,
    pub is_dirty: bool,
}

impl Project {
    pub fn new(name: &str, settings: PipelineSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            store: LayerStore::with_settings(&settings),
            globals: GlobalState::default(),
            presets: PresetLibrary::new(),
            settings,
            storage_dir: None,
            is_dirty: false,
        }
    }

    /// Open a project backed by `dir`: starts the session log, reads
    /// settings (defaults if absent) and the stored preset list.
    pub fn open(name: &str, dir: &Path) -> Result<Self, PipelineError> {
        // Logging is optional; carry on without it.
        let _ = crate::logger::init(&dir.join(LOG_FILE));
        let settings = PipelineSettings::load(&dir.join(SETTINGS_FILE));
        let mut project = Self::new(name, settings);
        project.storage_dir = Some(dir.to_path_buf());
        project.restore_presets()?;
        crate::log_info!(
            "Opened project \"{}\" with {} stored preset(s)",
            project.name,
            project.presets.len()
        );
        Ok(project)
    }

    // --- accessors ---

    pub fn store(&self) -> &LayerStore {
        &self.store
    }

    /// Mutable access to the layer stack; marks the project dirty.
    pub fn store_mut(&mut self) -> &mut LayerStore {
        self.is_dirty = true;
        &mut self.store
    }

    pub fn globals(&self) -> &GlobalState {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut GlobalState {
        self.is_dirty = true;
        &mut self.globals
    }

    pub fn presets(&self) -> &PresetLibrary {
        &self.presets
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn storage_dir(&self) -> Option<&Path> {
        self.storage_dir.as_deref()
    }

    /// Replace the settings and push the compositor options into the store.
    pub fn set_settings(&mut self, settings: PipelineSettings) {
        self.store.set_options(settings.compose_options());
        self.settings = settings;
    }

    pub fn save_settings(&self) -> Result<(), PipelineError> {
        if let Some(dir) = &self.storage_dir {
            self.settings.save(&dir.join(SETTINGS_FILE))?;
        }
        Ok(())
    }

    // --- presets ---

    /// Snapshot the current state into the library.  Returns the preset id.
    pub fn save_preset(&mut self, name: &str, settings_only: bool) -> Result<i64, PipelineError> {
        let mut preset = Preset::save(name, &self.store.snapshot(), &self.globals);
        if settings_only {
            preset = preset.export_settings_only();
        }
        let id = self.add_preset(preset)?;
        crate::log_info!("Saved preset \"{}\" ({})", name, id);
        Ok(id)
    }

    /// Add to the library and persist it.  The library is left untouched
    /// when writing fails.
    fn add_preset(&mut self, preset: Preset) -> Result<i64, PipelineError> {
        let id = self.presets.add(preset);
        if let Err(e) = self.persist_presets() {
            crate::log_err!("Persisting preset {} failed: {}", id, e);
            let _ = self.presets.remove(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Replace the layer stack and globals with a stored preset.
    pub fn load_preset(&mut self, id: i64) -> Result<(), PipelineError> {
        let preset = self.presets.get(id).ok_or(PipelineError::PresetNotFound(id))?;
        let loaded = preset.load().inspect_err(|e| {
            crate::log_err!("Loading preset {} failed: {}", id, e);
        })?;
        self.store = LayerStore::from_snapshot(
            loaded.snapshot,
            self.settings.compose_options(),
            LayerDefaults::from_settings(&self.settings),
        );
        self.globals = loaded.globals;
        self.mark_dirty();
        Ok(())
    }

    /// Replay a stored preset on a new image.  Recoverable per-layer problems
    /// are reported, not fatal.
    pub fn apply_preset_with_image(
        &mut self,
        id: i64,
        image: ImageSource,
    ) -> Result<ApplyReport, PipelineError> {
        let preset = self.presets.get(id).ok_or(PipelineError::PresetNotFound(id))?;
        let report = preset
            .apply_with_new_image(&image, &self.settings.compose_options())
            .inspect_err(|e| {
                crate::log_err!("Applying preset {} failed: {}", id, e);
            })?;
        self.store = LayerStore::from_snapshot(
            report.loaded.snapshot.clone(),
            self.settings.compose_options(),
            LayerDefaults::from_settings(&self.settings),
        );
        self.globals = report.loaded.globals.clone();
        self.mark_dirty();
        Ok(report)
    }

    pub fn delete_preset(&mut self, id: i64) -> Result<Preset, PipelineError> {
        let removed = self.presets.remove(id)?;
        self.persist_presets()?;
        Ok(removed)
    }

    /// Add an exported preset file to the library.
    pub fn import_preset(&mut self, json: &str) -> Result<i64, PipelineError> {
        let preset = Preset::import_document(json)?;
        self.add_preset(preset)
    }

    pub fn export_preset(&self, id: i64) -> Result<String, PipelineError> {
        self.presets
            .get(id)
            .ok_or(PipelineError::PresetNotFound(id))?
            .export_document()
    }

    /// Write the library to the storage directory.  No-op when in memory.
    pub fn persist_presets(&self) -> Result<Option<PathBuf>, PipelineError> {
        let Some(dir) = &self.storage_dir else {
            return Ok(None);
        };
        let path = self.presets.save_to(dir, &self.settings.preset_storage_key)?;
        Ok(Some(path))
    }

    /// Reload the library from the storage directory.
    pub fn restore_presets(&mut self) -> Result<(), PipelineError> {
        if let Some(dir) = &self.storage_dir {
            self.presets = PresetLibrary::load_from(dir, &self.settings.preset_storage_key)?;
        }
        Ok(())
    }

    // --- dirty tracking ---

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }
}
