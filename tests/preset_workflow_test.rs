use decalfe::io::encode_png;
use decalfe::layer::Layer;
use decalfe::ops::compose::ComposeOptions;
use decalfe::ops::crop::LegacyCrop;
use decalfe::preset::{DEFAULT_COLOR, PresetData};
use decalfe::store::StoreSnapshot;
use decalfe::{
    BlendMode, CropInfo, GlobalState, ImageSource, LayerProperty, LayerStore, PipelineError,
    PipelineSettings, Preset, PresetLibrary, Project,
};
use image::{Rgba, RgbaImage};

fn png(w: u32, h: u32) -> ImageSource {
    let img = RgbaImage::from_fn(w, h, |x, y| Rgba([(x % 251) as u8, (y % 251) as u8, 60, 255]));
    ImageSource::png(encode_png(&img).unwrap())
}

fn dims(image: &Option<ImageSource>) -> Option<(u32, u32)> {
    image.as_ref().and_then(ImageSource::dimensions)
}

/// Store with `n` layers in distinct placements, every other one cropped.
fn populated_store(n: usize) -> LayerStore {
    let mut store = LayerStore::default();
    for i in 0..n {
        let crop = (i % 2 == 0).then(|| CropInfo::natural(10.0, 10.0, 100.0, 100.0, 400, 400));
        let id = store.create(png(400, 400), None, crop, None).layer_id;
        let f = i as f32;
        store.set_property(id, LayerProperty::Position([0.1 * f, -0.05 * f, 0.3]));
        store.set_property(id, LayerProperty::Scale([0.2 + 0.01 * f; 3]));
        store.set_property(id, LayerProperty::Opacity(1.0 - 0.1 * f));
        store.set_property(id, LayerProperty::BorderRadius((i * 10) as u8));
        store.set_property(id, LayerProperty::TargetSurfaces([0, i as u32].into()));
    }
    if n > 1 {
        store.set_property(2, LayerProperty::BlendMode(BlendMode::Multiply));
        store.delete(1);
    }
    store
}

fn custom_globals() -> GlobalState {
    GlobalState {
        color: "#123456".into(),
        selected_clothing: "hoodie".into(),
        is_full_texture: true,
        front_text: "Team".into(),
        back_logo_decal: Some(png(16, 16)),
        ..GlobalState::default()
    }
}

#[test]
fn save_then_load_reconstructs_the_store() {
    for n in [0, 1, 4] {
        let store = populated_store(n);
        let globals = custom_globals();
        let preset = Preset::save("round trip", &store.snapshot(), &globals);

        let reread = Preset::from_json(&preset.to_json().unwrap()).unwrap();
        let loaded = reread.load().unwrap();
        let restored =
            LayerStore::from_snapshot(loaded.snapshot, ComposeOptions::default(), Default::default());

        assert_eq!(restored.layers(), store.layers(), "{} layer(s)", n);
        assert_eq!(restored.active_layer_id(), store.active_layer_id());
        assert_eq!(restored.next_layer_id(), store.next_layer_id());
        assert_eq!(loaded.globals, globals);
    }
}

#[test]
fn settings_only_export_drops_images_and_refuses_load() {
    let store = populated_store(3);
    let preset = Preset::save("full", &store.snapshot(), &custom_globals());
    let lite = preset.export_settings_only();

    assert!(lite.settings_only);
    assert!(!preset.settings_only);
    assert!(
        lite.data
            .layers
            .iter()
            .all(|l| l.image.is_none() && l.original_image.is_none())
    );
    assert!(lite.data.globals.back_logo_decal.is_none());
    // Path references are not payloads.
    assert_eq!(lite.data.globals.front_logo_decal, preset.data.globals.front_logo_decal);

    assert!(matches!(lite.load(), Err(PipelineError::SettingsOnlyCannotLoad)));

    let json = lite.to_json().unwrap();
    assert!(json.contains("\"settingsOnly\": true"));
    let reread = Preset::from_json(&json).unwrap();
    assert!(matches!(reread.load(), Err(PipelineError::SettingsOnlyCannotLoad)));
}

#[test]
fn apply_with_new_image_keeps_placement() {
    let store = populated_store(4);
    let preset = Preset::save("art", &store.snapshot(), &custom_globals()).export_settings_only();
    let new_art = png(800, 800);

    let report = preset
        .apply_with_new_image(&new_art, &ComposeOptions::default())
        .unwrap();
    assert!(report.warnings.is_empty());
    assert!(report.clamped.is_empty());

    let applied = &report.loaded.snapshot.layers;
    assert_eq!(applied.len(), store.len());
    for (after, before) in applied.iter().zip(store.layers()) {
        assert_eq!(after.id, before.id);
        assert_eq!(after.position, before.position);
        assert_eq!(after.scale, before.scale);
        assert_eq!(after.opacity, before.opacity);
        assert_eq!(after.border_radius, before.border_radius);
        assert_eq!(after.target_surface_ids, before.target_surface_ids);
        assert_eq!(after.blend_mode, before.blend_mode);
        assert_eq!(after.crop_info, before.crop_info);
        assert_eq!(after.original_image, Some(new_art.clone()));

        let expected = if before.crop_info.is_some() { (200, 200) } else { (800, 800) };
        assert_eq!(dims(&after.image), Some(expected));
    }
}

#[test]
fn unmasked_uncropped_layers_take_the_new_image_verbatim() {
    let mut store = LayerStore::default();
    store.create(png(40, 40), None, None, None);
    let preset = Preset::save("plain", &store.snapshot(), &GlobalState::default());
    let new_art = png(50, 30);

    let report = preset
        .apply_with_new_image(&new_art, &ComposeOptions::default())
        .unwrap();
    assert_eq!(report.loaded.snapshot.layers[0].image, Some(new_art));
}

#[test]
fn legacy_display_crops_are_estimated() {
    let layer = Layer {
        id: 1,
        crop_info: Some(CropInfo::LegacyDisplay(LegacyCrop {
            x: 50.0,
            y: 50.0,
            width: 100.0,
            height: 100.0,
            natural_width: Some(1600),
            natural_height: Some(1200),
        })),
        // The texture this crop produced when it was made.
        image: Some(png(400, 400)),
        ..Layer::default()
    };
    let preset = Preset::save(
        "legacy",
        &StoreSnapshot {
            layers: vec![layer],
            next_layer_id: 2,
            active_layer_id: Some(1),
        },
        &GlobalState::default(),
    );

    let report = preset
        .apply_with_new_image(&png(1600, 1200), &ComposeOptions::default())
        .unwrap();
    assert_eq!(report.estimated, vec![1]);
    assert_eq!(dims(&report.loaded.snapshot.layers[0].image), Some((400, 400)));
}

#[test]
fn newer_schemas_are_rejected() {
    let mut preset = Preset::save("future", &populated_store(1).snapshot(), &GlobalState::default());
    preset.version = "3.0".into();

    assert!(matches!(preset.load(), Err(PipelineError::UnsupportedSchema { .. })));
    assert!(matches!(
        preset.apply_with_new_image(&png(8, 8), &ComposeOptions::default()),
        Err(PipelineError::UnsupportedSchema { .. })
    ));
}

#[test]
fn failed_loads_leave_the_project_untouched() {
    let mut project = Project::new("Shirt", PipelineSettings::default());
    project.store_mut().create(png(20, 20), Some("Keep me".into()), None, None);
    let settings_only = project.save_preset("lite", true).unwrap();

    let mut future = Preset::save("future", &StoreSnapshot::default(), &GlobalState::default());
    future.version = "9.1".into();
    let future = project
        .import_preset(&future.to_json().unwrap())
        .unwrap();

    let before = project.store().layers().to_vec();
    project.globals_mut().color = "#000000".into();

    assert!(matches!(
        project.load_preset(settings_only),
        Err(PipelineError::SettingsOnlyCannotLoad)
    ));
    assert!(matches!(
        project.apply_preset_with_image(future, png(10, 10)),
        Err(PipelineError::UnsupportedSchema { .. })
    ));
    assert!(matches!(
        project.load_preset(424242),
        Err(PipelineError::PresetNotFound(424242))
    ));

    assert_eq!(project.store().layers(), before.as_slice());
    assert_eq!(project.globals().color, "#000000");
}

#[test]
fn project_applies_settings_only_presets_to_new_art() {
    let mut project = Project::new("Shirt", PipelineSettings::default());
    let crop = CropInfo::natural(10.0, 10.0, 100.0, 100.0, 400, 400);
    project.store_mut().create(png(400, 400), None, Some(crop), None);
    let id = project.save_preset("lite", true).unwrap();

    project.store_mut().delete(1);
    project.mark_clean();

    let report = project.apply_preset_with_image(id, png(800, 800)).unwrap();
    assert!(report.warnings.is_empty());
    assert!(project.is_dirty);
    assert_eq!(project.display_title(), "Shirt*");
    let layer = &project.store().layers()[0];
    assert_eq!(dims(&layer.image), Some((200, 200)));
    assert_eq!(project.store().active_layer_id(), Some(layer.id));
}

#[test]
fn bare_legacy_exports_import_as_schema_one() {
    let json = r##"{
        "layers": [
            {"id": 3, "name": "Old", "image": "./old.png", "opacity": 0.5,
             "position": [0, 0.1, 0.3], "rotation": [0, 0, 0], "scale": [0.3, 0.3, 0.3],
             "visible": true, "cropInfo": null}
        ],
        "fullTexturePosition": [0, 0, 0],
        "fullTextureRotation": [0, 0, 0],
        "fullTextureScale": [1, 1, 1],
        "color": "#ff0000"
    }"##;
    let preset = Preset::import_document(json).unwrap();
    assert_eq!(preset.version, "1.0");

    let loaded = preset.load().unwrap();
    assert_eq!(loaded.globals.color, "#ff0000");
    assert_eq!(loaded.globals.selected_clothing, "tshirt");
    let layer = &loaded.snapshot.layers[0];
    assert_eq!(layer.original_image, Some(ImageSource::uri("./old.png")));
    assert_eq!(loaded.snapshot.next_layer_id, 4);
    assert_eq!(loaded.snapshot.active_layer_id, Some(3));
}

#[test]
fn load_repairs_inconsistent_documents() {
    let data = PresetData {
        layers: vec![
            Layer { id: 5, ..Layer::default() },
            Layer { id: 5, ..Layer::default() },
        ],
        next_layer_id: Some(2),
        active_layer_id: Some(77),
        globals: GlobalState::default(),
    };
    let preset = Preset {
        id: 1,
        name: "broken".into(),
        date: String::new(),
        version: "2.0".into(),
        settings_only: false,
        data,
    };

    let snapshot = preset.load().unwrap().snapshot;
    let ids: Vec<_> = snapshot.layers.iter().map(|l| l.id).collect();
    assert_eq!(ids, vec![5, 6]);
    assert_eq!(snapshot.next_layer_id, 7);
    assert_eq!(snapshot.active_layer_id, Some(5));
    assert!(snapshot.layers.iter().all(|l| !l.source_image_id.is_empty()));
}

#[test]
fn preset_library_persists_under_the_storage_key() {
    let dir = tempfile::tempdir().unwrap();
    let settings = PipelineSettings::default();
    settings.save(&dir.path().join(decalfe::project::SETTINGS_FILE)).unwrap();

    let id = {
        let mut project = Project::open("Shirt", dir.path()).unwrap();
        project.store_mut().create(png(12, 12), None, None, None);
        project.save_preset("kept", false).unwrap()
    };
    let path = PresetLibrary::storage_path(dir.path(), "clothingPresets");
    assert!(path.exists());

    let mut project = Project::open("Shirt", dir.path()).unwrap();
    assert_eq!(project.presets().len(), 1);
    project.load_preset(id).unwrap();
    assert_eq!(project.store().len(), 1);
    assert_eq!(project.globals().color, DEFAULT_COLOR);

    project.delete_preset(id).unwrap();
    let reloaded = PresetLibrary::load_from(dir.path(), "clothingPresets").unwrap();
    assert!(reloaded.is_empty());
}

#[test]
fn exported_documents_round_trip_through_import() {
    let mut project = Project::new("Shirt", PipelineSettings::default());
    project.store_mut().create(png(30, 30), Some("Front".into()), None, None);
    let id = project.save_preset("share", false).unwrap();
    let json = project.export_preset(id).unwrap();

    let mut other = Project::new("Other", PipelineSettings::default());
    let imported = other.import_preset(&json).unwrap();
    other.load_preset(imported).unwrap();
    assert_eq!(other.store().layers(), project.store().layers());
}

#[test]
fn malformed_fields_fall_back_without_losing_the_preset() {
    let json = r##"{
        "id": 9,
        "name": "partly broken",
        "version": "2.0",
        "data": {
            "layers": [
                {"id": 1, "opacity": 0.5, "image": "./good.png"},
                {"id": 2, "name": "Bent", "position": "oops",
                 "cropInfo": {"x": "left", "y": 0, "width": 10, "height": 10}},
                "not a layer"
            ],
            "color": "#112233",
            "frontLogoScale": [1, 2],
            "frontText": 42
        }
    }"##;
    let preset = Preset::from_json(json).unwrap();
    assert_eq!(preset.name, "partly broken");

    let layers = &preset.data.layers;
    assert_eq!(layers.len(), 2);
    assert_eq!(layers[0].opacity, 0.5);
    assert_eq!(layers[0].image, Some(ImageSource::uri("./good.png")));

    let defaults = Layer::default();
    assert_eq!(layers[1].name, "Bent");
    assert_eq!(layers[1].position, defaults.position);
    assert!(layers[1].crop_info.is_none());

    let globals = &preset.data.globals;
    let default_globals = GlobalState::default();
    assert_eq!(globals.color, "#112233");
    assert_eq!(globals.front_logo_scale, default_globals.front_logo_scale);
    assert_eq!(globals.front_text, default_globals.front_text);

    // The same document stored in a library is kept, not skipped.
    let library = PresetLibrary::from_json(&format!("[{}]", json)).unwrap();
    assert_eq!(library.len(), 1);
    assert_eq!(library.presets()[0].data.layers.len(), 2);
}

#[test]
fn malformed_fields_in_bare_legacy_exports_are_dropped() {
    let json = r##"{
        "layers": [{"id": 1, "opacity": 0.5}, {"id": 2, "position": "oops"}],
        "color": "#112233",
        "fullTextureScale": [1, 2]
    }"##;
    let preset = Preset::import_document(json).unwrap();
    assert_eq!(preset.data.layers.len(), 2);
    assert_eq!(preset.data.layers[0].opacity, 0.5);
    assert_eq!(preset.data.globals.color, "#112233");
    assert_eq!(preset.data.globals.full_texture_scale, [1.0, 1.0, 1.0]);
}

#[test]
fn failed_writes_leave_the_library_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let mut project = Project::open("Shirt", dir.path()).unwrap();
    project.store_mut().create(png(12, 12), None, None, None);

    // A directory where the library file belongs makes every write fail.
    std::fs::create_dir(PresetLibrary::storage_path(dir.path(), "clothingPresets")).unwrap();

    assert!(matches!(
        project.save_preset("unsaved", false),
        Err(PipelineError::Io(_))
    ));
    assert!(project.presets().is_empty());

    let doc = Preset::save("shared", &project.store().snapshot(), &GlobalState::default());
    assert!(project.import_preset(&doc.to_json().unwrap()).is_err());
    assert!(project.presets().is_empty());
}
