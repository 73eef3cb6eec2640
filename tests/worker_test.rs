use decalfe::io::encode_png;
use decalfe::ops::compose::{ComposeOptions, compose_source};
use decalfe::layer::LayerDefaults;
use decalfe::worker::CompositeWorker;
use decalfe::{CropInfo, GlobalState, ImageSource, LayerProperty, LayerStore, Preset};
use image::{Rgba, RgbaImage};

fn png(w: u32, h: u32) -> ImageSource {
    let img = RgbaImage::from_fn(w, h, |x, y| Rgba([(x * 3 % 256) as u8, (y * 3 % 256) as u8, 200, 255]));
    ImageSource::png(encode_png(&img).unwrap())
}

fn composed(source: &ImageSource, crop: Option<&CropInfo>, radius: u8) -> ImageSource {
    compose_source(source, crop, radius, &ComposeOptions::default(), None).image
}

#[test]
fn background_results_are_committed_on_poll() {
    let mut store = LayerStore::default();
    let mut worker = CompositeWorker::new(ComposeOptions::default());
    let art = png(64, 64);
    let id = store.create(art.clone(), None, None, None).layer_id;

    assert!(worker.stage(&mut store, id, LayerProperty::BorderRadius(30)));
    assert_eq!(worker.pending(), 1);
    // Not committed until the worker is polled.
    assert_eq!(store.layer(id).unwrap().image, Some(art.clone()));

    let report = worker.wait_all(&mut store);
    assert_eq!(report.applied, vec![id]);
    assert!(report.discarded.is_empty());
    assert_eq!(worker.pending(), 0);
    assert_eq!(store.layer(id).unwrap().image, Some(composed(&art, None, 30)));
}

#[test]
fn placement_edits_queue_nothing() {
    let mut store = LayerStore::default();
    let mut worker = CompositeWorker::new(ComposeOptions::default());
    let id = store.create(png(8, 8), None, None, None).layer_id;

    assert!(worker.stage(&mut store, id, LayerProperty::Opacity(0.5)));
    assert_eq!(worker.pending(), 0);
    assert!(!worker.stage(&mut store, 99, LayerProperty::Opacity(0.5)));
    assert!(worker.poll(&mut store).is_empty());
}

#[test]
fn results_for_deleted_layers_are_dropped() {
    let mut store = LayerStore::default();
    let mut worker = CompositeWorker::new(ComposeOptions::default());
    let id = store.create(png(32, 32), None, None, None).layer_id;
    let keep = store.create(png(32, 32), None, None, None).layer_id;

    let crop = CropInfo::natural(0.0, 0.0, 16.0, 16.0, 32, 32);
    worker.stage(&mut store, id, LayerProperty::CropInfo(Some(crop)));
    store.delete(id);

    let report = worker.wait_all(&mut store);
    assert_eq!(report.discarded, vec![id]);
    assert!(report.applied.is_empty());
    assert!(store.layer(id).is_none());
    assert_eq!(store.len(), 1);
    assert_eq!(store.layers()[0].id, keep);
}

#[test]
fn superseded_results_never_overwrite_newer_edits() {
    let mut store = LayerStore::default();
    let mut worker = CompositeWorker::new(ComposeOptions::default());
    let art = png(48, 32);
    let id = store.create(art.clone(), None, None, None).layer_id;

    worker.stage(&mut store, id, LayerProperty::BorderRadius(10));
    worker.stage(&mut store, id, LayerProperty::BorderRadius(45));

    let report = worker.wait_all(&mut store);
    assert_eq!(report.applied, vec![id]);
    assert_eq!(report.discarded, vec![id]);
    assert_eq!(store.layer(id).unwrap().image, Some(composed(&art, None, 45)));
}

#[test]
fn decode_failures_surface_as_warnings() {
    let mut store = LayerStore::default();
    let mut worker = CompositeWorker::new(ComposeOptions::default());
    let junk = ImageSource::from_bytes(b"garbage".to_vec());
    let id = store.create(junk.clone(), None, None, None).layer_id;

    worker.stage(&mut store, id, LayerProperty::BorderRadius(20));
    let report = worker.wait_all(&mut store);
    assert_eq!(report.applied, vec![id]);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(store.layer(id).unwrap().image, Some(junk));
}

#[test]
fn results_from_before_a_preset_load_are_dropped() {
    let mut store = LayerStore::default();
    let mut worker = CompositeWorker::new(ComposeOptions::default());
    let id = store.create(png(40, 40), None, None, None).layer_id;
    worker.stage(&mut store, id, LayerProperty::BorderRadius(50));

    // The preset's first layer reuses the same id with different art.
    let small = png(10, 10);
    let mut saved = LayerStore::default();
    assert_eq!(saved.create(small.clone(), None, None, None).layer_id, id);
    let loaded = Preset::save("small", &saved.snapshot(), &GlobalState::default())
        .load()
        .unwrap();
    store = LayerStore::from_snapshot(
        loaded.snapshot,
        ComposeOptions::default(),
        LayerDefaults::default(),
    );
    worker.stage(&mut store, id, LayerProperty::BorderRadius(10));

    let report = worker.wait_all(&mut store);
    assert_eq!(report.applied, vec![id]);
    assert_eq!(report.discarded, vec![id]);
    let layer = store.layer(id).unwrap();
    assert_eq!(layer.image, Some(composed(&small, None, 10)));
    assert_eq!(layer.image.as_ref().and_then(ImageSource::dimensions), Some((10, 10)));
}
