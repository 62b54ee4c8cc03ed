// Integration tests for session persistence
// Capture/restore through the file backend, presets and undo history

use mymusic_engine::dispatch::Instrument;
use mymusic_engine::session::LoadOutcome;
use mymusic_engine::{
    Engine, FileBackend, MemoryBackend, MonitorInstrument, NoteFields, Pitch, Preset,
    PresetError, SessionBackend, SessionSnapshot, SessionStore,
};
use serde_json::json;

fn monitor_factory(_: &str, state: &serde_json::Value) -> Box<dyn Instrument> {
    Box::new(MonitorInstrument::with_state(state.clone()))
}

fn note(pitch: &str, start: f64) -> NoteFields {
    NoteFields::new(Pitch::parse(pitch).unwrap(), start, "8n", 0.8)
}

/// Engine with one track and a two-bar timeline holding a few notes
fn populated_engine() -> Engine {
    let mut engine = Engine::default();
    engine.set_tempo(96.0);
    engine.set_octave(3);
    engine
        .dispatcher_mut()
        .add_track(
            "Keys",
            0,
            Box::new(MonitorInstrument::with_state(json!({ "cutoff": 0.4 }))),
        )
        .unwrap();

    let id = engine.create_timeline(2);
    engine.add_note(id, note("C4", 0.0)).unwrap();
    engine.add_note(id, note("E4", 0.5)).unwrap();
    engine.add_note(id, note("G4", 1.25)).unwrap();
    engine.set_humanize(id, true);
    engine
}

#[test]
fn test_round_trip_through_file_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");

    let engine = populated_engine();
    let mut store = SessionStore::new(FileBackend::new(&path), monitor_factory);
    store.save(&engine).unwrap();

    let mut restored = Engine::default();
    let mut reopened = SessionStore::new(FileBackend::new(&path), monitor_factory);
    assert_eq!(reopened.load(&mut restored).unwrap(), LoadOutcome::Restored);

    assert_eq!(restored.tempo(), 96.0);
    assert_eq!(restored.octave(), 3);
    assert_eq!(restored.dispatcher().tracks()[0].name, "Keys");
    assert_eq!(
        restored.dispatcher().tracks()[0].instrument().save_state(),
        json!({ "cutoff": 0.4 })
    );

    let timeline = &restored.timelines()[0];
    assert_eq!(timeline.bars(), 2);
    assert!(timeline.humanize());
    assert!(!timeline.is_playing());
    assert_eq!(timeline.events().len(), 3);
    assert_eq!(store.capture(&engine), reopened.capture(&restored));
}

#[test]
fn test_restored_session_plays() {
    let engine = populated_engine();
    let mut store = SessionStore::new(MemoryBackend::new(), monitor_factory);
    let snapshot = store.capture(&engine);

    let mut restored = Engine::default();
    store.restore(&mut restored, &snapshot);
    let id = restored.timelines()[0].id();
    restored.set_humanize(id, false);

    let monitor = MonitorInstrument::new();
    restored
        .dispatcher_mut()
        .add_track("Probe", 0, Box::new(monitor.clone()))
        .unwrap();
    restored.start_timeline(id);
    restored.advance(1.9);

    let pitches: Vec<String> = monitor
        .attack_releases()
        .into_iter()
        .map(|(pitch, _, _)| pitch)
        .collect();
    assert_eq!(pitches, vec!["C4", "E4", "G4"]);
    assert!(store.save(&restored).is_ok());
}

#[test]
fn test_preset_overwrite_needs_confirmation() {
    let engine = populated_engine();
    let mut store = SessionStore::new(MemoryBackend::new(), monitor_factory);

    let id = store.save_preset("Sketch", &engine).unwrap();
    let original = store.presets().get_by_name("Sketch").unwrap().clone();

    let mut changed = populated_engine();
    changed.set_tempo(140.0);
    assert_eq!(
        store.save_preset("Sketch", &changed),
        Err(PresetError::NameExists("Sketch".to_string()))
    );
    assert_eq!(store.presets().get_by_name("Sketch").unwrap(), &original);

    assert_eq!(store.overwrite_preset("Sketch", &changed).unwrap(), id);
    assert_eq!(
        store
            .presets()
            .user_presets()
            .iter()
            .filter(|p| p.name == "Sketch")
            .count(),
        1
    );
    assert_eq!(store.presets().get_by_id(id).unwrap().snapshot.tempo, 140.0);
}

#[test]
fn test_user_preset_shadows_factory_after_load() {
    let mut custom = SessionSnapshot::default();
    custom.tempo = 77.0;
    let shadow = Preset::new("Bassline", custom);

    let mut seed = SessionStore::new(MemoryBackend::new(), monitor_factory);
    seed.presets_mut().load_user_presets(vec![shadow]);
    seed.save(&Engine::default()).unwrap();

    let mut store = SessionStore::new(seed.backend().clone(), monitor_factory);
    let mut engine = Engine::default();
    store.load(&mut engine).unwrap();

    assert_eq!(
        store.presets().get_by_name("Bassline").unwrap().snapshot.tempo,
        77.0
    );
    let listed: Vec<&str> = store
        .presets()
        .list()
        .into_iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(listed.iter().filter(|name| **name == "Bassline").count(), 1);

    store.load_preset("Bassline", &mut engine).unwrap();
    assert_eq!(engine.tempo(), 77.0);

    store.presets_mut().remove("Bassline").unwrap();
    assert_eq!(
        store.presets().get_by_name("Bassline").unwrap().snapshot.tempo,
        110.0
    );
}

#[test]
fn test_undo_depth_drops_oldest() {
    let mut store = SessionStore::new(MemoryBackend::with_history_depth(2), monitor_factory);
    let mut engine = Engine::default();
    let id = engine.create_timeline(1);

    for _ in 0..3 {
        store.push_undo(&engine).unwrap();
        engine.add_bar(id);
    }
    assert_eq!(engine.timelines()[0].bars(), 4);
    assert_eq!(store.backend().history().undo_len(), 2);

    assert!(store.undo(&mut engine).unwrap());
    assert_eq!(engine.timelines()[0].bars(), 3);
    assert!(store.undo(&mut engine).unwrap());
    assert_eq!(engine.timelines()[0].bars(), 2);
    // The one-bar state fell off the bottom
    assert!(!store.undo(&mut engine).unwrap());
    assert_eq!(engine.timelines()[0].bars(), 2);

    assert!(store.redo(&mut engine).unwrap());
    assert_eq!(engine.timelines()[0].bars(), 3);
}

#[test]
fn test_new_action_clears_redo() {
    let mut store = SessionStore::new(MemoryBackend::new(), monitor_factory);
    let mut engine = Engine::default();

    store.push_undo(&engine).unwrap();
    engine.set_tempo(100.0);
    assert!(store.undo(&mut engine).unwrap());
    assert!(store.can_redo());

    store.push_undo(&engine).unwrap();
    engine.set_tempo(130.0);
    assert!(!store.can_redo());
    assert!(!store.redo(&mut engine).unwrap());
    assert_eq!(engine.tempo(), 130.0);
}

#[test]
fn test_corrupt_file_falls_back_to_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    std::fs::write(&path, b"{\"tempo\": 120, \"timelines\": [").unwrap();

    let mut store = SessionStore::new(FileBackend::new(&path), monitor_factory);
    let mut engine = populated_engine();
    assert_eq!(store.load(&mut engine).unwrap(), LoadOutcome::Defaulted);
    assert!(engine.timelines().is_empty());
    assert!(engine.dispatcher().tracks().is_empty());
    assert_eq!(engine.tempo(), 120.0);

    // The next save replaces the corrupt payload
    store.save(&engine).unwrap();
    let mut backend = FileBackend::new(&path);
    let bytes = backend.load().unwrap().unwrap();
    assert!(serde_json::from_slice::<serde_json::Value>(&bytes).is_ok());
}

#[test]
fn test_document_uses_camel_case_keys() {
    let mut store = SessionStore::new(MemoryBackend::new(), monitor_factory);
    store.save(&populated_engine()).unwrap();

    let bytes = store.backend_mut().load().unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["masterVolumeDb"], json!(-6.0));
    assert_eq!(value["activeChannel"], json!(0));
    assert_eq!(value["timelines"][0]["loop"], json!(true));
    assert_eq!(value["timelines"][0]["events"][1]["pitch"], json!("E4"));
    assert!(value["presets"].as_array().unwrap().is_empty());
}
