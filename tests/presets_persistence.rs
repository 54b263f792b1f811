use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use gradient_studio::config::EditorConfig;
use gradient_studio::engine::{SoftwareEngine, Surface};
use gradient_studio::error_codes::ErrorCode;
use gradient_studio::events::{EditorEvent, EventKind};
use gradient_studio::gradient::ColorStop;
use gradient_studio::params::{ParamKey, ParamValue, ParameterSet};
use gradient_studio::presets::preset_file_name;
use gradient_studio::{FacadeContext, ShaderFacade, UpdateOptions};
use serde_json::Value;
use tempfile::tempdir;

fn facade_for(dir: &Path) -> ShaderFacade<SoftwareEngine> {
    let mut config = EditorConfig::default();
    config.presets.directory = Some(dir.to_path_buf());
    let context = FacadeContext::from_config(&config).expect("context should load");

    let mut params = ParameterSet::defaults();
    params.set(ParamKey::PlaneSegments, ParamValue::Number(8.0));
    let mut facade = ShaderFacade::new(SoftwareEngine::new(params), context);
    facade
        .initialize(Surface::new("presets", 16, 16))
        .expect("facade should initialize");
    facade
}

fn error_log(facade: &mut ShaderFacade<SoftwareEngine>) -> Rc<RefCell<Vec<ErrorCode>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    facade.on(EventKind::Error, move |event| {
        if let EditorEvent::Error(error) = event {
            sink.borrow_mut().extend(error.code);
        }
        Ok(())
    });
    log
}

#[test]
fn saved_preset_survives_a_new_session() {
    let dir = tempdir().expect("tempdir should create");

    let mut first = facade_for(dir.path());
    first
        .update_param(
            ParamKey::Color3,
            ParamValue::text("#0a0b0c"),
            UpdateOptions::default(),
        )
        .expect("update");
    first
        .set_color_stops(Some(vec![
            ColorStop::new(0.0, "#000000"),
            ColorStop::new(0.5, "#808080"),
            ColorStop::new(1.0, "#ffffff"),
        ]))
        .expect("stops");
    assert!(first.save_preset("Night Drive", "dark ramp").expect("save"));
    first.dispose();

    let file = dir.path().join(preset_file_name("Night Drive"));
    assert!(file.ends_with("night-drive.json"));
    let saved: Value =
        serde_json::from_str(&fs::read_to_string(&file).expect("preset file should exist"))
            .expect("preset should be json");
    assert_eq!(saved["name"], "Night Drive");
    assert_eq!(saved["values"]["color3"], "#0a0b0c");
    assert_eq!(saved["colorStops"].as_array().map(Vec::len), Some(3));

    let mut second = facade_for(dir.path());
    let preset = second
        .get_available_presets()
        .expect("presets")
        .iter()
        .find(|preset| preset.name == "Night Drive")
        .cloned()
        .expect("preset should load from disk");
    assert!(!preset.builtin);
    assert!(preset.created_at.is_some());

    assert!(second.apply_preset("Night Drive").expect("apply"));
    assert_eq!(
        second.get_param(ParamKey::Color3).expect("param"),
        ParamValue::text("#0a0b0c")
    );
    assert_eq!(
        second.color_stops().expect("stops").map(|stops| stops.len()),
        Some(3)
    );
}

#[test]
fn deleting_a_user_preset_removes_its_file() {
    let dir = tempdir().expect("tempdir should create");
    let mut facade = facade_for(dir.path());
    assert!(facade.save_preset("scratch", "").expect("save"));
    let file = dir.path().join("scratch.json");
    assert!(file.exists());

    assert!(facade.delete_preset("scratch").expect("delete"));
    assert!(!file.exists());

    let errors = error_log(&mut facade);
    assert!(!facade.delete_preset("scratch").expect("delete again"));
    assert_eq!(*errors.borrow(), vec![ErrorCode::PresetNotFound]);
}

#[test]
fn builtin_names_cannot_be_overwritten() {
    let dir = tempdir().expect("tempdir should create");
    let mut facade = facade_for(dir.path());
    let errors = error_log(&mut facade);

    assert!(!facade.save_preset("aurora", "mine now").expect("save"));
    assert_eq!(*errors.borrow(), vec![ErrorCode::PresetSaveError]);
    assert!(!dir.path().join("aurora.json").exists());
}

#[test]
fn broken_and_shadowing_files_are_skipped_on_load() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(dir.path().join("broken.json"), "{ not json").expect("write");
    fs::write(
        dir.path().join("out-of-range.json"),
        r#"{ "name": "hot", "values": { "diffuseIntensity": 9.0 } }"#,
    )
    .expect("write");
    fs::write(
        dir.path().join("sunset.json"),
        r##"{ "name": "sunset", "values": { "color1": "#000000" } }"##,
    )
    .expect("write");
    fs::write(
        dir.path().join("fine.json"),
        r##"{ "name": "fine", "description": "ok", "values": { "color1": "#abcdef" } }"##,
    )
    .expect("write");
    fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

    let mut facade = facade_for(dir.path());
    let names: Vec<String> = facade
        .get_available_presets()
        .expect("presets")
        .iter()
        .filter(|preset| !preset.builtin)
        .map(|preset| preset.name.clone())
        .collect();
    assert_eq!(names, vec!["fine".to_owned()]);

    assert!(facade.apply_preset("sunset").expect("apply"));
    assert_ne!(
        facade.get_param(ParamKey::Color1).expect("param"),
        ParamValue::text("#000000"),
        "built-in sunset must win over the shadowing file"
    );
}

#[test]
fn user_presets_sort_after_builtins() {
    let dir = tempdir().expect("tempdir should create");
    let mut facade = facade_for(dir.path());
    for name in ["zeta", "alpha"] {
        assert!(facade.save_preset(name, "").expect("save"));
    }
    let presets = facade.get_available_presets().expect("presets");
    let first_user = presets
        .iter()
        .position(|preset| !preset.builtin)
        .expect("user presets");
    assert!(presets[..first_user].iter().all(|preset| preset.builtin));
    let user: Vec<_> = presets[first_user..]
        .iter()
        .map(|preset| preset.name.as_str())
        .collect();
    assert_eq!(user, vec!["alpha", "zeta"]);
}
