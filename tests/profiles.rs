use bunker_transcode::NativeEngine;
use bunker_transcode::config::{AudioOutputConfig, TranscodeConfig, expand_inputs};
use bunker_transcode::presets::{PRESET_NAMES, generate_preset};
use bunker_transcode::validation::validate_config;
use tempfile::tempdir;

#[test]
fn every_preset_loads_and_validates() {
    let temp = tempdir().unwrap();
    let engine = NativeEngine::initialize();
    for name in PRESET_NAMES {
        let path = temp.path().join("profiles").join(format!("{name}.yaml"));
        let written = generate_preset(name, &path).unwrap();
        assert_eq!(written, path);

        let config = TranscodeConfig::load(&path).unwrap();
        let report = validate_config(&config, &engine);
        assert!(report.is_ok(), "{name}: {:?}", report.errors);
    }
}

#[test]
fn unknown_preset_is_rejected() {
    let temp = tempdir().unwrap();
    let err = generate_preset("cinema", &temp.path().join("x.yaml")).unwrap_err();
    assert!(err.to_string().contains("Unknown preset"));
}

#[test]
fn validation_collects_every_problem() {
    let engine = NativeEngine::initialize();
    let mut config = TranscodeConfig::new("matroska");
    config.version = 2;
    let report = validate_config(&config, &engine);
    // version, container, no output section
    assert_eq!(report.errors.len(), 3, "{:?}", report.errors);

    config = TranscodeConfig::new("video/x-bmx");
    config.audio = Some(AudioOutputConfig {
        codec: Some("opus".into()),
        sample_rate: Some(0),
        ..AudioOutputConfig::default()
    });
    let report = validate_config(&config, &engine);
    assert_eq!(report.errors.len(), 2, "{:?}", report.errors);
    assert!(report.errors[0].contains("opus"));
}

#[test]
fn copy_sections_only_warn_about_ignored_settings() {
    let engine = NativeEngine::initialize();
    let config = TranscodeConfig::from_yaml(
        "version: 1\ncontainer_format: bmx\naudio:\n  copy: true\n  codec: pcm_u8\n",
    )
    .unwrap();
    let report = validate_config(&config, &engine);
    assert!(report.is_ok());
    assert_eq!(report.warnings.len(), 1);
}

#[test]
fn load_reports_the_offending_file() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("broken.yaml");
    std::fs::write(&path, "version: [1\n").unwrap();
    let err = TranscodeConfig::load(&path).unwrap_err();
    assert!(format!("{err:#}").contains("broken.yaml"));
}

#[test]
fn input_globs_expand_to_files() {
    let temp = tempdir().unwrap();
    for name in ["a.bmx", "b.bmx", "notes.txt"] {
        std::fs::write(temp.path().join(name), b"x").unwrap();
    }
    let pattern = temp.path().join("*.bmx").to_string_lossy().into_owned();
    let files = expand_inputs(&[pattern]).unwrap();
    assert_eq!(files.len(), 2);

    let missing = temp.path().join("*.wav").to_string_lossy().into_owned();
    assert!(expand_inputs(&[missing]).is_err());
}
