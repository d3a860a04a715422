use anyhow::Result;
use label::Vocabulary;
use noisy_float::prelude::*;
use std::fs;
use yolo_dl::{
    anchors::{AnchorSpec, AnchorTable, ScaleAnchors},
    config::{Options, OptionsInit},
    grid::InputSize,
    loss::UnmatchedTruthPolicy,
};

#[test]
fn options_file_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("detector.json5");

    let anchors = AnchorTable::new(vec![ScaleAnchors {
        stride: 32,
        anchors: vec![AnchorSpec::new(40.0, 50.0)?, AnchorSpec::new(90.0, 70.0)?],
    }])?;
    let options = OptionsInit {
        input_size: Some(InputSize { h: 320, w: 256 }),
        anchors: Some(anchors),
        confidence_threshold: Some(r64(0.4)),
        class_aware_nms: Some(true),
        unmatched_truth: Some(UnmatchedTruthPolicy::IgnoreBestCell),
        ..OptionsInit::new(Vocabulary::new(["apple", "pear", "plum"])?)
    }
    .build()?;

    options.save(&path)?;
    let loaded = Options::load(&path)?;
    assert_eq!(loaded, options);

    let inference = loaded.yolo_inference()?;
    assert_eq!(inference.decoder().feature_shapes()?, [[2 * (5 + 3), 10, 8]]);
    Ok(())
}

#[test]
fn hand_written_json5_is_accepted() -> Result<()> {
    let options = OptionsInit::new(Vocabulary::new(["a"])?).build()?;
    let text = options.to_json_string()?;

    // json5 tolerates comments and trailing commas
    let text = format!("// detector options\n{}", text.replacen('}', ",}", 1));
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("options.json5");
    fs::write(&path, text)?;

    assert_eq!(Options::load(&path)?, options);
    Ok(())
}

#[test]
fn missing_file_is_reported() {
    let err = Options::load("/nonexistent/options.json5").unwrap_err();
    assert!(format!("{:#}", err).contains("failed to read options file"));
}
