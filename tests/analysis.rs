//! End-to-end pipeline tests over synthetic scenes with deterministic
//! inference backends.
//!
//! Scenarios cover:
//! - A diseased leaf producing a non-healthy diagnosis with severity
//! - A healthy leaf producing severity exactly 0
//! - Blank frames reporting no leaf instead of crashing
//! - Corrupt input failing at decode with no partial result
//! - Determinism of repeated runs on identical input

mod common;

use common::*;
use std::io::Write;
use std::sync::Arc;

#[test]
fn diseased_leaf_yields_anthracnose_with_severity() -> anyhow::Result<()> {
    // 1. Analyze a scene with brown lesions on a green leaf
    let pipeline = test_pipeline(ANTHRACNOSE);
    let result = pipeline.analyze(&diseased_leaf_scene(), None)?;

    // 2. Classification comes from the (mocked) model
    assert_eq!(result.disease, "Anthracnose");
    assert!(result.confidence >= 0.6);
    assert!((result.probabilities.sum() - 1.0).abs() < 1e-4);

    // 3. Severity reflects the lesion fraction, non-healthy and non-zero
    assert!(
        result.severity_percentage >= 10.0 && result.severity_percentage < 100.0,
        "severity was {}",
        result.severity_percentage
    );
    assert_eq!(result.severity_stage, SeverityBucket::EarlyStage);

    Ok(())
}

#[test]
fn healthy_leaf_yields_zero_severity() -> anyhow::Result<()> {
    let pipeline = test_pipeline(HEALTHY);
    let result = pipeline.analyze(&healthy_leaf_scene(), None)?;

    assert_eq!(result.disease, "Healthy");
    assert_eq!(result.severity_percentage, 0.0);
    assert_eq!(result.severity_stage, SeverityBucket::Healthy);

    Ok(())
}

#[test]
fn healthy_prediction_overrides_lesion_pixels() -> anyhow::Result<()> {
    // Even with visible brown stripes, a healthy classification pins
    // severity to exactly zero.
    let pipeline = test_pipeline(HEALTHY);
    let result = pipeline.analyze(&diseased_leaf_scene(), None)?;

    assert_eq!(result.disease, "Healthy");
    assert_eq!(result.severity_percentage, 0.0);
    assert_eq!(result.severity_stage, SeverityBucket::Healthy);

    Ok(())
}

#[test]
fn severity_failure_degrades_to_unknown() -> anyhow::Result<()> {
    // A broken severity stage must never cost the caller the diagnosis:
    // the result still arrives, with severity downgraded to unknown/0%.
    let pipeline =
        test_pipeline(ANTHRACNOSE).with_severity_estimator(Arc::new(FailingSeverity));
    let result = pipeline.analyze(&diseased_leaf_scene(), None)?;

    assert_eq!(result.disease, "Anthracnose");
    assert!(result.confidence >= 0.6);
    assert_eq!(result.severity_stage, SeverityBucket::Unknown);
    assert_eq!(result.severity_percentage, 0.0);

    Ok(())
}

#[test]
fn crop_lies_within_source_bounds() -> anyhow::Result<()> {
    let pipeline = test_pipeline(ANTHRACNOSE);
    let scene = diseased_leaf_scene();
    let (_, crop) = pipeline.analyze_with_crop(&scene, None)?;

    assert!(crop.width() > 0 && crop.height() > 0);
    assert!(crop.bbox.fits_within(scene.width(), scene.height()));
    // The synthetic leaf sits at (100, 75) with size 200x150.
    assert_eq!(crop.bbox.x, 100);
    assert_eq!(crop.bbox.y, 75);
    assert_eq!(crop.bbox.width, 200);
    assert_eq!(crop.bbox.height, 150);

    Ok(())
}

#[test]
fn blank_frame_reports_no_leaf() {
    let pipeline = test_pipeline(ANTHRACNOSE);
    let err = pipeline.analyze(&blank_scene(), None).unwrap_err();
    assert!(matches!(err, AnalysisError::NoLeafDetected));
}

#[test]
fn corrupt_file_fails_at_decode() {
    let pipeline = test_pipeline(ANTHRACNOSE);

    // Zero-byte file
    let empty = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
    let err = pipeline.analyze_file(empty.path()).unwrap_err();
    assert!(matches!(err, AnalysisError::Decode { .. }));

    // Garbage bytes
    let mut garbage = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
    garbage.write_all(b"definitely not a png").unwrap();
    let err = pipeline.analyze_file(garbage.path()).unwrap_err();
    assert!(matches!(err, AnalysisError::Decode { .. }));
}

#[test]
fn repeated_runs_are_byte_identical() -> anyhow::Result<()> {
    let pipeline = test_pipeline(ANTHRACNOSE);
    let scene = diseased_leaf_scene();

    let first = pipeline.analyze(&scene, None)?;
    let second = pipeline.analyze(&scene, None)?;

    assert_eq!(
        serde_json::to_string(&first)?,
        serde_json::to_string(&second)?
    );
    Ok(())
}

#[test]
fn file_analysis_records_the_input_path() -> anyhow::Result<()> {
    let pipeline = test_pipeline(ANTHRACNOSE);
    let file = save_scene(&diseased_leaf_scene());

    let result = pipeline.analyze_file(file.path())?;
    assert_eq!(result.image_path.as_deref(), Some(file.path()));
    assert_eq!(result.disease, "Anthracnose");

    Ok(())
}

#[test]
fn worker_thread_delivers_the_same_result() -> anyhow::Result<()> {
    let pipeline = Arc::new(test_pipeline(ANTHRACNOSE));
    let file = save_scene(&diseased_leaf_scene());

    let direct = pipeline.analyze_file(file.path())?;
    let handle = leafsense::spawn_analysis(pipeline.clone(), file.path().to_path_buf());
    let from_worker = handle.wait()?;

    assert_eq!(
        serde_json::to_string(&direct)?,
        serde_json::to_string(&from_worker)?
    );
    Ok(())
}

#[test]
fn overlapping_requests_do_not_interfere() -> anyhow::Result<()> {
    // The design expects one request per session but must stay sound if a
    // caller overlaps them.
    let pipeline = Arc::new(test_pipeline(ANTHRACNOSE));
    let diseased = save_scene(&diseased_leaf_scene());
    let healthy = save_scene(&healthy_leaf_scene());

    let a = leafsense::spawn_analysis(pipeline.clone(), diseased.path().to_path_buf());
    let b = leafsense::spawn_analysis(pipeline.clone(), healthy.path().to_path_buf());

    let result_a = a.wait()?;
    let result_b = b.wait()?;
    assert_eq!(result_a.disease, "Anthracnose");
    assert_eq!(result_b.disease, "Anthracnose");
    assert!(result_a.severity_percentage > 0.0);

    Ok(())
}
