//! End-to-end pipeline runs with a fake checkout backend and real shell commands

use pcd_builder::{BuildError, BuildSettings, Pipeline};
use pcd_core::{BuildInstructions, ProgressMarker, Stage};
use pcd_test_utils::{FakeVcs, SAMPLE_INSTRUCTIONS};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;

fn settings(dir: &Path, instructions: &str) -> BuildSettings {
    BuildSettings::new("nightly", BuildInstructions::parse(instructions).unwrap(), dir)
}

#[tokio::test]
async fn builds_deploys_and_runs() {
    let dir = tempfile::tempdir().unwrap();
    let vcs = Arc::new(FakeVcs::new().with_file("README.md", "widget"));
    let pipeline = Pipeline::new(settings(dir.path(), SAMPLE_INSTRUCTIONS)).with_vcs(vcs.clone());

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.repositories_built, vec!["widget"]);
    assert!(report.repositories_skipped.is_empty());
    assert_eq!(report.files_deployed, 1);
    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].exit_code, Some(0));

    let clones = vcs.clones();
    assert_eq!(clones.len(), 1);
    assert_eq!(clones[0].url, "https://github.com/example/widget");
    assert_eq!(clones[0].branch, "main");

    let build_dir = dir.path().join("deploy").join("nightly");
    assert_eq!(
        std::fs::read_to_string(build_dir.join("widget.jar")).unwrap().trim(),
        "built"
    );
    assert_eq!(
        std::fs::read_to_string(build_dir.join("run.log")).unwrap().trim(),
        "started"
    );
    assert!(dir.path().join("github/widget/build-widget.log").is_file());

    let progress = ProgressMarker::new(dir.path());
    for stage in [Stage::Started, Stage::Building, Stage::StartingInstance, Stage::Finished] {
        assert!(progress.indicator_path(stage).is_file(), "{stage:?}");
    }
    assert!(!progress.indicator_path(Stage::Failed).exists());
}

#[tokio::test]
async fn no_run_skips_run_phase() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(settings(dir.path(), SAMPLE_INSTRUCTIONS).with_no_run(true))
        .with_vcs(Arc::new(FakeVcs::new()));

    let report = pipeline.run().await.unwrap();

    assert!(report.steps.is_empty());
    assert!(!dir.path().join("deploy/nightly/run.log").exists());
    let progress = ProgressMarker::new(dir.path());
    assert!(!progress.indicator_path(Stage::StartingInstance).exists());
    assert!(progress.indicator_path(Stage::Finished).is_file());
}

#[tokio::test]
async fn failing_build_marks_failure() {
    let dir = tempfile::tempdir().unwrap();
    let instructions = r#"{"build": [{"repo": "https://github.com/example/broken", "branch": "main", "command": "exit 3"}]}"#;
    let pipeline = Pipeline::new(settings(dir.path(), instructions)).with_vcs(Arc::new(FakeVcs::new()));

    let err = pipeline.run().await.unwrap_err();

    match err {
        BuildError::BuildFailed { repo, status } => {
            assert_eq!(repo, "broken");
            assert_eq!(status, "retcode 3");
        }
        other => panic!("expected BuildFailed, got {other:?}"),
    }
    let progress = ProgressMarker::new(dir.path());
    assert!(progress.indicator_path(Stage::Failed).is_file());
    assert!(!progress.indicator_path(Stage::Finished).exists());
}

#[tokio::test]
async fn continue_on_fail_skips_repository() {
    let dir = tempfile::tempdir().unwrap();
    let instructions = r#"{"build": [
        {"repo": "https://github.com/example/missing", "branch": "gone", "command": "true", "continue_on_fail": true},
        {"repo": "https://github.com/example/widget", "branch": "main", "command": "true"}
    ]}"#;
    let vcs = FakeVcs::new().failing_for("https://github.com/example/missing");
    let pipeline = Pipeline::new(settings(dir.path(), instructions)).with_vcs(Arc::new(vcs));

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.repositories_skipped, vec!["missing"]);
    assert_eq!(report.repositories_built, vec!["widget"]);
}

#[tokio::test]
async fn no_clean_reuses_existing_checkout() {
    let dir = tempfile::tempdir().unwrap();
    let checkout = dir.path().join("github/widget");
    std::fs::create_dir_all(&checkout).unwrap();
    std::fs::write(checkout.join("local.txt"), "kept").unwrap();

    let instructions = r#"{"build": [{"repo": "https://github.com/example/widget", "branch": "main", "command": "test -f local.txt"}]}"#;
    let vcs = Arc::new(FakeVcs::new());
    let pipeline = Pipeline::new(settings(dir.path(), instructions).with_no_clean(true)).with_vcs(vcs.clone());

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.repositories_built, vec!["widget"]);
    assert!(vcs.clones().is_empty());
}

#[tokio::test]
async fn clean_run_wipes_previous_checkouts() {
    let dir = tempfile::tempdir().unwrap();
    let stale = dir.path().join("github/stale");
    std::fs::create_dir_all(&stale).unwrap();

    let pipeline = Pipeline::new(settings(dir.path(), r#"{"build": []}"#)).with_vcs(Arc::new(FakeVcs::new()));
    pipeline.run().await.unwrap();

    assert!(!stale.exists());
    assert!(dir.path().join("github").is_dir());
    assert!(dir.path().join("deploy/nightly").is_dir());
}

#[tokio::test]
async fn run_step_in_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let instructions = r#"{"run": [{"command": "true", "directory": "does-not-exist"}]}"#;
    let pipeline = Pipeline::new(settings(dir.path(), instructions)).with_vcs(Arc::new(FakeVcs::new()));

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, BuildError::MissingWorkDir { .. }), "{err:?}");
}

#[tokio::test]
async fn background_steps_are_awaited() {
    let dir = tempfile::tempdir().unwrap();
    let instructions = r#"{"run": [
        {"command": "sleep 0.1 && echo bg > bg.txt", "run_and_proceed": true},
        {"command": "exit 2"}
    ]}"#;
    let pipeline = Pipeline::new(settings(dir.path(), instructions)).with_vcs(Arc::new(FakeVcs::new()));

    let report = pipeline.run().await.unwrap();

    let codes: Vec<_> = report.steps.iter().map(|s| s.exit_code).collect();
    assert_eq!(codes, vec![Some(0), Some(2)]);
    assert!(dir.path().join("deploy/nightly/bg.txt").is_file());
}

#[tokio::test]
async fn detached_server_is_left_running() {
    let dir = tempfile::tempdir().unwrap();
    let instructions = r#"{"run": [
        {"command": "sleep 60 >/dev/null 2>&1", "detach": true},
        {"command": "echo warm > warm.txt"}
    ]}"#;
    let pipeline = Pipeline::new(settings(dir.path(), instructions)).with_vcs(Arc::new(FakeVcs::new()));

    let report = tokio::time::timeout(std::time::Duration::from_secs(5), pipeline.run())
        .await
        .expect("pipeline waited on a detached process")
        .unwrap();

    let codes: Vec<_> = report.steps.iter().map(|s| s.exit_code).collect();
    assert_eq!(codes, vec![None, Some(0)]);
    assert!(dir.path().join("deploy/nightly/warm.txt").is_file());
    assert!(ProgressMarker::new(dir.path()).indicator_path(Stage::Finished).is_file());
}
