use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// A font source directory with two families and a config pointing at it.
fn create_font_fixture(root: &Path) -> std::path::PathBuf {
    let fonts = root.join("fonts");
    fs::create_dir_all(&fonts).expect("create font dir");
    fs::write(fonts.join("Zephyr-Regular.ttf"), b"zephyr regular").expect("write font");
    fs::write(fonts.join("Zephyr-Bold.ttf"), b"zephyr bold").expect("write font");
    fs::write(fonts.join("Quill.otf"), b"quill").expect("write font");
    fs::write(fonts.join("notes.txt"), b"not a font").expect("write note");

    let config = root.join("config.yaml");
    fs::write(
        &config,
        format!(
            "discovery:\n  sources:\n    - {}\n  exclusions: []\n",
            fonts.display()
        ),
    )
    .expect("write config");
    config
}

fn archive_exists(dir: &Path, family: &str) -> bool {
    dir.join(format!("{family}.7z")).is_file() || dir.join(format!("{family}.zip")).is_file()
}

#[test]
fn help_lists_both_subcommands() {
    Command::cargo_bin("font-archiver")
        .expect("Binary exists")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("archive").and(predicate::str::contains("sync")));
}

#[test]
fn archive_builds_one_archive_per_family() {
    let tmp = TempDir::new().expect("temp dir");
    let config = create_font_fixture(tmp.path());
    let out = tmp.path().join("out");

    Command::cargo_bin("font-archiver")
        .expect("Binary exists")
        .env("TMPDIR", tmp.path())
        .arg("archive")
        .arg("--config")
        .arg(&config)
        .arg("--output-dir")
        .arg(&out)
        .arg("--concurrency")
        .arg("2")
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 3 fonts in 2 families"));

    assert!(archive_exists(&out, "Zephyr"));
    assert!(archive_exists(&out, "Quill"));
}

#[test]
fn archive_fails_on_missing_config() {
    let tmp = TempDir::new().expect("temp dir");

    Command::cargo_bin("font-archiver")
        .expect("Binary exists")
        .env("TMPDIR", tmp.path())
        .arg("archive")
        .arg("--config")
        .arg(tmp.path().join("absent.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn sync_without_token_fails_before_archiving() {
    let tmp = TempDir::new().expect("temp dir");
    let config = create_font_fixture(tmp.path());
    let out = tmp.path().join("out");

    Command::cargo_bin("font-archiver")
        .expect("Binary exists")
        .current_dir(tmp.path())
        .env("TMPDIR", tmp.path())
        .env_remove("GITHUB_TOKEN")
        .arg("sync")
        .arg("--config")
        .arg(&config)
        .arg("--output-dir")
        .arg(&out)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No GitHub token"));

    assert!(!out.exists(), "no archives are built without a token");
}

#[test]
fn append_and_replace_conflict() {
    Command::cargo_bin("font-archiver")
        .expect("Binary exists")
        .args(["sync", "--config", "config.yaml", "--append", "--replace"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{event:?}"));
    }
}

#[tokio::test]
async fn run_emits_archive_events() {
    use font_archiver::cli::{run, Cli, Commands, RunArgs};

    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriber = Registry::default().with(EventCollector {
        events: events.clone(),
    });
    let _guard = tracing::subscriber::set_default(subscriber);

    let tmp = TempDir::new().expect("temp dir");
    let config = create_font_fixture(tmp.path());
    let run_dir = tmp.path().join("run");
    fs::create_dir_all(&run_dir).unwrap();

    let cli = Cli {
        command: Commands::Archive {
            config,
            run: RunArgs {
                concurrency: Some(1),
                ..RunArgs::default()
            },
        },
    };
    run(cli, run_dir.clone()).await.expect("archive run succeeds");

    assert!(archive_exists(&run_dir.join("archives"), "Zephyr"));
    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("Starting archive run")),
        "Expected a 'Starting archive run' event, got: {:?}",
        event_msgs
    );
}

/// Puts every `.ttf` into one family and leaves the rest to the file name.
struct TtfFamily;

impl font_archiver_core::contract::Classifier for TtfFamily {
    fn classify(&self, path: &Path) -> Option<String> {
        (path.extension()? == "ttf").then(|| "Zephyr Family".to_string())
    }
}

#[tokio::test]
async fn custom_classifier_decides_the_groups() {
    use font_archiver::cli::{run_with_classifier, Cli, Commands, RunArgs};

    let tmp = TempDir::new().expect("temp dir");
    let config = create_font_fixture(tmp.path());
    let run_dir = tmp.path().join("run");
    fs::create_dir_all(&run_dir).unwrap();

    let cli = Cli {
        command: Commands::Archive {
            config,
            run: RunArgs {
                concurrency: Some(1),
                ..RunArgs::default()
            },
        },
    };
    run_with_classifier(cli, run_dir.clone(), &TtfFamily)
        .await
        .expect("archive run succeeds");

    let archives = run_dir.join("archives");
    assert!(archive_exists(&archives, "Zephyr_Family"));
    assert!(archive_exists(&archives, "Quill"));
    assert!(!archive_exists(&archives, "Zephyr"));
}
