use std::fs;
use std::sync::{Arc, Mutex};

use font_archiver_core::config::DEFAULT_LARGE_FILE_THRESHOLD;
use font_archiver_core::contract::{
    MockRemoteStore, MockVersionControl, RemoteError, RemoteFile, RepoHandle, VcsError,
};
use font_archiver_core::progress::{PipelineEvent, ProgressCallback};
use font_archiver_core::staging::{EntryKind, ManifestEntry, TransferManifest};
use font_archiver_core::synchronise::{
    publish, route, verify_published, Channel, FileState, PublishOptions, PublishOutcome,
    TransferTier,
};
use tempfile::{tempdir, TempDir};

const THRESHOLD: u64 = 100;

fn handle() -> RepoHandle {
    RepoHandle::new("octo", "Font-Storage")
}

/// README.md (small), Small.zip (small) and Large.7z (at the threshold).
fn manifest() -> (TempDir, TransferManifest) {
    let root = tempdir().unwrap();
    let files = [
        ("README.md", EntryKind::Metadata, 10usize),
        ("Small.zip", EntryKind::Archive, 50),
        ("Large.7z", EntryKind::Archive, THRESHOLD as usize),
    ];
    let entries = files
        .iter()
        .map(|(name, kind, size)| {
            let local_path = root.path().join(name);
            fs::write(&local_path, vec![b'x'; *size]).unwrap();
            ManifestEntry {
                relative_path: name.to_string(),
                local_path,
                size_bytes: *size as u64,
                kind: *kind,
            }
        })
        .collect();
    let manifest = TransferManifest {
        root: root.path().to_path_buf(),
        entries,
    };
    (root, manifest)
}

fn options(use_vcs: bool) -> PublishOptions {
    PublishOptions {
        large_file_threshold: THRESHOLD,
        branch: "main".into(),
        remote_url: "https://example.invalid/octo/Font-Storage.git".into(),
        commit_message: "Add font archives".into(),
        use_vcs,
    }
}

fn written(path: &str) -> RemoteFile {
    RemoteFile {
        path: path.to_string(),
        sha: "new-sha".into(),
        size: 0,
    }
}

fn accepting_store() -> MockRemoteStore {
    let mut store = MockRemoteStore::new();
    store.expect_get_file().returning(|_, _| Ok(None));
    store
        .expect_create_file()
        .returning(|_, path: &str, _, _| Ok(written(path)));
    store
}

fn silent_store() -> MockRemoteStore {
    let mut store = MockRemoteStore::new();
    store.expect_get_file().never();
    store.expect_create_file().never();
    store.expect_update_file().never();
    store
}

struct VcsScript {
    refuse_add: &'static [&'static str],
    has_changes: bool,
    commit_ok: bool,
    push_ok: bool,
    force_push_ok: bool,
}

impl Default for VcsScript {
    fn default() -> Self {
        Self {
            refuse_add: &[],
            has_changes: true,
            commit_ok: true,
            push_ok: true,
            force_push_ok: true,
        }
    }
}

fn failed(command: &str) -> VcsError {
    VcsError::CommandFailed {
        command: command.into(),
        status: "exit status: 1".into(),
        stderr: "rejected".into(),
    }
}

fn vcs(script: VcsScript) -> MockVersionControl {
    let mut vcs = MockVersionControl::new();
    vcs.expect_is_available().return_const(true);
    vcs.expect_init().times(1).returning(|_| Ok(()));
    vcs.expect_lfs_install().times(1).returning(|_| Ok(()));
    vcs.expect_lfs_track().times(2).returning(|_, _| Ok(()));
    vcs.expect_current_branch()
        .returning(|_| Ok(Some("master".into())));
    vcs.expect_create_branch()
        .withf(|_, name: &str| name == "main")
        .times(1)
        .returning(|_, _| Ok(()));
    vcs.expect_add_remote()
        .withf(|_, name: &str, _| name == "origin")
        .times(1)
        .returning(|_, _, _| Ok(()));

    let refuse = script.refuse_add;
    vcs.expect_add().returning(move |_, path: &str| {
        if refuse.iter().any(|r| *r == path) {
            Err(failed("git add"))
        } else {
            Ok(())
        }
    });
    let changed = script.has_changes;
    vcs.expect_has_changes().returning(move |_| Ok(changed));

    if script.has_changes {
        let commit_ok = script.commit_ok;
        vcs.expect_commit()
            .withf(|_, _, allow_empty: &bool| !*allow_empty)
            .times(1)
            .returning(move |_, _, _| {
                if commit_ok {
                    Ok(())
                } else {
                    Err(failed("git commit"))
                }
            });
        vcs.expect_commit()
            .withf(|_, _, allow_empty: &bool| *allow_empty)
            .times(if commit_ok { 0 } else { 1 })
            .returning(|_, _, _| Ok(()));
    } else {
        vcs.expect_commit().never();
    }

    let push_ok = script.push_ok;
    vcs.expect_push()
        .withf(|_, _, _, force: &bool| !*force)
        .times(1)
        .returning(move |_, _, _, _| {
            if push_ok {
                Ok(())
            } else {
                Err(failed("git push"))
            }
        });
    let force_ok = script.force_push_ok;
    vcs.expect_push()
        .withf(|_, _, _, force: &bool| *force)
        .times(if push_ok { 0 } else { 1 })
        .returning(move |_, _, _, _| {
            if force_ok {
                Ok(())
            } else {
                Err(failed("git push --force"))
            }
        });
    vcs
}

fn states(report: &font_archiver_core::synchronise::PublishReport) -> Vec<FileState> {
    report.files.iter().map(|f| f.state.clone()).collect()
}

#[test]
fn tier_boundary_is_inclusive() {
    assert_eq!(
        route(DEFAULT_LARGE_FILE_THRESHOLD, DEFAULT_LARGE_FILE_THRESHOLD),
        TransferTier::LargeStaged
    );
    assert_eq!(
        route(DEFAULT_LARGE_FILE_THRESHOLD - 1, DEFAULT_LARGE_FILE_THRESHOLD),
        TransferTier::SmallDirect
    );
}

#[tokio::test]
async fn staged_push_commits_every_file_without_api_writes() {
    let (_root, manifest) = manifest();
    let store = silent_store();
    let vcs = vcs(VcsScript::default());

    let report = publish(&manifest, &handle(), &store, Some(&vcs), &options(true), None).await;

    assert_eq!(report.outcome, PublishOutcome::Success);
    assert_eq!(states(&report), vec![FileState::Committed(Channel::Staged); 3]);
    let tiers: Vec<TransferTier> = report.files.iter().map(|f| f.tier).collect();
    assert_eq!(
        tiers,
        vec![
            TransferTier::SmallDirect,
            TransferTier::SmallDirect,
            TransferTier::LargeStaged
        ]
    );
}

#[tokio::test]
async fn nothing_to_commit_skips_the_commit() {
    let (_root, manifest) = manifest();
    let store = silent_store();
    let vcs = vcs(VcsScript {
        has_changes: false,
        ..VcsScript::default()
    });

    let report = publish(&manifest, &handle(), &store, Some(&vcs), &options(true), None).await;
    assert_eq!(report.outcome, PublishOutcome::Success);
}

#[tokio::test]
async fn failed_commit_is_retried_as_an_empty_commit() {
    let (_root, manifest) = manifest();
    let store = silent_store();
    let vcs = vcs(VcsScript {
        commit_ok: false,
        ..VcsScript::default()
    });

    let report = publish(&manifest, &handle(), &store, Some(&vcs), &options(true), None).await;
    assert_eq!(report.outcome, PublishOutcome::Success);
}

#[tokio::test]
async fn rejected_push_is_forced() {
    let (_root, manifest) = manifest();
    let store = silent_store();
    let vcs = vcs(VcsScript {
        push_ok: false,
        ..VcsScript::default()
    });

    let report = publish(&manifest, &handle(), &store, Some(&vcs), &options(true), None).await;
    assert_eq!(states(&report), vec![FileState::Committed(Channel::Staged); 3]);
}

#[tokio::test]
async fn failed_forced_push_uploads_the_whole_manifest_directly() {
    let (_root, manifest) = manifest();
    let mut store = MockRemoteStore::new();
    store.expect_get_file().times(3).returning(|_, _| Ok(None));
    store
        .expect_create_file()
        .times(3)
        .returning(|_, path: &str, _, _| Ok(written(path)));
    let vcs = vcs(VcsScript {
        push_ok: false,
        force_push_ok: false,
        ..VcsScript::default()
    });

    let report = publish(&manifest, &handle(), &store, Some(&vcs), &options(true), None).await;

    assert_eq!(report.outcome, PublishOutcome::Success);
    assert_eq!(states(&report), vec![FileState::Committed(Channel::Direct); 3]);
}

#[tokio::test]
async fn large_file_that_cannot_be_staged_goes_through_the_api() {
    let (_root, manifest) = manifest();
    let mut store = MockRemoteStore::new();
    store
        .expect_get_file()
        .withf(|_, path: &str| path == "Large.7z")
        .times(1)
        .returning(|_, _| Ok(None));
    store
        .expect_create_file()
        .withf(|_, path: &str, content: &[u8], message: &str| {
            path == "Large.7z" && content.len() == THRESHOLD as usize && message == "Add Large.7z"
        })
        .times(1)
        .returning(|_, path: &str, _, _| Ok(written(path)));
    let vcs = vcs(VcsScript {
        refuse_add: &["Large.7z"],
        ..VcsScript::default()
    });

    let report = publish(&manifest, &handle(), &store, Some(&vcs), &options(true), None).await;

    assert_eq!(
        states(&report),
        vec![
            FileState::Committed(Channel::Staged),
            FileState::Committed(Channel::Staged),
            FileState::Committed(Channel::Direct),
        ]
    );
}

#[tokio::test]
async fn existing_remote_files_are_updated_with_their_hash() {
    let (_root, manifest) = manifest();
    let mut store = MockRemoteStore::new();
    store.expect_get_file().returning(|_, path: &str| {
        Ok((path == "README.md").then(|| RemoteFile {
            path: path.to_string(),
            sha: "old-sha".into(),
            size: 10,
        }))
    });
    store
        .expect_update_file()
        .withf(|_, path: &str, _, message: &str, sha: &str| {
            path == "README.md" && message == "Update README.md" && sha == "old-sha"
        })
        .times(1)
        .returning(|_, path: &str, _, _, _| Ok(written(path)));
    store
        .expect_create_file()
        .times(2)
        .returning(|_, path: &str, _, _| Ok(written(path)));

    let report = publish(&manifest, &handle(), &store, None, &options(true), None).await;

    assert_eq!(report.outcome, PublishOutcome::Success);
    assert_eq!(states(&report), vec![FileState::Committed(Channel::Direct); 3]);
}

#[tokio::test]
async fn one_failed_write_leaves_the_rest_and_reports_partial() {
    let (_root, manifest) = manifest();
    let mut store = MockRemoteStore::new();
    store.expect_get_file().times(3).returning(|_, _| Ok(None));
    store
        .expect_create_file()
        .times(3)
        .returning(|_, path: &str, _, _| {
            if path == "Small.zip" {
                Err(RemoteError::Api {
                    status: 422,
                    message: "invalid".into(),
                })
            } else {
                Ok(written(path))
            }
        });
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: ProgressCallback = Box::new(move |event| {
        if let PipelineEvent::FileFailed { path, .. } = event {
            sink.lock().unwrap().push(path);
        }
    });

    let report = publish(&manifest, &handle(), &store, None, &options(false), Some(&callback)).await;

    assert_eq!(report.outcome, PublishOutcome::Partial);
    assert_eq!(report.committed().count(), 2);
    assert!(matches!(report.files[1].state, FileState::Failed(_)));
    assert_eq!(*events.lock().unwrap(), vec!["Small.zip".to_string()]);
}

#[tokio::test]
async fn unavailable_vcs_degrades_to_api_only() {
    let (_root, manifest) = manifest();
    let store = accepting_store();
    let mut vcs = MockVersionControl::new();
    vcs.expect_is_available().return_const(false);
    vcs.expect_init().never();

    let report = publish(&manifest, &handle(), &store, Some(&vcs), &options(true), None).await;

    assert_eq!(report.outcome, PublishOutcome::Success);
    assert_eq!(states(&report), vec![FileState::Committed(Channel::Direct); 3]);
}

fn direct_only_store() -> MockRemoteStore {
    let mut store = MockRemoteStore::new();
    store.expect_get_file().times(3).returning(|_, _| Ok(None));
    store
        .expect_create_file()
        .times(3)
        .returning(|_, path: &str, _, _| Ok(written(path)));
    store
}

/// Nothing past local setup may run once setup has failed.
fn no_staging(vcs: &mut MockVersionControl) {
    vcs.expect_add().never();
    vcs.expect_has_changes().never();
    vcs.expect_commit().never();
    vcs.expect_push().never();
}

#[tokio::test]
async fn failed_init_sends_the_whole_manifest_through_the_api() {
    let (_root, manifest) = manifest();
    let store = direct_only_store();
    let mut vcs = MockVersionControl::new();
    vcs.expect_is_available().return_const(true);
    vcs.expect_init()
        .times(1)
        .returning(|_| Err(failed("git init")));
    vcs.expect_lfs_install().never();
    vcs.expect_add_remote().never();
    no_staging(&mut vcs);

    let report = publish(&manifest, &handle(), &store, Some(&vcs), &options(true), None).await;

    assert_eq!(report.outcome, PublishOutcome::Success);
    assert_eq!(states(&report), vec![FileState::Committed(Channel::Direct); 3]);
}

#[tokio::test]
async fn failed_lfs_install_sends_the_whole_manifest_through_the_api() {
    let (_root, manifest) = manifest();
    let store = direct_only_store();
    let mut vcs = MockVersionControl::new();
    vcs.expect_is_available().return_const(true);
    vcs.expect_init().times(1).returning(|_| Ok(()));
    vcs.expect_lfs_install()
        .times(1)
        .returning(|_| Err(failed("git lfs install")));
    vcs.expect_lfs_track().never();
    vcs.expect_add_remote().never();
    no_staging(&mut vcs);

    let report = publish(&manifest, &handle(), &store, Some(&vcs), &options(true), None).await;

    assert_eq!(report.outcome, PublishOutcome::Success);
    assert_eq!(states(&report), vec![FileState::Committed(Channel::Direct); 3]);
}

#[tokio::test]
async fn failed_remote_add_sends_the_whole_manifest_through_the_api() {
    let (_root, manifest) = manifest();
    let store = direct_only_store();
    let mut vcs = MockVersionControl::new();
    vcs.expect_is_available().return_const(true);
    vcs.expect_init().times(1).returning(|_| Ok(()));
    vcs.expect_lfs_install().times(1).returning(|_| Ok(()));
    vcs.expect_lfs_track().times(2).returning(|_, _| Ok(()));
    vcs.expect_current_branch()
        .returning(|_| Ok(Some("main".into())));
    vcs.expect_create_branch().never();
    vcs.expect_add_remote()
        .times(1)
        .returning(|_, _, _| Err(failed("git remote add")));
    no_staging(&mut vcs);

    let report = publish(&manifest, &handle(), &store, Some(&vcs), &options(true), None).await;

    assert_eq!(report.outcome, PublishOutcome::Success);
    assert_eq!(states(&report), vec![FileState::Committed(Channel::Direct); 3]);
}

#[tokio::test]
async fn every_write_failing_reports_failed() {
    let (_root, manifest) = manifest();
    let mut store = MockRemoteStore::new();
    store
        .expect_get_file()
        .returning(|_, _| Err(RemoteError::Transport("connection reset".into())));

    let report = publish(&manifest, &handle(), &store, None, &options(false), None).await;

    assert_eq!(report.outcome, PublishOutcome::Failed);
    assert_eq!(report.failed().count(), 3);
}

#[tokio::test]
async fn inventory_lists_files_missing_remotely() {
    let (_root, manifest) = manifest();
    let mut store = MockRemoteStore::new();
    store
        .expect_list_dir()
        .withf(|_, path: &str| path.is_empty())
        .returning(|_, _| Ok(vec![written("README.md"), written("Large.7z")]));

    let missing = verify_published(&store, &handle(), &manifest).await.unwrap();
    assert_eq!(missing, vec!["Small.zip".to_string()]);
}
