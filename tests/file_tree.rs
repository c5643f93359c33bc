//! File tree scenarios over in-process services: workspace roots, uploads
//! and snapshots, permission propagation, copies, moves and deletes.

mod common;

use common::Fixture;
use voltcore::conversion::SchedulerOptions;
use voltcore::error::{Entity, Error};
use voltcore::service::Settings;
use voltcore::types::{FileType, PermissionLevel, PipelineId, SnapshotStatus};

fn names(files: &[voltcore::types::File]) -> Vec<String> {
    let mut names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_workspace_root_resolves_by_path() {
    let fx = Fixture::new();
    let u1 = fx.user("u1");
    let w1 = fx.workspace(&u1, "W1", 1_000_000).await;
    assert!(!w1.root_id.is_empty());
    assert_eq!(w1.storage_capacity, 1_000_000);

    let virtual_root = fx.services.files.find_by_path("/", &u1.id).await.unwrap();
    assert!(virtual_root.is_folder());
    assert_eq!(virtual_root.name, "/");
    assert!(virtual_root.workspace_id.is_empty());

    let root = fx.services.files.find_by_path("/W1", &u1.id).await.unwrap();
    assert_eq!(root.file_type, FileType::Folder);
    assert_eq!(root.id, w1.root_id);
    assert!(root.is_root());

    let listed = fx.services.files.list_by_path("/", &u1.id).await.unwrap();
    assert_eq!(names(&listed), vec!["W1"]);
}

#[tokio::test]
async fn test_workspace_is_invisible_to_strangers() {
    let fx = Fixture::new();
    let u1 = fx.user("u1");
    let u2 = fx.user("u2");
    fx.workspace(&u1, "W1", 1_000_000).await;

    let err = fx.services.files.find_by_path("/W1", &u2.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(Entity::File)));
    assert!(fx.services.files.list_by_path("/", &u2.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_creates_waiting_snapshot_then_ready_after_pipeline() {
    let fx = Fixture::new();
    let u1 = fx.user("u1");
    let w1 = fx.workspace(&u1, "W1", 1_000_000).await;

    let f1 = fx.upload(&w1, &w1.root_id, "a.txt", b"hello", &u1).await;
    let snapshot_id = f1.snapshot_id.clone().expect("file has a snapshot");
    let snapshot = fx.services.snapshots.find(&snapshot_id, &u1.id).await.unwrap();
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.status, SnapshotStatus::Waiting);

    let run = fx.launcher.last();
    assert_eq!(run.snapshot_id, snapshot_id);
    assert_eq!(run.bucket, w1.bucket);
    let task_id = run.task_id.clone().expect("run carries a task");

    fx.convert_last(PipelineId::Noop, SchedulerOptions::default()).await;

    let snapshot = fx.services.snapshots.find(&snapshot_id, &u1.id).await.unwrap();
    assert_eq!(snapshot.status, SnapshotStatus::Ready);
    assert!(snapshot.task_id.is_none());

    let file = fx.services.files.find(&f1.id, &u1.id).await.unwrap();
    let view = fx.services.files.view(file, &u1.id).await.unwrap();
    assert_eq!(view.size(), 5);
    assert_eq!(view.permission, Some(PermissionLevel::Owner));

    // Successful tasks are removed.
    assert!(fx.services.tasks.find(&task_id, &u1.id).await.is_err());
}

#[tokio::test]
async fn test_second_upload_increments_version() {
    let fx = Fixture::new();
    let u1 = fx.user("u1");
    let w1 = fx.workspace(&u1, "W1", 1_000_000).await;
    let f1 = fx.upload(&w1, &w1.root_id, "a.txt", b"hello", &u1).await;

    let s3ref = fx.put_original(&w1, "a.txt", b"hello again").await;
    let patched = fx.services.files.patch_from_s3(&f1.id, &s3ref, &u1.id).await.unwrap();
    assert_eq!(patched.snapshot_id.as_deref(), Some(s3ref.snapshot_id.as_str()));

    let versions: Vec<i64> = fx
        .services
        .snapshots
        .list(&f1.id, &u1.id)
        .await
        .unwrap()
        .iter()
        .map(|s| s.version)
        .collect();
    assert_eq!(versions, vec![1, 2]);
}

#[tokio::test]
async fn test_oversized_upload_skips_conversion() {
    let fx = Fixture::with_settings(Settings {
        file_processing_limit_bytes: 4,
        ..Settings::default()
    });
    let u1 = fx.user("u1");
    let w1 = fx.workspace(&u1, "W1", 1_000_000).await;

    let f1 = fx.upload(&w1, &w1.root_id, "a.txt", b"hello", &u1).await;
    let snapshot = fx
        .services
        .snapshots
        .find(f1.snapshot_id.as_deref().unwrap(), &u1.id)
        .await
        .unwrap();
    assert_eq!(snapshot.status, SnapshotStatus::Ready);
    assert!(fx.launcher.runs().is_empty());
}

#[tokio::test]
async fn test_upload_beyond_capacity_is_rejected() {
    let fx = Fixture::new();
    let u1 = fx.user("u1");
    let w1 = fx.workspace(&u1, "W1", 4).await;

    let s3ref = fx.put_original(&w1, "a.txt", b"hello").await;
    let opts = voltcore::service::CreateFileOptions {
        workspace_id: w1.id.clone(),
        parent_id: None,
        name: "a.txt".to_string(),
        file_type: FileType::File,
    };
    let err = fx
        .services
        .files
        .create_from_s3(&opts, &s3ref, &u1.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "insufficient_storage_capacity");
}

#[tokio::test]
async fn test_similar_sibling_names_conflict() {
    let fx = Fixture::new();
    let u1 = fx.user("u1");
    let w1 = fx.workspace(&u1, "W1", 1_000_000).await;
    fx.folder(&w1, &w1.root_id, "Docs", &u1).await;

    let opts = voltcore::service::CreateFileOptions {
        workspace_id: w1.id.clone(),
        parent_id: Some(w1.root_id.clone()),
        name: "docs".to_string(),
        file_type: FileType::Folder,
    };
    let err = fx.services.files.create(&opts, &u1.id).await.unwrap_err();
    assert_eq!(err.code(), "file_with_similar_name_exists");
}

#[tokio::test]
async fn test_grant_uplifts_path_and_hides_siblings() {
    let fx = Fixture::new();
    let u1 = fx.user("u1");
    let u2 = fx.user("u2");
    let w1 = fx.workspace(&u1, "W1", 1_000_000).await;

    let docs = fx.folder(&w1, &w1.root_id, "docs", &u1).await;
    fx.folder(&w1, &w1.root_id, "other", &u1).await;
    let plans = fx.folder(&w1, &docs.id, "plans", &u1).await;
    let q4 = fx.upload(&w1, &plans.id, "q4.md", b"# Q4", &u1).await;
    let notes = fx.upload(&w1, &plans.id, "notes.md", b"# notes", &u1).await;

    fx.services
        .files
        .grant_user_permission(&[q4.id.clone()], &u2.id, PermissionLevel::Editor, &u1.id)
        .await
        .unwrap();

    let files = &fx.services.files;
    assert_eq!(names(&files.list_by_path("/", &u2.id).await.unwrap()), vec!["W1"]);
    assert_eq!(names(&files.list_by_path("/W1", &u2.id).await.unwrap()), vec!["docs"]);
    assert_eq!(names(&files.list_by_path("/W1/docs", &u2.id).await.unwrap()), vec!["plans"]);
    assert_eq!(
        names(&files.list_by_path("/W1/docs/plans", &u2.id).await.unwrap()),
        vec!["q4.md"]
    );

    let renamed = files.rename(&q4.id, "q4-final.md", &u2.id).await.unwrap();
    assert_eq!(renamed.name, "q4-final.md");

    // Ancestors are viewable only.
    let err = files.rename(&docs.id, "papers", &u2.id).await.unwrap_err();
    assert!(matches!(err, Error::MissingPermission(Entity::File, PermissionLevel::Editor)));

    // Files without any grant do not exist for u2.
    let err = files.find(&notes.id, &u2.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(Entity::File)));
}

#[tokio::test]
async fn test_folder_grant_reaches_descendants() {
    let fx = Fixture::new();
    let u1 = fx.user("u1");
    let u2 = fx.user("u2");
    let w1 = fx.workspace(&u1, "W1", 1_000_000).await;
    let docs = fx.folder(&w1, &w1.root_id, "docs", &u1).await;
    let plans = fx.folder(&w1, &docs.id, "plans", &u1).await;
    let q4 = fx.upload(&w1, &plans.id, "q4.md", b"# Q4", &u1).await;

    fx.services
        .files
        .grant_user_permission(&[docs.id.clone()], &u2.id, PermissionLevel::Viewer, &u1.id)
        .await
        .unwrap();

    for id in [&docs.id, &plans.id, &q4.id] {
        let file = fx.services.files.find(id, &u2.id).await.unwrap();
        let view = fx.services.files.view(file, &u2.id).await.unwrap();
        assert!(view.permission.is_some_and(|p| p >= PermissionLevel::Viewer));
    }
    let err = fx.services.files.delete(&q4.id, &u2.id).await.unwrap_err();
    assert!(matches!(err, Error::MissingPermission(Entity::File, PermissionLevel::Owner)));
}

#[tokio::test]
async fn test_copy_folder_shares_snapshots() {
    let fx = Fixture::new();
    let u1 = fx.user("u1");
    let w1 = fx.workspace(&u1, "W1", 1_000_000).await;
    let docs = fx.folder(&w1, &w1.root_id, "docs", &u1).await;
    let archive = fx.folder(&w1, &w1.root_id, "archive", &u1).await;
    let plans = fx.folder(&w1, &docs.id, "plans", &u1).await;
    let q4 = fx.upload(&w1, &plans.id, "q4.md", b"# Q4", &u1).await;

    let clone = fx.services.files.copy(&docs.id, &archive.id, &u1.id).await.unwrap();
    assert_ne!(clone.id, docs.id);
    assert_eq!(clone.name, "docs");
    assert_eq!(clone.parent_id.as_deref(), Some(archive.id.as_str()));

    let copied = fx
        .services
        .files
        .find_by_path("/W1/archive/docs/plans/q4.md", &u1.id)
        .await
        .unwrap();
    assert_ne!(copied.id, q4.id);
    assert_eq!(copied.snapshot_id, q4.snapshot_id);

    let origin = fx.services.snapshots.list(&q4.id, &u1.id).await.unwrap();
    let cloned = fx.services.snapshots.list(&copied.id, &u1.id).await.unwrap();
    let ids = |list: &[voltcore::types::Snapshot]| list.iter().map(|s| s.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&cloned), ids(&origin));
    assert_eq!(
        origin.last().and_then(|s| s.original.as_ref()).map(|o| o.key.clone()),
        cloned.last().and_then(|s| s.original.as_ref()).map(|o| o.key.clone()),
    );

    let snapshot_id = q4.snapshot_id.clone().unwrap();
    let mut mapped = fx.store.list_file_ids_for_snapshot(&snapshot_id).unwrap();
    mapped.sort();
    let mut expected = vec![q4.id.clone(), copied.id.clone()];
    expected.sort();
    assert_eq!(mapped, expected);

    // Folders carry no snapshot, so they map nothing.
    assert!(fx.services.snapshots.list(&clone.id, &u1.id).await.unwrap().is_empty());

    // A second copy gets a fresh name.
    let again = fx.services.files.copy(&docs.id, &archive.id, &u1.id).await.unwrap();
    assert_ne!(again.name, "docs");
}

#[tokio::test]
async fn test_copy_takes_only_the_active_version() {
    let fx = Fixture::new();
    let u1 = fx.user("u1");
    let w1 = fx.workspace(&u1, "W1", 1_000_000).await;
    let archive = fx.folder(&w1, &w1.root_id, "archive", &u1).await;
    let a = fx.upload(&w1, &w1.root_id, "a.txt", b"hello", &u1).await;
    let s3ref = fx.put_original(&w1, "a.txt", b"hello again").await;
    fx.services.files.patch_from_s3(&a.id, &s3ref, &u1.id).await.unwrap();

    let clone = fx.services.files.copy(&a.id, &archive.id, &u1.id).await.unwrap();
    assert_eq!(clone.snapshot_id.as_deref(), Some(s3ref.snapshot_id.as_str()));

    let cloned = fx.services.snapshots.list(&clone.id, &u1.id).await.unwrap();
    assert_eq!(cloned.len(), 1);
    assert_eq!(cloned[0].id, s3ref.snapshot_id);
    assert_eq!(cloned[0].version, 2);
    assert_eq!(fx.services.files.get_size(&clone.id, &u1.id).await.unwrap(), 11);

    // The origin keeps its full history.
    assert_eq!(fx.services.snapshots.list(&a.id, &u1.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_copy_and_move_across_workspaces_are_bad_requests() {
    let fx = Fixture::new();
    let u1 = fx.user("u1");
    let w1 = fx.workspace(&u1, "W1", 1_000_000).await;
    let w2 = fx.workspace(&u1, "W2", 1_000_000).await;
    let a = fx.upload(&w1, &w1.root_id, "a.txt", b"hello", &u1).await;

    let err = fx.services.files.copy(&a.id, &w2.root_id, &u1.id).await.unwrap_err();
    assert_eq!(err.status(), 400);
    assert_eq!(err.code(), "file_cannot_be_copied_across_workspaces");

    let err = fx.services.files.move_file(&a.id, &w2.root_id, &u1.id).await.unwrap_err();
    assert_eq!(err.status(), 400);
    assert_eq!(err.code(), "file_cannot_be_moved_across_workspaces");

    let found = fx.services.files.find(&a.id, &u1.id).await.unwrap();
    assert_eq!(found.parent_id.as_deref(), Some(w1.root_id.as_str()));
}

#[tokio::test]
async fn test_copy_into_own_subtree_is_rejected() {
    let fx = Fixture::new();
    let u1 = fx.user("u1");
    let w1 = fx.workspace(&u1, "W1", 1_000_000).await;
    let docs = fx.folder(&w1, &w1.root_id, "docs", &u1).await;
    let plans = fx.folder(&w1, &docs.id, "plans", &u1).await;

    let err = fx.services.files.copy(&docs.id, &plans.id, &u1.id).await.unwrap_err();
    assert_eq!(err.code(), "file_cannot_be_copied_into_own_subtree");

    let result = fx
        .services
        .files
        .copy_many(&[docs.id.clone(), plans.id.clone()], &w1.root_id, &u1.id)
        .await;
    assert_eq!(result.succeeded.len(), 2);
    assert_eq!(result.new.len(), 2);
    assert!(result.failed.is_empty());
}

#[tokio::test]
async fn test_move_reparents_subtree() {
    let fx = Fixture::new();
    let u1 = fx.user("u1");
    let w1 = fx.workspace(&u1, "W1", 1_000_000).await;
    let docs = fx.folder(&w1, &w1.root_id, "docs", &u1).await;
    let archive = fx.folder(&w1, &w1.root_id, "archive", &u1).await;
    let q4 = fx.upload(&w1, &docs.id, "q4.md", b"# Q4", &u1).await;

    let moved = fx.services.files.move_file(&docs.id, &archive.id, &u1.id).await.unwrap();
    assert_eq!(moved.parent_id.as_deref(), Some(archive.id.as_str()));
    let found = fx
        .services
        .files
        .find_by_path("/W1/archive/docs/q4.md", &u1.id)
        .await
        .unwrap();
    assert_eq!(found.id, q4.id);

    let err = fx.services.files.move_file(&archive.id, &docs.id, &u1.id).await.unwrap_err();
    assert_eq!(err.code(), "target_is_grand_child_of_source");
}

#[tokio::test]
async fn test_delete_collects_dangling_snapshots() {
    let fx = Fixture::new();
    let u1 = fx.user("u1");
    let w1 = fx.workspace(&u1, "W1", 1_000_000).await;
    let docs = fx.folder(&w1, &w1.root_id, "docs", &u1).await;
    let q4 = fx.upload(&w1, &docs.id, "q4.md", b"# Q4", &u1).await;
    let snapshot_id = q4.snapshot_id.clone().unwrap();
    let key = fx.launcher.last().key;

    fx.services.files.delete(&docs.id, &u1.id).await.unwrap();

    assert!(fx.store.get_snapshot(&snapshot_id).unwrap().is_none());
    assert!(fx.objects.stat_object(&w1.bucket, &key).await.is_err());
    let err = fx.services.files.find(&q4.id, &u1.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(Entity::File)));

    let err = fx.services.files.delete(&w1.root_id, &u1.id).await.unwrap_err();
    assert_eq!(err.code(), "cannot_delete_workspace_root");
}

#[tokio::test]
async fn test_delete_keeps_snapshots_shared_with_copies() {
    let fx = Fixture::new();
    let u1 = fx.user("u1");
    let w1 = fx.workspace(&u1, "W1", 1_000_000).await;
    let q4 = fx.upload(&w1, &w1.root_id, "q4.md", b"# Q4", &u1).await;
    let archive = fx.folder(&w1, &w1.root_id, "archive", &u1).await;
    fx.services.files.copy(&q4.id, &archive.id, &u1.id).await.unwrap();

    fx.services.files.delete(&q4.id, &u1.id).await.unwrap();

    let snapshot_id = q4.snapshot_id.unwrap();
    assert!(fx.store.get_snapshot(&snapshot_id).unwrap().is_some());
    assert!(fx.objects.stat_object(&w1.bucket, &fx.launcher.last().key).await.is_ok());
}
