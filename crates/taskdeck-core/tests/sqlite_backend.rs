//! The task store, directory, and session cache over an on-disk SQLite
//! remote, including a reopen to check that writes persisted.

use std::sync::Arc;

use chrono::{Duration, Utc};
use taskdeck_core::clock::SystemClock;
use taskdeck_core::error::TaskDeckError;
use taskdeck_core::filter::{FilterKind, FilterSelection};
use taskdeck_core::model::{Category, CategorySet, NewUser, Role, TaskDraft};
use taskdeck_core::project::{JoinOutcome, ProjectDirectory};
use taskdeck_core::remote::RemoteStore;
use taskdeck_core::remote::sqlite::SqliteRemote;
use taskdeck_core::retry::RetryPolicy;
use taskdeck_core::session::{Resolution, SessionCache, SessionConfig};
use taskdeck_core::status::{ConfirmAction, Status};
use taskdeck_core::store::{ConfirmOutcome, StoreConfig, TaskStore, ToggleOutcome};
use tempfile::TempDir;

fn open(dir: &TempDir) -> Arc<SqliteRemote> {
    Arc::new(SqliteRemote::open(&dir.path().join(".taskdeck/remote.sqlite3")).expect("open db"))
}

async fn seed_user(remote: &SqliteRemote, id: &str, name: &str) {
    remote
        .insert_user(&NewUser {
            id: Some(id.into()),
            ..NewUser::member(name, format!("{name}@example.com"))
        })
        .await
        .expect("seed user");
}

#[tokio::test]
async fn board_round_trip_survives_reopen() {
    let dir = tempfile::tempdir().expect("temp dir");
    let remote = open(&dir);
    seed_user(&remote, "u-aiko", "aiko").await;
    seed_user(&remote, "u-ben", "ben").await;

    let directory = ProjectDirectory::new(remote.clone(), RetryPolicy::none());
    let project = directory
        .create_project("garden", None, "u-aiko")
        .await
        .expect("create project");
    assert!(project.code.starts_with("PRJ-"));
    let joined = directory
        .join_by_code(&project.code.to_lowercase(), "u-ben")
        .await
        .expect("join");
    assert!(matches!(joined, JoinOutcome::Joined(_)));
    let again = directory
        .join_by_code(&project.code, "u-ben")
        .await
        .expect("join again");
    assert!(matches!(again, JoinOutcome::AlreadyMember(_)));

    let members = directory.membership().members(&project.id).await.expect("members");
    let roles: Vec<(&str, Role)> = members.iter().map(|m| (m.name.as_str(), m.role)).collect();
    assert_eq!(roles, [("aiko", Role::Admin), ("ben", Role::Member)]);

    let store = TaskStore::new(remote.clone(), project.id.clone(), StoreConfig::default());
    let deadline = Utc::now() + Duration::days(2);
    let task = store
        .create(
            "u-aiko",
            TaskDraft {
                categories: CategorySet::try_from(&[Category::Back, Category::Setting][..])
                    .expect("categories"),
                assignee_name: Some("ben".into()),
                ..TaskDraft::new("wire up storage", deadline)
            },
        )
        .await
        .expect("create");
    assert_eq!(task.assigned_to_name, "ben");

    let toggled = store.toggle_status(task.id()).await.expect("toggle");
    assert!(matches!(toggled, ToggleOutcome::Applied(ref v) if v.status() == Status::InProgress));
    drop(store);
    drop(directory);
    drop(remote);

    let reopened = open(&dir);
    let store = TaskStore::new(reopened.clone(), project.id, StoreConfig::default());
    let snapshot = store.fetch().await.expect("fetch");
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].status(), Status::InProgress);
    assert_eq!(snapshot[0].created_by_name, "aiko");
    assert_eq!(
        store.visible(&FilterSelection::new(FilterKind::Setting)).len(),
        1
    );
    assert!(store
        .visible(&FilterSelection::new(FilterKind::Front))
        .is_empty());
    assert_eq!(store.upcoming(Utc::now(), 7).len(), 1);
}

#[tokio::test]
async fn done_task_confirmation_over_sqlite() {
    let dir = tempfile::tempdir().expect("temp dir");
    let remote = open(&dir);
    seed_user(&remote, "u-aiko", "aiko").await;
    let directory = ProjectDirectory::new(remote.clone(), RetryPolicy::none());
    let project = directory
        .create_project("solo", Some("SOLO-1"), "u-aiko")
        .await
        .expect("create project");

    let store = TaskStore::new(remote.clone(), project.id, StoreConfig::default());
    let task = store
        .create("u-aiko", TaskDraft::new("wrap up", Utc::now()))
        .await
        .expect("create");
    store.set_status(task.id(), Status::Done).await.expect("done");

    let outcome = store.toggle_status(task.id()).await.expect("toggle");
    assert!(matches!(outcome, ToggleOutcome::NeedsConfirmation(_)));
    let deleted = store
        .confirm(task.id(), ConfirmAction::Delete)
        .await
        .expect("delete");
    assert!(matches!(deleted, ConfirmOutcome::Deleted(_)));
    assert!(store.snapshot().is_empty());

    let err = store.toggle_status(task.id()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn duplicate_code_is_a_conflict() {
    let dir = tempfile::tempdir().expect("temp dir");
    let remote = open(&dir);
    seed_user(&remote, "u-aiko", "aiko").await;
    let directory = ProjectDirectory::new(remote.clone(), RetryPolicy::none());
    directory
        .create_project("first", Some("TEAM-7"), "u-aiko")
        .await
        .expect("first project");

    let err = directory
        .create_project("second", Some("team-7"), "u-aiko")
        .await
        .unwrap_err();
    assert!(matches!(err, TaskDeckError::Conflict { .. }));
}

#[tokio::test]
async fn session_cache_reads_sqlite_users() {
    let remote = Arc::new(SqliteRemote::open_in_memory().expect("open db"));
    seed_user(&remote, "u-aiko", "aiko").await;
    let cache = SessionCache::new(remote, Arc::new(SystemClock), SessionConfig::default());

    let first = cache.resolve("u-aiko").await.expect("resolve");
    assert!(matches!(first, Resolution::Fetched(ref identity) if identity.name == "aiko"));
    let second = cache.resolve("u-aiko").await.expect("resolve");
    assert!(matches!(second, Resolution::Cached(_)));
    assert_eq!(cache.resolve("u-nobody").await.expect("resolve"), Resolution::Missing);
}
