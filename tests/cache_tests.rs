//! Integration tests for the project store cache, on-disk persistence, and
//! the global store.
//!
//! These run against real files under a temp directory because the cache
//! exists precisely to manage file-backed handles; in-memory stores would
//! sidestep the eviction and reopen behavior under test.

use orc_store::StoreError;
use orc_store::cache::ProjectStoreCache;
use orc_store::config::StoreConfig;
use orc_store::db::Database;
use orc_store::global::GlobalStore;
use orc_store::registry::{DirRegistry, STORE_FILE_NAME};
use orc_store::types::{AgentDef, Task, TaskStatus, WorkflowDef};
use std::sync::{Arc, Barrier};

/// Registry root with the given project ids registered as subdirectories.
/// The TempDir must stay alive for the duration of the test.
fn setup_projects(ids: &[&str]) -> (tempfile::TempDir, Arc<DirRegistry>) {
    let root = tempfile::tempdir().expect("Failed to create temp dir");
    for id in ids {
        std::fs::create_dir(root.path().join(id)).expect("Failed to create project dir");
    }
    let registry = Arc::new(DirRegistry::new(root.path()));
    (root, registry)
}

mod cache_tests {
    use super::*;

    #[test]
    fn get_opens_a_usable_store_at_the_registered_path() {
        let (root, registry) = setup_projects(&["acme"]);
        let cache = ProjectStoreCache::new(registry, 4);

        let db = cache.get("acme").unwrap();
        db.save_task(&Task::new("T-001", "First task")).unwrap();

        assert!(root.path().join("acme").join(STORE_FILE_NAME).exists());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn unregistered_project_is_not_found_and_nothing_is_cached() {
        let (_root, registry) = setup_projects(&["acme"]);
        let cache = ProjectStoreCache::new(registry, 4);

        assert!(matches!(
            cache.get("ghost"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn registered_but_unopenable_store_is_a_storage_failure() {
        let (root, registry) = setup_projects(&["bad"]);
        // A directory where the store file should be makes the open fail.
        std::fs::create_dir(root.path().join("bad").join(STORE_FILE_NAME)).unwrap();
        let cache = ProjectStoreCache::new(registry, 4);

        assert!(matches!(cache.get("bad"), Err(StoreError::Storage(_))));
        assert!(cache.is_empty());
    }

    #[test]
    fn repeated_gets_share_one_handle() {
        let (_root, registry) = setup_projects(&["acme"]);
        let cache = ProjectStoreCache::new(registry, 4);

        let first = cache.get("acme").unwrap();
        let second = cache.get("acme").unwrap();
        assert_eq!(cache.len(), 1);

        // Writes through one handle are visible through the other.
        first.save_task(&Task::new("T-001", "Shared task")).unwrap();
        assert_eq!(second.load_task("T-001").unwrap().title, "Shared task");
    }

    #[test]
    fn eviction_closes_the_least_recently_used_store() {
        let (_root, registry) = setup_projects(&["a", "b", "c"]);
        let cache = ProjectStoreCache::new(registry, 2);

        let handle_a = cache.get("a").unwrap();
        let handle_b = cache.get("b").unwrap();
        // Touch "a" so "b" becomes the least recently used entry.
        cache.get("a").unwrap();

        cache.get("c").unwrap();
        assert_eq!(cache.len(), 2);

        // The evicted handle was closed, not merely dropped.
        assert!(matches!(
            handle_b.save_task(&Task::new("T-001", "After eviction")),
            Err(StoreError::Storage(_))
        ));
        handle_a
            .save_task(&Task::new("T-001", "Still cached"))
            .unwrap();
    }

    #[test]
    fn evicted_project_state_survives_on_disk() {
        let (_root, registry) = setup_projects(&["a", "b"]);
        let cache = ProjectStoreCache::new(registry, 1);

        cache
            .get("a")
            .unwrap()
            .save_task(&Task::new("T-001", "Durable task"))
            .unwrap();
        cache.get("b").unwrap();
        assert_eq!(cache.len(), 1);

        let reopened = cache.get("a").unwrap();
        assert_eq!(reopened.load_task("T-001").unwrap().title, "Durable task");
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let (_root, registry) = setup_projects(&["a", "b"]);
        let cache = ProjectStoreCache::new(registry, 0);

        cache.get("a").unwrap();
        cache.get("b").unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn from_config_takes_the_configured_capacity() {
        let (_root, registry) = setup_projects(&["a", "b"]);
        let config = StoreConfig {
            cache_capacity: 1,
            ..StoreConfig::default()
        };
        let cache = ProjectStoreCache::from_config(registry, &config);

        let handle_a = cache.get("a").unwrap();
        cache.get("b").unwrap();

        assert_eq!(cache.len(), 1);
        assert!(handle_a.load_task("T-001").is_err());
    }

    #[test]
    fn close_shuts_every_cached_handle() {
        let (_root, registry) = setup_projects(&["a", "b"]);
        let cache = ProjectStoreCache::new(registry, 4);
        let handle_a = cache.get("a").unwrap();
        let handle_b = cache.get("b").unwrap();

        cache.close().unwrap();

        assert!(cache.is_empty());
        assert!(matches!(
            handle_a.load_task("T-001"),
            Err(StoreError::Storage(_))
        ));
        assert!(matches!(
            handle_b.load_task("T-001"),
            Err(StoreError::Storage(_))
        ));
    }

    /// Concurrent misses for the same project must still end with a single
    /// cached handle; the cache holds its lock across lookup and open.
    #[test]
    fn concurrent_gets_for_one_project_open_one_handle() {
        let (_root, registry) = setup_projects(&["acme"]);
        let cache = Arc::new(ProjectStoreCache::new(registry, 4));
        let barrier = Arc::new(Barrier::new(6));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                cache.get("acme").map(|_| ())
            }));
        }
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(cache.len(), 1);
    }
}

mod persistence_tests {
    use super::*;

    #[test]
    fn a_store_survives_close_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE_NAME);

        let db = Database::open(&path).unwrap();
        let mut task = Task::new("T-001", "Persistent task");
        task.status = TaskStatus::Planned;
        db.save_task(&task).unwrap();
        db.append_event("T-001", "note", None).unwrap();
        db.close().unwrap();

        // Reopening reruns migrations, which must be a no-op on data.
        let db = Database::open(&path).unwrap();
        let loaded = db.load_task("T-001").unwrap();
        assert_eq!(loaded.status, TaskStatus::Planned);
        assert_eq!(db.list_events("T-001", None, None).unwrap().len(), 1);
    }

    #[test]
    fn a_closed_handle_fails_through_every_clone() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join(STORE_FILE_NAME)).unwrap();
        let clone = db.clone();

        db.close().unwrap();

        assert!(matches!(
            clone.load_task("T-001"),
            Err(StoreError::Storage(_))
        ));
        // Closing again is a quiet no-op.
        db.close().unwrap();
    }
}

mod global_store_tests {
    use super::*;

    #[test]
    fn definitions_round_trip_through_the_global_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.db");

        let store = GlobalStore::open(&path).unwrap();
        store
            .save_workflow(&WorkflowDef {
                id: "standard".to_string(),
                description: None,
                phases: vec!["plan".to_string(), "build".to_string()],
                updated_at: 0,
            })
            .unwrap();
        store
            .save_agent(&AgentDef {
                id: "builder".to_string(),
                role: "build".to_string(),
                model: None,
                updated_at: 0,
            })
            .unwrap();
        store.close().unwrap();

        let store = GlobalStore::open(&path).unwrap();
        let workflow = store.get_workflow("standard").unwrap();
        assert_eq!(workflow.phases, ["plan", "build"]);
        assert!(workflow.updated_at > 0);
        assert_eq!(store.get_agent("builder").unwrap().role, "build");
        assert_eq!(store.list_workflows().unwrap().len(), 1);
    }

    #[test]
    fn open_default_creates_parents_for_the_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("global.db");
        let config = StoreConfig {
            global_store_path: Some(path.clone()),
            ..StoreConfig::default()
        };

        let store = GlobalStore::open_default(&config).unwrap();
        store
            .save_workflow(&WorkflowDef {
                id: "standard".to_string(),
                description: None,
                phases: Vec::new(),
                updated_at: 0,
            })
            .unwrap();

        assert!(path.exists());
    }
}
