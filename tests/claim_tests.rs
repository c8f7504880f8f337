//! Integration tests for the execution claim manager.
//!
//! A scripted process probe stands in for the OS so liveness can be
//! controlled per pid. The concurrency tests share one store handle across
//! threads the same way resumed orchestrator processes share one database.

use orc_store::StoreError;
use orc_store::db::Database;
use orc_store::proc::{ProcessProbe, SystemProbe};
use orc_store::types::{Task, TaskStatus};
use rusqlite::params;
use std::collections::HashSet;
use std::sync::{Arc, Barrier, Mutex};

/// Probe whose notion of "alive" is a mutable pid set.
struct FakeProbe {
    alive: Mutex<HashSet<u32>>,
}

impl FakeProbe {
    fn with_alive(pids: &[u32]) -> Self {
        Self {
            alive: Mutex::new(pids.iter().copied().collect()),
        }
    }

    fn none_alive() -> Self {
        Self::with_alive(&[])
    }

    fn kill(&self, pid: u32) {
        self.alive.lock().unwrap().remove(&pid);
    }
}

impl ProcessProbe for FakeProbe {
    fn is_alive(&self, pid: u32) -> bool {
        self.alive.lock().unwrap().contains(&pid)
    }
}

/// Helper to create a fresh in-memory database for testing.
fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

/// A task parked in a resumable status with no recorded executor.
fn save_resumable(db: &Database, id: &str, status: TaskStatus) {
    let mut task = Task::new(id, "Resumable work");
    task.status = status;
    db.save_task(&task).expect("Failed to save task");
}

mod claim_protocol_tests {
    use super::*;

    #[test]
    fn claim_of_a_missing_task_is_not_found() {
        let db = setup_db();
        let probe = FakeProbe::none_alive();

        let err = db.try_claim("T-404", 4242, "host-a", &probe).unwrap_err();

        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn claiming_sets_running_status_and_executor_identity() {
        let db = setup_db();
        save_resumable(&db, "T-001", TaskStatus::Failed);
        let probe = FakeProbe::none_alive();

        let claimed = db.try_claim("T-001", 4242, "host-a", &probe).unwrap();

        assert_eq!(claimed.status, TaskStatus::Running);
        let executor = claimed.executor.expect("claim must record an executor");
        assert_eq!(executor.pid, 4242);
        assert_eq!(executor.hostname, "host-a");
        assert!(executor.started_at > 0);
        assert_eq!(executor.last_heartbeat, executor.started_at);

        let loaded = db.load_task("T-001").unwrap();
        assert_eq!(loaded.status, TaskStatus::Running);
        assert_eq!(loaded.executor.unwrap().pid, 4242);
    }

    #[test]
    fn every_resumable_status_accepts_a_claim() {
        let db = setup_db();
        let probe = FakeProbe::none_alive();
        let cases = [
            ("T-001", TaskStatus::Running),
            ("T-002", TaskStatus::Paused),
            ("T-003", TaskStatus::Blocked),
            ("T-004", TaskStatus::Failed),
        ];

        for (id, status) in cases {
            save_resumable(&db, id, status);
            let claimed = db.try_claim(id, 4242, "host-a", &probe).unwrap();
            assert_eq!(claimed.status, TaskStatus::Running, "claiming {id}");
        }
    }

    #[test]
    fn non_resumable_statuses_are_rejected_with_invalid_state() {
        let db = setup_db();
        let probe = FakeProbe::none_alive();
        let cases = [
            ("T-001", TaskStatus::Created),
            ("T-002", TaskStatus::Classifying),
            ("T-003", TaskStatus::Planned),
            ("T-004", TaskStatus::Finalizing),
            ("T-005", TaskStatus::Completed),
            ("T-006", TaskStatus::Finished),
        ];

        for (id, status) in cases {
            save_resumable(&db, id, status);
            let err = db.try_claim(id, 4242, "host-a", &probe).unwrap_err();
            assert!(
                matches!(err, StoreError::InvalidState { .. }),
                "claiming a {} task must fail InvalidState",
                status.as_str()
            );

            // The rejected claim must not have touched the row.
            let loaded = db.load_task(id).unwrap();
            assert_eq!(loaded.status, status);
            assert!(loaded.executor.is_none());
        }
    }

    #[test]
    fn a_live_executor_blocks_the_claim_and_is_named() {
        let db = setup_db();
        save_resumable(&db, "T-001", TaskStatus::Failed);
        let probe = FakeProbe::with_alive(&[4242]);
        db.try_claim("T-001", 4242, "host-a", &probe).unwrap();

        let err = db.try_claim("T-001", 9999, "host-b", &probe).unwrap_err();

        match err {
            StoreError::AlreadyClaimed { pid, .. } => assert_eq!(pid, 4242),
            other => panic!("expected AlreadyClaimed, got {other:?}"),
        }
        assert_eq!(db.load_task("T-001").unwrap().executor.unwrap().pid, 4242);
    }

    #[test]
    fn claims_append_events_and_failed_attempts_do_not() {
        let db = setup_db();
        save_resumable(&db, "T-001", TaskStatus::Failed);
        let probe = FakeProbe::with_alive(&[4242]);

        db.try_claim("T-001", 4242, "host-a", &probe).unwrap();
        db.try_claim("T-001", 9999, "host-b", &probe).unwrap_err();

        let events = db.list_events("T-001", None, None).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "claim");
        let payload = events[0].payload.as_ref().unwrap();
        assert_eq!(payload["pid"], 4242);
        assert_eq!(payload["hostname"], "host-a");
    }

    #[test]
    fn a_failed_task_resumes_once_then_guards_until_the_holder_dies() {
        let db = setup_db();
        save_resumable(&db, "T1", TaskStatus::Failed);
        let probe = FakeProbe::with_alive(&[4242, 9999]);

        // First resume wins the slot.
        let claimed = db.try_claim("T1", 4242, "host-a", &probe).unwrap();
        assert_eq!(claimed.status, TaskStatus::Running);
        assert_eq!(claimed.executor.as_ref().unwrap().pid, 4242);

        // A second resume against the now-live holder is refused.
        let err = db.try_claim("T1", 4242, "host-a", &probe).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyClaimed { pid: 4242, .. }));

        // Once the holder dies, a new process takes over.
        probe.kill(4242);
        let taken = db.try_claim("T1", 9999, "host-b", &probe).unwrap();
        let executor = taken.executor.unwrap();
        assert_eq!(executor.pid, 9999);
        assert_eq!(executor.hostname, "host-b");
    }
}

mod orphan_tests {
    use super::*;

    #[test]
    fn a_dead_recorded_pid_never_blocks_a_new_claim() {
        let db = setup_db();
        save_resumable(&db, "T-001", TaskStatus::Running);
        let probe = FakeProbe::with_alive(&[4242]);
        db.try_claim("T-001", 4242, "host-a", &probe).unwrap();

        probe.kill(4242);
        let taken = db.try_claim("T-001", 9999, "host-b", &probe).unwrap();

        assert_eq!(taken.executor.unwrap().pid, 9999);
    }

    #[test]
    fn a_stale_heartbeat_does_not_weaken_a_live_claim() {
        let db = setup_db();
        save_resumable(&db, "T-001", TaskStatus::Failed);
        let probe = FakeProbe::with_alive(&[4242]);
        db.try_claim("T-001", 4242, "host-a", &probe).unwrap();

        // Ancient heartbeat, but the process itself is still alive.
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET executor_heartbeat = 1000 WHERE id = ?1",
                params!["T-001"],
            )?;
            Ok(())
        })
        .unwrap();

        let err = db.try_claim("T-001", 9999, "host-b", &probe).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyClaimed { pid: 4242, .. }));
    }

    #[test]
    fn a_fresh_heartbeat_does_not_protect_a_dead_process() {
        let db = setup_db();
        save_resumable(&db, "T-001", TaskStatus::Failed);
        let probe = FakeProbe::with_alive(&[4242]);
        db.try_claim("T-001", 4242, "host-a", &probe).unwrap();

        // Heartbeat was written moments ago, but the process is gone.
        probe.kill(4242);

        let taken = db.try_claim("T-001", 9999, "host-b", &probe).unwrap();
        assert_eq!(taken.executor.unwrap().pid, 9999);
    }

    #[test]
    fn the_system_probe_guards_and_releases_for_real_processes() {
        let db = setup_db();
        save_resumable(&db, "T-001", TaskStatus::Failed);
        let own_pid = std::process::id();

        // Claimed by this very test process, which is certainly alive.
        db.try_claim("T-001", own_pid, "host-a", &SystemProbe).unwrap();
        let second = db.try_claim("T-001", 12345, "host-b", &SystemProbe);

        // On unix the live process blocks the claim; elsewhere the probe
        // reports every pid dead and takeover is always allowed.
        if cfg!(unix) {
            assert!(matches!(
                second.unwrap_err(),
                StoreError::AlreadyClaimed { .. }
            ));
        } else {
            assert!(second.is_ok());
        }

        // A pid that cannot exist on this host is orphaned by definition.
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET executor_pid = 999999999 WHERE id = ?1",
                params!["T-001"],
            )?;
            Ok(())
        })
        .unwrap();

        let taken = db.try_claim("T-001", 12345, "host-b", &SystemProbe).unwrap();
        assert_eq!(taken.executor.unwrap().pid, 12345);
    }
}

mod concurrency_tests {
    use super::*;

    /// 8 threads race to resume the same task with the same live pid.
    /// Exactly one claim commits; every loser is told who holds the slot.
    #[test]
    fn concurrent_claims_with_one_live_pid_elect_one_winner() {
        let db = setup_db();
        save_resumable(&db, "T-001", TaskStatus::Failed);
        let probe = Arc::new(FakeProbe::with_alive(&[4242]));
        let barrier = Arc::new(Barrier::new(8));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            let probe = Arc::clone(&probe);
            let barrier = Arc::clone(&barrier);
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                db.try_claim("T-001", 4242, "host-a", &*probe)
            }));
        }

        let results: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "exactly one concurrent claim may succeed");
        for result in &results {
            if let Err(err) = result {
                assert!(
                    matches!(err, StoreError::AlreadyClaimed { pid: 4242, .. })
                        || matches!(err, StoreError::RaceLost { .. }),
                    "losers must fail AlreadyClaimed or RaceLost, got {err:?}"
                );
            }
        }

        assert_eq!(db.load_task("T-001").unwrap().executor.unwrap().pid, 4242);
        assert_eq!(db.list_events("T-001", None, None).unwrap().len(), 1);
    }

    /// Distinct pids race; whoever commits first owns the task and every
    /// loser's error names that winner.
    #[test]
    fn racing_distinct_pids_still_elect_exactly_one() {
        let db = setup_db();
        save_resumable(&db, "T-001", TaskStatus::Paused);
        let pids: Vec<u32> = (0..6).map(|i| 1000 + i).collect();
        let probe = Arc::new(FakeProbe::with_alive(&pids));
        let barrier = Arc::new(Barrier::new(pids.len()));

        let mut handles = Vec::new();
        for pid in &pids {
            let db = db.clone();
            let probe = Arc::clone(&probe);
            let barrier = Arc::clone(&barrier);
            let pid = *pid;
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                (pid, db.try_claim("T-001", pid, "host-a", &*probe))
            }));
        }

        let results: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        let winning_pids: Vec<u32> = results
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(pid, _)| *pid)
            .collect();
        assert_eq!(winning_pids.len(), 1);
        let winner = winning_pids[0];

        for (_, result) in &results {
            if let Err(StoreError::AlreadyClaimed { pid, .. }) = result {
                assert_eq!(*pid, winner, "losers must be told the winning pid");
            }
        }
        assert_eq!(
            db.load_task("T-001").unwrap().executor.unwrap().pid,
            winner
        );
    }
}

mod release_and_heartbeat_tests {
    use super::*;

    #[test]
    fn release_clears_the_executor_and_logs_an_event() {
        let db = setup_db();
        save_resumable(&db, "T-001", TaskStatus::Failed);
        let probe = FakeProbe::with_alive(&[4242]);
        db.try_claim("T-001", 4242, "host-a", &probe).unwrap();

        db.release_claim("T-001", 4242).unwrap();

        let loaded = db.load_task("T-001").unwrap();
        assert!(loaded.executor.is_none());
        // Release leaves the status for the caller's own outcome save.
        assert_eq!(loaded.status, TaskStatus::Running);

        let kinds: Vec<String> = db
            .list_events("T-001", None, None)
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, ["claim", "release"]);
    }

    #[test]
    fn release_by_a_non_holder_is_invalid_state() {
        let db = setup_db();
        save_resumable(&db, "T-001", TaskStatus::Failed);
        let probe = FakeProbe::with_alive(&[4242]);
        db.try_claim("T-001", 4242, "host-a", &probe).unwrap();

        let err = db.release_claim("T-001", 9999).unwrap_err();

        assert!(matches!(err, StoreError::InvalidState { .. }));
        assert_eq!(db.load_task("T-001").unwrap().executor.unwrap().pid, 4242);
    }

    #[test]
    fn release_of_a_missing_task_is_not_found() {
        let db = setup_db();

        assert!(matches!(
            db.release_claim("T-404", 4242),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn a_released_task_is_claimable_even_while_the_old_holder_lives() {
        let db = setup_db();
        save_resumable(&db, "T-001", TaskStatus::Failed);
        let probe = FakeProbe::with_alive(&[4242, 9999]);
        db.try_claim("T-001", 4242, "host-a", &probe).unwrap();
        db.release_claim("T-001", 4242).unwrap();

        let taken = db.try_claim("T-001", 9999, "host-b", &probe).unwrap();

        assert_eq!(taken.executor.unwrap().pid, 9999);
    }

    #[test]
    fn heartbeat_refresh_touches_only_the_heartbeat() {
        let db = setup_db();
        save_resumable(&db, "T-001", TaskStatus::Failed);
        let probe = FakeProbe::with_alive(&[4242]);
        let claimed = db.try_claim("T-001", 4242, "host-a", &probe).unwrap();
        let started_at = claimed.executor.unwrap().started_at;

        db.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET executor_heartbeat = 1000 WHERE id = ?1",
                params!["T-001"],
            )?;
            Ok(())
        })
        .unwrap();

        db.refresh_heartbeat("T-001", 4242).unwrap();

        let executor = db.load_task("T-001").unwrap().executor.unwrap();
        assert!(executor.last_heartbeat > 1000);
        assert_eq!(executor.started_at, started_at);
    }

    #[test]
    fn heartbeat_refresh_by_a_non_holder_is_rejected() {
        let db = setup_db();
        save_resumable(&db, "T-001", TaskStatus::Failed);
        let probe = FakeProbe::with_alive(&[4242]);
        db.try_claim("T-001", 4242, "host-a", &probe).unwrap();

        assert!(matches!(
            db.refresh_heartbeat("T-001", 9999),
            Err(StoreError::InvalidState { .. })
        ));
        assert!(matches!(
            db.refresh_heartbeat("T-404", 4242),
            Err(StoreError::NotFound { .. })
        ));
    }
}
