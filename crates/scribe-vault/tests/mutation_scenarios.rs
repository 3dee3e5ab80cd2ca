use scribe_core::ArchiveConfig;
use scribe_observe::Observer;
use scribe_vault::{
    CancelToken, CommitOutcome, Fingerprint, MutationIntent, MutationKind, RejectReason,
    ServiceConfig, VersionedFileService,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;
use uuid::Uuid;

fn temp_service() -> (PathBuf, Arc<VersionedFileService>) {
    let workspace = std::env::temp_dir().join(format!("scribe-vault-it-{}", Uuid::now_v7()));
    fs::create_dir_all(&workspace).expect("workspace");
    let service = VersionedFileService::new(
        ServiceConfig::for_workspace(&workspace, &ArchiveConfig::default()),
        Arc::new(Observer::disabled()),
    );
    (workspace, Arc::new(service))
}

fn commit(service: &VersionedFileService, intent: MutationIntent) -> CommitOutcome {
    service
        .commit_mutation(intent, &CancelToken::new())
        .expect("commit")
}

fn write_via_service(service: &VersionedFileService, path: &Path, content: &str) -> CommitOutcome {
    let intent = service.observe(path).expect("observe").into_write(content);
    commit(service, intent)
}

#[test]
fn update_with_fresh_fingerprint_archives_prior_content() {
    let (workspace, service) = temp_service();
    let target = workspace.join("f.txt");
    fs::write(&target, "hello").expect("seed");

    let observation = service.observe(&target).expect("observe");
    assert_eq!(observation.fingerprint, Some(Fingerprint::of(b"hello")));
    let intent = observation.into_update("world").expect("update intent");
    let prior = intent.prior_version_id();

    let outcome = commit(&service, intent);
    let receipt = outcome.receipt().expect("committed");
    assert_eq!(receipt.kind, MutationKind::Update);
    assert_eq!(receipt.fingerprint, Some(Fingerprint::of(b"world")));
    assert_eq!(receipt.archived.as_ref().map(|r| r.version_id), Some(prior));
    assert_eq!(fs::read_to_string(&target).expect("read"), "world");
    assert_eq!(
        service.get_version(&target, prior).expect("get"),
        Some(b"hello".to_vec())
    );
}

#[test]
fn stale_update_is_rejected_and_leaves_external_edit_alone() {
    let (workspace, service) = temp_service();
    let target = workspace.join("f.txt");
    fs::write(&target, "hello").expect("seed");

    let intent = service
        .observe(&target)
        .expect("observe")
        .into_update("mine")
        .expect("intent");
    fs::write(&target, "external").expect("concurrent edit");

    let outcome = commit(&service, intent);
    assert_eq!(
        outcome,
        CommitOutcome::Rejected(RejectReason::HashMismatch {
            expected: Fingerprint::of(b"hello"),
            actual: Fingerprint::of(b"external"),
        })
    );
    assert_eq!(fs::read_to_string(&target).expect("read"), "external");
    assert!(service.list_versions(&target).expect("list").is_empty());
}

#[test]
fn create_over_existing_file_is_rejected() {
    let (workspace, service) = temp_service();
    let target = workspace.join("new.txt");
    let intent = MutationIntent::create(&target, "mine");
    fs::write(&target, "someone else's").expect("concurrent create");

    let outcome = commit(&service, intent);
    assert_eq!(outcome.reject_reason(), Some(&RejectReason::AlreadyExists));
    assert_eq!(fs::read_to_string(&target).expect("read"), "someone else's");
}

#[test]
fn update_of_vanished_file_is_not_found() {
    let (workspace, service) = temp_service();
    let target = workspace.join("gone.txt");
    fs::write(&target, "x").expect("seed");
    let intent = service
        .observe(&target)
        .expect("observe")
        .into_update("y")
        .expect("intent");
    fs::remove_file(&target).expect("external delete");

    let outcome = commit(&service, intent);
    assert_eq!(outcome.reject_reason(), Some(&RejectReason::NotFound));
    assert!(!target.exists());
}

#[test]
fn delete_archives_content_and_restore_brings_it_back() {
    let (workspace, service) = temp_service();
    let target = workspace.join("d.txt");
    fs::write(&target, "keep me").expect("seed");

    let intent = service
        .observe(&target)
        .expect("observe")
        .into_delete()
        .expect("delete intent");
    let prior = intent.prior_version_id();
    let outcome = commit(&service, intent);
    let receipt = outcome.receipt().expect("committed");
    assert_eq!(receipt.fingerprint, None);
    assert!(!target.exists());
    assert_eq!(
        service.get_version(&target, prior).expect("get"),
        Some(b"keep me".to_vec())
    );

    let restore = service
        .restore_intent(&target, prior)
        .expect("restore")
        .expect("version exists");
    assert_eq!(restore.kind(), MutationKind::Create);
    assert!(commit(&service, restore).is_committed());
    assert_eq!(fs::read_to_string(&target).expect("read"), "keep me");
}

#[test]
fn identical_update_is_rejected_as_no_change() {
    let (workspace, service) = temp_service();
    let target = workspace.join("same.txt");
    fs::write(&target, "abc").expect("seed");

    let outcome = write_via_service(&service, &target, "abc");
    assert_eq!(outcome.reject_reason(), Some(&RejectReason::NoChange));
    assert!(service.list_versions(&target).expect("list").is_empty());
}

#[test]
fn cancelled_commit_changes_nothing() {
    let (workspace, service) = temp_service();
    let target = workspace.join("c.txt");
    fs::write(&target, "before").expect("seed");

    let intent = service
        .observe(&target)
        .expect("observe")
        .into_update("after")
        .expect("intent");
    let cancel = CancelToken::new();
    cancel.cancel();
    let outcome = service.commit_mutation(intent, &cancel).expect("commit");
    assert_eq!(outcome, CommitOutcome::Cancelled);
    assert_eq!(fs::read_to_string(&target).expect("read"), "before");
    assert!(service.list_versions(&target).expect("list").is_empty());
}

#[test]
fn every_superseded_version_is_retrievable_and_linked() {
    let (workspace, service) = temp_service();
    let target = workspace.join("history.txt");
    assert!(write_via_service(&service, &target, "v0").is_committed());
    for i in 1..=4 {
        assert!(write_via_service(&service, &target, &format!("v{i}")).is_committed());
    }

    let records = service.version_records(&target).expect("records");
    assert_eq!(records.len(), 4);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(
            service.get_version(&target, record.version_id).expect("get"),
            Some(format!("v{i}").into_bytes())
        );
    }
    for pair in records.windows(2) {
        assert_eq!(pair[1].previous, Some(pair[0].version_id));
        assert_eq!(pair[0].next, Some(pair[1].version_id));
    }
    let head = service.archive().head(&target).expect("head").expect("head set");
    assert_eq!(records[3].next, Some(head.version_id));
}

#[test]
fn racing_updates_from_one_observation_commit_exactly_once() {
    let (workspace, service) = temp_service();
    let target = workspace.join("race.txt");
    fs::write(&target, "base").expect("seed");
    let observation = service.observe(&target).expect("observe");

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["left", "right"]
        .into_iter()
        .map(|content| {
            let service = service.clone();
            let barrier = barrier.clone();
            let intent = observation
                .clone()
                .into_update(content)
                .expect("intent");
            thread::spawn(move || {
                barrier.wait();
                service
                    .commit_mutation(intent, &CancelToken::new())
                    .expect("commit")
            })
        })
        .collect();
    let outcomes: Vec<CommitOutcome> = handles
        .into_iter()
        .map(|h| h.join().expect("join"))
        .collect();

    let committed = outcomes.iter().filter(|o| o.is_committed()).count();
    let mismatched = outcomes
        .iter()
        .filter(|o| matches!(o.reject_reason(), Some(RejectReason::HashMismatch { .. })))
        .count();
    assert_eq!((committed, mismatched), (1, 1));
    let on_disk = fs::read_to_string(&target).expect("read");
    assert!(on_disk == "left" || on_disk == "right");
    assert_eq!(service.list_versions(&target).expect("list").len(), 1);
}

#[test]
fn read_modify_write_retries_lose_no_updates() {
    let (workspace, service) = temp_service();
    let target = workspace.join("counter.txt");
    fs::write(&target, "").expect("seed");

    let workers = 6;
    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let service = service.clone();
            let target = target.clone();
            thread::spawn(move || {
                loop {
                    let observation = service.observe(&target).expect("observe");
                    let mut content = fs::read_to_string(&target).expect("read");
                    if observation.fingerprint != Some(Fingerprint::of(content.as_bytes())) {
                        continue;
                    }
                    content.push_str(&format!("worker-{worker}\n"));
                    match service
                        .commit_mutation(observation.into_write(content), &CancelToken::new())
                        .expect("commit")
                    {
                        CommitOutcome::Committed(_) => break,
                        CommitOutcome::Rejected(reason) => assert!(reason.is_stale()),
                        CommitOutcome::Cancelled => unreachable!("never cancelled"),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("join");
    }

    let final_content = fs::read_to_string(&target).expect("read");
    for worker in 0..workers {
        assert!(final_content.contains(&format!("worker-{worker}\n")));
    }
    assert_eq!(final_content.lines().count(), workers);
}

#[test]
fn concurrent_readers_never_see_partial_content() {
    let (workspace, service) = temp_service();
    let target = workspace.join("big.txt");
    let a = "a".repeat(256 * 1024);
    let b = "b".repeat(256 * 1024);
    fs::write(&target, &a).expect("seed");

    let reader_target = target.clone();
    let expected_len = a.len();
    let stop = CancelToken::new();
    let reader_stop = stop.clone();
    let reader = thread::spawn(move || {
        while !reader_stop.is_cancelled() {
            let content = fs::read(&reader_target).expect("target always exists");
            assert_eq!(content.len(), expected_len);
            assert!(content.iter().all(|&c| c == content[0]));
        }
    });

    for i in 0..20 {
        let next = if i % 2 == 0 { &b } else { &a };
        assert!(write_via_service(&service, &target, next).is_committed());
    }
    stop.cancel();
    reader.join().expect("reader saw only whole files");
}
