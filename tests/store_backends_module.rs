use caseflow::shared::{CaseHandle, CaseId};
use caseflow::store::{
    FileSuspensionStore, HandleLookup, HandleStatus, MemorySuspensionStore,
    SqliteSuspensionStore, StoreError, SuspensionStore,
};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn handle(raw: &str) -> CaseHandle {
    CaseHandle::parse(raw).expect("handle")
}

fn case(raw: &str) -> CaseId {
    CaseId::parse(raw).expect("case id")
}

fn each_backend(check: impl Fn(&str, Arc<dyn SuspensionStore>)) {
    check("memory", Arc::new(MemorySuspensionStore::new()));

    let file_dir = tempdir().expect("tempdir");
    check(
        "file",
        Arc::new(FileSuspensionStore::new(file_dir.path()).expect("file store")),
    );

    let sqlite_dir = tempdir().expect("tempdir");
    check(
        "sqlite",
        Arc::new(SqliteSuspensionStore::for_state_root(sqlite_dir.path()).expect("sqlite store")),
    );
}

#[test]
fn load_claims_a_pending_handle_once() {
    each_backend(|backend, store| {
        let h = handle("hdl-claim");
        store
            .save(&h, &case("c-claim"), r#"{"gate":"report_approval"}"#)
            .expect("save");
        assert_eq!(
            store.status(&h).expect("status"),
            Some(HandleStatus::Pending),
            "{backend}"
        );

        assert_eq!(
            store.load(&h).expect("load"),
            HandleLookup::Pending(r#"{"gate":"report_approval"}"#.to_string()),
            "{backend}"
        );
        assert_eq!(
            store.load(&h).expect("second load"),
            HandleLookup::Closed(HandleStatus::Resumed),
            "{backend}"
        );
        assert_eq!(
            store.load(&handle("hdl-never")).expect("unknown"),
            HandleLookup::Unknown,
            "{backend}"
        );
        assert_eq!(store.status(&handle("hdl-never")).expect("status"), None);
    });
}

#[test]
fn release_returns_a_claimed_handle_to_pending() {
    each_backend(|backend, store| {
        let h = handle("hdl-release");
        store.save(&h, &case("c-1"), "{}").expect("save");

        let err = store.release(&h).expect_err("pending cannot be released");
        assert!(
            matches!(
                err,
                StoreError::NotResumed {
                    status: HandleStatus::Pending,
                    ..
                }
            ),
            "{backend}: {err}"
        );

        store.load(&h).expect("load");
        store.release(&h).expect("release");
        assert_eq!(
            store.load(&h).expect("reload"),
            HandleLookup::Pending("{}".to_string()),
            "{backend}"
        );
        assert!(matches!(
            store.release(&handle("hdl-ghost")),
            Err(StoreError::UnknownHandle { .. })
        ));
    });
}

#[test]
fn cancelled_handles_stay_cancelled() {
    each_backend(|backend, store| {
        let h = handle("hdl-cancel");
        store.save(&h, &case("c-1"), "{}").expect("save");
        assert_eq!(
            store.cancel(&h).expect("cancel"),
            HandleLookup::Pending("{}".to_string()),
            "{backend}"
        );
        assert_eq!(
            store.load(&h).expect("load"),
            HandleLookup::Closed(HandleStatus::Cancelled),
            "{backend}"
        );
        assert_eq!(
            store.cancel(&h).expect("cancel again"),
            HandleLookup::Closed(HandleStatus::Cancelled),
            "{backend}"
        );
        assert_eq!(
            store.status(&h).expect("status"),
            Some(HandleStatus::Cancelled)
        );
    });
}

#[test]
fn handles_are_never_overwritten() {
    each_backend(|backend, store| {
        let h = handle("hdl-dup");
        store.save(&h, &case("c-dup"), "first").expect("save");
        store.load(&h).expect("load");
        let err = store
            .save(&h, &case("c-dup"), "second")
            .expect_err("duplicate");
        assert!(
            matches!(err, StoreError::DuplicateHandle { .. }),
            "{backend}: {err}"
        );
    });
}

#[test]
fn pending_lists_only_unclaimed_handles_in_handle_order() {
    each_backend(|backend, store| {
        for raw in ["hdl-c", "hdl-a", "hdl-b"] {
            store.save(&handle(raw), &case(raw), raw).expect("save");
        }
        store.load(&handle("hdl-b")).expect("claim");

        let pending: Vec<_> = store
            .pending()
            .expect("pending")
            .into_iter()
            .map(|(h, body)| (h.as_str().to_string(), body))
            .collect();
        assert_eq!(
            pending,
            vec![
                ("hdl-a".to_string(), "hdl-a".to_string()),
                ("hdl-c".to_string(), "hdl-c".to_string()),
            ],
            "{backend}"
        );
    });
}

#[test]
fn concurrent_claims_admit_exactly_one_caller() {
    each_backend(|backend, store| {
        let h = handle("hdl-race");
        store.save(&h, &case("c-race"), "body").expect("save");

        let lookups: Vec<HandleLookup> = thread::scope(|scope| {
            let claims: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| store.load(&h).expect("load")))
                .collect();
            claims
                .into_iter()
                .map(|claim| claim.join().expect("join"))
                .collect()
        });

        let winners = lookups
            .iter()
            .filter(|lookup| matches!(lookup, HandleLookup::Pending(_)))
            .count();
        assert_eq!(winners, 1, "{backend}");
        assert!(lookups.iter().all(|lookup| matches!(
            lookup,
            HandleLookup::Pending(_) | HandleLookup::Closed(HandleStatus::Resumed)
        )));
    });
}

#[test]
fn durable_stores_survive_reopening() {
    let dir = tempdir().expect("tempdir");
    let h = handle("hdl-durable");

    SqliteSuspensionStore::for_state_root(dir.path())
        .expect("sqlite")
        .save(&h, &case("c-durable"), "sqlite body")
        .expect("save");
    let reopened = SqliteSuspensionStore::for_state_root(dir.path()).expect("reopen");
    assert_eq!(
        reopened.load(&h).expect("load"),
        HandleLookup::Pending("sqlite body".to_string())
    );
    assert!(reopened.db_path().ends_with("cases/suspensions.db"));

    FileSuspensionStore::new(dir.path())
        .expect("file")
        .save(&h, &case("c-durable"), "file body")
        .expect("save");
    let reopened = FileSuspensionStore::new(dir.path()).expect("reopen");
    assert_eq!(
        reopened.status(&h).expect("status"),
        Some(HandleStatus::Pending)
    );
    assert!(dir.path().join("cases/pending/hdl-durable.json").is_file());
}

#[test]
fn expired_handles_cannot_be_claimed() {
    each_backend(|backend, store| {
        let h = handle("hdl-expire");
        store.save(&h, &case("c-late"), "late").expect("save");
        assert_eq!(
            store.expire(&h).expect("expire"),
            HandleLookup::Pending("late".to_string()),
            "{backend}"
        );
        assert_eq!(
            store.load(&h).expect("load"),
            HandleLookup::Closed(HandleStatus::Expired),
            "{backend}"
        );
        assert_eq!(
            store.expire(&h).expect("expire again"),
            HandleLookup::Closed(HandleStatus::Expired),
            "{backend}"
        );
        assert!(store.pending().expect("pending").is_empty(), "{backend}");
    });
}

#[test]
fn peek_reads_without_claiming() {
    each_backend(|backend, store| {
        let h = handle("hdl-peek");
        store.save(&h, &case("c-peek"), "look").expect("save");
        assert_eq!(
            store.peek(&h).expect("peek"),
            Some((HandleStatus::Pending, "look".to_string())),
            "{backend}"
        );
        assert_eq!(
            store.load(&h).expect("load"),
            HandleLookup::Pending("look".to_string()),
            "{backend}"
        );
        assert_eq!(
            store.peek(&h).expect("peek after claim"),
            Some((HandleStatus::Resumed, "look".to_string())),
            "{backend}"
        );
        assert_eq!(store.peek(&handle("hdl-none")).expect("peek"), None);
    });
}

#[test]
fn pending_handle_is_found_by_case_until_claimed() {
    each_backend(|backend, store| {
        let first = handle("hdl-first");
        store.save(&first, &case("c-a"), "{}").expect("save a");
        store
            .save(&handle("hdl-other"), &case("c-b"), "{}")
            .expect("save b");

        assert_eq!(
            store.pending_for_case(&case("c-a")).expect("lookup"),
            Some(first.clone()),
            "{backend}"
        );
        assert_eq!(
            store.pending_for_case(&case("c-z")).expect("lookup"),
            None,
            "{backend}"
        );

        store.cancel(&first).expect("cancel");
        assert_eq!(
            store.pending_for_case(&case("c-a")).expect("lookup"),
            None,
            "{backend}"
        );
    });
}
