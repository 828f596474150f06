//! End-to-end flow over a real directory.

use medledger_app::{CreateOptions, MedLedger, MedLedgerManager};
use medledger_common::{Error, SubjectId};
use medledger_ledger::Difficulty;
use serde_json::json;
use tempfile::TempDir;

fn id(s: &str) -> SubjectId {
    SubjectId::new(s).unwrap()
}

fn create(temp: &TempDir) -> MedLedger {
    MedLedgerManager::new()
        .create(
            b"correct horse battery staple",
            "local",
            json!({ "root": temp.path() }),
            CreateOptions {
                difficulty: Difficulty::new(2).unwrap(),
                ..CreateOptions::default()
            },
        )
        .unwrap()
}

#[test]
fn grant_read_revoke_and_audit() {
    let temp = TempDir::new().unwrap();
    let core = create(&temp);
    let (alice, bob) = (id("alice"), id("bob"));

    let record = core.create_record(&alice, &alice, &json!({"bp": 120})).unwrap();
    assert_eq!(record.index, 0);

    let denied = core.read_record(&alice, 0, &bob, "consult").unwrap_err();
    assert!(matches!(denied, Error::AccessDenied { .. }));

    core.grant_access(&alice, &bob).unwrap();
    assert_eq!(
        core.read_record(&alice, 0, &bob, "consult").unwrap(),
        json!({"bp": 120})
    );

    let log = core.read_audit_log(&alice, &alice).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].accessor_id, bob);
    assert_eq!(log[0].purpose, "consult");

    core.revoke_access(&alice, &bob).unwrap();
    assert!(core.read_record(&alice, 0, &bob, "consult").unwrap_err().is_access_denied());
    assert!(core.read_audit_log(&alice, &bob).unwrap_err().is_access_denied());
}

#[test]
fn audit_grows_with_every_read() {
    let temp = TempDir::new().unwrap();
    let core = create(&temp);
    let alice = id("alice");

    for bp in [120, 118, 121] {
        core.create_record(&alice, &alice, &json!({ "bp": bp })).unwrap();
    }

    let before = core.read_audit_log(&alice, &alice).unwrap().len();
    core.read_record(&alice, 1, &alice, "trend").unwrap();
    assert_eq!(core.read_audit_log(&alice, &alice).unwrap().len(), before + 1);

    let history = core.read_history(&alice, &alice).unwrap();
    assert_eq!(history, vec![json!({"bp": 120}), json!({"bp": 118}), json!({"bp": 121})]);
    assert_eq!(core.read_audit_log(&alice, &alice).unwrap().len(), before + 4);
}

#[test]
fn ledger_anchors_survive_restart_and_detect_tampering() {
    let temp = TempDir::new().unwrap();
    let alice = id("alice");
    {
        let mut core = create(&temp);
        core.create_record(&alice, &alice, &json!({"bp": 120})).unwrap();
        core.update_record(&alice, 0, &alice, &json!({"bp": 110})).unwrap();
        let block = core.mine(&id("node")).unwrap();
        assert_eq!(block.transactions.len(), 2);
        assert!(block.hash.to_hex().starts_with("00"));
        core.flush().unwrap();
    }

    let manager = MedLedgerManager::new();
    let location = json!({ "root": temp.path() });
    let core = manager
        .open("local", location.clone(), b"correct horse battery staple")
        .unwrap();
    assert!(core.verify_ledger());
    assert_eq!(core.subject_transactions(&alice).len(), 2);
    drop(core);

    // Flip one byte inside the stored chain.
    let chain_path = temp.path().join("ledger").join("chain.bin");
    let mut bytes = std::fs::read(&chain_path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0x20;
    std::fs::write(&chain_path, bytes).unwrap();

    match manager.open("local", location, b"correct horse battery staple") {
        Err(e) => assert!(matches!(e, Error::Serialization(_))),
        Ok(core) => assert!(!core.verify_ledger()),
    }
}

#[test]
fn wrong_password_is_rejected() {
    let temp = TempDir::new().unwrap();
    drop(create(&temp));

    let result = MedLedgerManager::new().open("local", json!({ "root": temp.path() }), b"guess");
    assert!(result.is_err());
}

#[test]
fn concurrent_writers_on_local_storage_keep_every_anchor() {
    let temp = TempDir::new().unwrap();
    let subjects: Vec<SubjectId> = (0..16).map(|i| id(&format!("s{}", i))).collect();
    {
        let core = create(&temp);
        std::thread::scope(|scope| {
            for subject in &subjects {
                let core = &core;
                scope.spawn(move || {
                    core.create_record(subject, subject, &json!({"bp": 120})).unwrap();
                });
            }
        });
        assert_eq!(core.ledger().pending_transactions().len(), 16);
    }

    let core = MedLedgerManager::new()
        .open("local", json!({ "root": temp.path() }), b"correct horse battery staple")
        .unwrap();
    assert_eq!(core.ledger().pending_transactions().len(), 16);
    for subject in &subjects {
        assert_eq!(core.record_count(subject), 1);
    }
}
