// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use mortgage_ledger::{
    AllowTable, Amount, Engine, ErrorClass, FileId, FileState, LedgerError, MortgageInit,
    MortgageTable, OperationEntry, OperationKind, OperationLog, Privilege, Settlement,
    SettlementSync, SyncError, UserId,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Records every settlement it receives; fails while `failing` is set.
#[derive(Default)]
struct RecordingSync {
    calls: Mutex<Vec<Settlement>>,
    failing: AtomicBool,
}

impl RecordingSync {
    fn calls(&self) -> Vec<Settlement> {
        self.calls.lock().clone()
    }
}

impl SettlementSync for RecordingSync {
    fn sync(&self, settlement: &Settlement) -> Result<(), SyncError> {
        self.calls.lock().push(settlement.clone());
        if self.failing.load(Ordering::SeqCst) {
            Err(SyncError::Rejected("chain unavailable".into()))
        } else {
            Ok(())
        }
    }
}

fn user(name: &str) -> UserId {
    UserId::from(name)
}

fn amount(value: u64) -> Amount {
    Amount::from(value)
}

fn setup() -> (Engine, Arc<RecordingSync>) {
    let sync = Arc::new(RecordingSync::default());
    let engine = Engine::in_memory(sync.clone());
    (engine, sync)
}

/// F1 owned by alice: alice rw/100, bob rw/50, carol ro/0.
fn init_f1(engine: &Engine) -> FileId {
    let file = FileId::from("F1");
    let grants = AllowTable::from([
        (user("alice"), Privilege::ReadWrite),
        (user("bob"), Privilege::ReadWrite),
        (user("carol"), Privilege::ReadOnly),
    ]);
    let mortgage = MortgageTable::from([(user("alice"), amount(100)), (user("bob"), amount(50))]);
    engine
        .init_file(&user("alice"), &file, &grants, &mortgage)
        .unwrap();
    file
}

#[test]
fn init_seeds_balances_from_mortgage() {
    let (engine, _) = setup();
    let file = init_f1(&engine);

    assert_eq!(
        engine.read_value(&user("alice"), &file, &user("alice")).unwrap(),
        amount(100)
    );
    assert_eq!(
        engine.read_value(&user("alice"), &file, &user("bob")).unwrap(),
        amount(50)
    );
    assert_eq!(engine.store().grant_count(&file), 3);
    assert_eq!(engine.store().lane_len(&file), Some(2));

    let record = engine.file(&file).unwrap().unwrap();
    assert_eq!(record.owner, user("alice"));
    assert_eq!(record.state, FileState::Open);
}

#[test]
fn read_is_file_scoped() {
    let (engine, _) = setup();
    let file = init_f1(&engine);

    // carol only holds a read grant but may read any participant
    assert_eq!(
        engine.read_value(&user("carol"), &file, &user("alice")).unwrap(),
        amount(100)
    );
    // users with a grant but no entries read zero
    assert_eq!(
        engine.read_value(&user("carol"), &file, &user("carol")).unwrap(),
        Amount::zero()
    );
}

#[test]
fn duplicate_init_fails_and_keeps_original() {
    let (engine, _) = setup();
    let file = init_f1(&engine);

    let result = engine.init_file(
        &user("mallory"),
        &file,
        &AllowTable::from([(user("mallory"), Privilege::ReadWrite)]),
        &MortgageTable::from([(user("mallory"), amount(1_000))]),
    );
    assert!(matches!(result, Err(LedgerError::AlreadyExists)));

    let record = engine.file(&file).unwrap().unwrap();
    assert_eq!(record.owner, user("alice"));
    assert_eq!(engine.store().grant_count(&file), 3);
    assert_eq!(engine.store().lane_len(&file), Some(2));
    assert!(matches!(
        engine.read_value(&user("mallory"), &file, &user("mallory")),
        Err(LedgerError::NoPermission)
    ));
}

#[test]
fn failed_init_leaves_nothing_behind() {
    let (engine, _) = setup();
    let file = FileId::from("F2");
    let result = engine.init_file(
        &user("alice"),
        &file,
        &AllowTable::from([(user("alice"), Privilege::ReadWrite)]),
        &MortgageTable::from([(user("alice"), amount(10)), (user("bob"), Amount::from(-5i64))]),
    );
    assert!(matches!(result, Err(LedgerError::NoNegativeValueAllowed)));

    assert!(engine.store().is_empty());
    assert!(engine.file(&file).unwrap().is_none());
    assert_eq!(engine.store().grant_count(&file), 0);
    assert_eq!(engine.store().lane_len(&file), None);
}

#[test]
fn empty_identifiers_are_rejected() {
    let (engine, _) = setup();
    let grants = AllowTable::new();
    let mortgage = MortgageTable::new();

    assert!(matches!(
        engine.init_file(&user("alice"), &FileId::from(""), &grants, &mortgage),
        Err(LedgerError::EmptyIdentifier)
    ));
    assert!(matches!(
        engine.init_file(&user(""), &FileId::from("F1"), &grants, &mortgage),
        Err(LedgerError::EmptyIdentifier)
    ));
    assert!(engine.store().is_empty());
}

#[test]
fn init_without_contributors_creates_empty_lane() {
    let (engine, _) = setup();
    let file = FileId::from("F3");
    engine
        .init_file(
            &user("alice"),
            &file,
            &AllowTable::from([(user("alice"), Privilege::ReadWrite)]),
            &MortgageTable::new(),
        )
        .unwrap();

    assert_eq!(engine.store().lane_len(&file), Some(0));
    assert!(engine.final_balances(&file).unwrap().is_empty());
}

#[test]
fn subtract_reduces_balance() {
    let (engine, _) = setup();
    let file = init_f1(&engine);

    let remaining = engine
        .subtract_value(&user("alice"), &file, &amount(30))
        .unwrap();
    assert_eq!(remaining, amount(70));
    assert_eq!(
        engine.read_value(&user("bob"), &file, &user("alice")).unwrap(),
        amount(70)
    );
    assert_eq!(engine.store().lane_len(&file), Some(3));
}

#[test]
fn subtract_can_drain_to_zero() {
    let (engine, _) = setup();
    let file = init_f1(&engine);

    let remaining = engine
        .subtract_value(&user("bob"), &file, &amount(50))
        .unwrap();
    assert!(remaining.is_zero());
}

#[test]
fn overdraft_is_rejected_without_append() {
    let (engine, _) = setup();
    let file = init_f1(&engine);

    assert!(matches!(
        engine.subtract_value(&user("bob"), &file, &amount(51)),
        Err(LedgerError::InsufficientBalance)
    ));
    assert_eq!(engine.store().lane_len(&file), Some(2));
    assert_eq!(
        engine.read_value(&user("bob"), &file, &user("bob")).unwrap(),
        amount(50)
    );
}

#[test]
fn negative_subtract_is_rejected() {
    let (engine, _) = setup();
    let file = init_f1(&engine);

    let result = engine.subtract_value(&user("alice"), &file, &Amount::from(-1i64));
    assert!(matches!(result, Err(LedgerError::NoNegativeValueAllowed)));
    assert_eq!(engine.store().lane_len(&file), Some(2));
}

#[test]
fn privilege_gates_reads_and_writes() {
    let (engine, _) = setup();
    let file = FileId::from("F4");
    engine
        .init_file(
            &user("alice"),
            &file,
            &AllowTable::from([
                (user("alice"), Privilege::ReadWrite),
                (user("reader"), Privilege::ReadOnly),
                (user("writer"), Privilege::WriteOnly),
            ]),
            &MortgageTable::from([(user("reader"), amount(10)), (user("writer"), amount(10))]),
        )
        .unwrap();

    assert!(matches!(
        engine.subtract_value(&user("reader"), &file, &amount(1)),
        Err(LedgerError::NoPermission)
    ));
    assert!(matches!(
        engine.read_value(&user("writer"), &file, &user("writer")),
        Err(LedgerError::NoPermission)
    ));
    assert_eq!(
        engine
            .subtract_value(&user("writer"), &file, &amount(4))
            .unwrap(),
        amount(6)
    );
}

#[test]
fn unknown_user_or_file_has_no_permission() {
    let (engine, _) = setup();
    let file = init_f1(&engine);

    let err = engine
        .read_value(&user("dave"), &file, &user("alice"))
        .unwrap_err();
    assert!(matches!(err, LedgerError::NoPermission));
    assert_eq!(err.class(), ErrorClass::Authorization);

    assert!(matches!(
        engine.read_value(&user("alice"), &FileId::from("nope"), &user("alice")),
        Err(LedgerError::NoPermission)
    ));
    assert!(matches!(
        engine.subtract_value(&user("alice"), &FileId::from("nope"), &amount(1)),
        Err(LedgerError::NoPermission)
    ));
}

#[test]
fn terminate_settles_final_balances() {
    let (engine, sync) = setup();
    let file = init_f1(&engine);
    engine
        .subtract_value(&user("alice"), &file, &amount(40))
        .unwrap();

    let settlement = engine.terminate(&user("alice"), &file).unwrap();
    assert!(settlement.terminate);
    assert_eq!(settlement.from_account, user("alice"));
    assert_eq!(settlement.file_id, file);
    assert_eq!(settlement.balances.len(), 2);
    assert_eq!(settlement.balances[&user("alice")], amount(60));
    assert_eq!(settlement.balances[&user("bob")], amount(50));

    assert_eq!(sync.calls(), vec![settlement]);
    assert_eq!(
        engine.file(&file).unwrap().unwrap().state,
        FileState::Terminated
    );
}

#[test]
fn only_owner_may_terminate() {
    let (engine, sync) = setup();
    let file = init_f1(&engine);

    // bob holds read-write but is not the owner
    assert!(matches!(
        engine.terminate(&user("bob"), &file),
        Err(LedgerError::NotOwner)
    ));
    assert!(sync.calls().is_empty());
    assert_eq!(engine.file(&file).unwrap().unwrap().state, FileState::Open);
}

#[test]
fn terminate_twice_fails() {
    let (engine, sync) = setup();
    let file = init_f1(&engine);

    engine.terminate(&user("alice"), &file).unwrap();
    assert!(matches!(
        engine.terminate(&user("alice"), &file),
        Err(LedgerError::AlreadyTerminated)
    ));
    assert_eq!(sync.calls().len(), 1);
}

#[test]
fn terminate_unknown_file_is_not_found() {
    let (engine, _) = setup();
    assert!(matches!(
        engine.terminate(&user("alice"), &FileId::from("nope")),
        Err(LedgerError::NotFound)
    ));
}

#[test]
fn terminated_file_is_frozen_but_readable() {
    let (engine, _) = setup();
    let file = init_f1(&engine);
    engine.terminate(&user("alice"), &file).unwrap();

    assert!(matches!(
        engine.subtract_value(&user("bob"), &file, &amount(1)),
        Err(LedgerError::FileTerminated)
    ));
    assert_eq!(
        engine.read_value(&user("carol"), &file, &user("bob")).unwrap(),
        amount(50)
    );
}

#[test]
fn sync_failure_keeps_file_terminated_and_resync_replays() {
    let (engine, sync) = setup();
    let file = init_f1(&engine);
    engine
        .subtract_value(&user("bob"), &file, &amount(20))
        .unwrap();

    sync.failing.store(true, Ordering::SeqCst);
    let err = engine.terminate(&user("alice"), &file).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::SyncFailed(SyncError::Rejected(_))
    ));
    assert_eq!(err.class(), ErrorClass::Settlement);
    assert_eq!(
        engine.file(&file).unwrap().unwrap().state,
        FileState::Terminated
    );

    sync.failing.store(false, Ordering::SeqCst);
    let settlement = engine.resync_settlement(&user("alice"), &file).unwrap();
    assert_eq!(settlement.balances[&user("bob")], amount(30));

    let calls = sync.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], calls[1]);
}

#[test]
fn resync_requires_owner_and_terminated_file() {
    let (engine, _) = setup();
    let file = init_f1(&engine);

    assert!(matches!(
        engine.resync_settlement(&user("alice"), &file),
        Err(LedgerError::NotTerminated)
    ));
    engine.terminate(&user("alice"), &file).unwrap();
    assert!(matches!(
        engine.resync_settlement(&user("bob"), &file),
        Err(LedgerError::NotOwner)
    ));
    assert!(matches!(
        engine.resync_settlement(&user("alice"), &FileId::from("nope")),
        Err(LedgerError::NotFound)
    ));
}

#[test]
fn files_are_isolated() {
    let (engine, _) = setup();
    let f1 = init_f1(&engine);
    let f2 = FileId::from("F2");
    engine
        .init_file(
            &user("bob"),
            &f2,
            &AllowTable::from([(user("alice"), Privilege::ReadWrite)]),
            &MortgageTable::from([(user("alice"), amount(7))]),
        )
        .unwrap();

    engine
        .subtract_value(&user("alice"), &f2, &amount(7))
        .unwrap();
    assert_eq!(
        engine.read_value(&user("alice"), &f1, &user("alice")).unwrap(),
        amount(100)
    );

    engine.terminate(&user("bob"), &f2).unwrap();
    assert_eq!(engine.file(&f1).unwrap().unwrap().state, FileState::Open);
}

#[test]
fn unrecognized_entry_fails_replay() {
    let (engine, _) = setup();
    let file = init_f1(&engine);
    engine
        .store()
        .append(
            &file,
            OperationEntry::new(
                user("alice"),
                OperationKind::parse("rebate"),
                amount(5),
            ),
        )
        .unwrap();

    let err = engine
        .read_value(&user("alice"), &file, &user("alice"))
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnsupportedOperation(ref kind) if kind == "rebate"));

    // an unreadable lane blocks termination and leaves the file open
    assert!(matches!(
        engine.terminate(&user("alice"), &file),
        Err(LedgerError::UnsupportedOperation(_))
    ));
    assert_eq!(engine.file(&file).unwrap().unwrap().state, FileState::Open);
}

#[test]
fn chain_event_creates_file() {
    let (engine, sync) = setup();
    let init: MortgageInit = serde_json::from_str(
        r#"{
            "fromAccount": "alice",
            "fileID": "F9",
            "mortgage": {"alice": "0x64", "bob": "0x32"},
            "authority": {"alice": 0, "bob": 2},
            "createTime": 1700000000,
            "endTime": 1700086400
        }"#,
    )
    .unwrap();
    engine.apply_mortgage_init(&init).unwrap();

    let file = FileId::from("F9");
    let record = engine.file(&file).unwrap().unwrap();
    assert_eq!(record.owner, user("alice"));
    assert!(record.origin.contains("1700086400"));

    assert_eq!(
        engine
            .subtract_value(&user("bob"), &file, &amount(0x32))
            .unwrap(),
        Amount::zero()
    );
    let settlement = engine.terminate(&user("alice"), &file).unwrap();
    assert_eq!(settlement.balances[&user("alice")], amount(100));
    assert_eq!(sync.calls().len(), 1);
}

#[test]
fn chain_event_with_bad_authority_is_rejected() {
    let (engine, _) = setup();
    let init: MortgageInit = serde_json::from_str(
        r#"{
            "fromAccount": "alice",
            "fileID": "F9",
            "mortgage": {"alice": "0x1"},
            "authority": {"alice": 7}
        }"#,
    )
    .unwrap();

    assert!(matches!(
        engine.apply_mortgage_init(&init),
        Err(LedgerError::InvalidPrivilege(_))
    ));
    assert!(engine.store().is_empty());
}

#[test]
fn settlement_serializes_in_chain_shape() {
    let (engine, _) = setup();
    let file = init_f1(&engine);
    let settlement = engine.terminate(&user("alice"), &file).unwrap();

    let value = serde_json::to_value(&settlement).unwrap();
    assert_eq!(value["fromAccount"], "alice");
    assert_eq!(value["fileID"], "F1");
    assert_eq!(value["terminate"], true);
    assert_eq!(value["sidechain"]["alice"], "0x64");
    assert_eq!(value["sidechain"]["bob"], "0x32");
}

#[test]
fn end_to_end_single_contributor() {
    let (engine, sync) = setup();
    let alice = user("alice");
    let file = FileId::from("F1");
    engine
        .init_file(
            &alice,
            &file,
            &AllowTable::from([(alice.clone(), Privilege::ReadWrite)]),
            &MortgageTable::from([(alice.clone(), amount(100))]),
        )
        .unwrap();

    assert_eq!(engine.read_value(&alice, &file, &alice).unwrap(), amount(100));
    assert_eq!(
        engine.subtract_value(&alice, &file, &amount(40)).unwrap(),
        amount(60)
    );
    assert!(matches!(
        engine.subtract_value(&alice, &file, &amount(61)),
        Err(LedgerError::InsufficientBalance)
    ));

    engine.terminate(&alice, &file).unwrap();
    let calls = sync.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].terminate);
    assert_eq!(calls[0].from_account, alice);
    assert_eq!(calls[0].file_id, file);
    assert_eq!(
        calls[0].balances,
        mortgage_ledger::Balances::from([(alice.clone(), amount(60))])
    );
}

#[test]
fn read_only_owner_cannot_withdraw_and_strangers_cannot_read() {
    let (engine, _) = setup();
    let alice = user("alice");
    let file = FileId::from("F1");
    engine
        .init_file(
            &alice,
            &file,
            &AllowTable::from([(alice.clone(), Privilege::ReadOnly)]),
            &MortgageTable::from([(alice.clone(), amount(100))]),
        )
        .unwrap();

    assert!(matches!(
        engine.subtract_value(&alice, &file, &amount(1)),
        Err(LedgerError::NoPermission)
    ));
    assert!(matches!(
        engine.read_value(&user("bob"), &file, &alice),
        Err(LedgerError::NoPermission)
    ));
    assert_eq!(engine.store().lane_len(&file), Some(1));
}
