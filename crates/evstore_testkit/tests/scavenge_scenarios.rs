//! Scavenge scenarios over a whole store.

use evstore_core::scavenge::KeepAll;
use evstore_core::{
    CancelToken, CoreError, Database, ExpectedVersion, LinkTarget, LogRecord, NewEvent,
    ReadEventResult, SliceStatus, TFPos,
};
use evstore_testkit::scenarios::{self, LINK_STREAM, TARGET_STREAM};
use evstore_testkit::{ScenarioBuilder, TestStore};

fn scavenged_link_store() -> TestStore {
    let store = TestStore::memory();
    scenarios::link_to_stream(&store).unwrap();
    let result = store.scavenge().unwrap();
    assert_eq!(result.chunks_rewritten, 1);
    assert_eq!(result.events_discarded, 1);
    store
}

#[test]
fn first_link_is_gone_and_last_survives() {
    let store = scavenged_link_store();

    assert_eq!(
        store.read_event(LINK_STREAM, 0).unwrap(),
        ReadEventResult::NotFound
    );
    let last = store.read_event(LINK_STREAM, 1).unwrap().into_event().unwrap();
    assert_eq!(last.event_number, 1);
    assert!(last.is_link());
    assert_eq!(
        LinkTarget::parse(&last.data).unwrap(),
        LinkTarget::new(12, TARGET_STREAM)
    );
}

#[test]
fn every_read_sees_only_the_last_link() {
    let store = scavenged_link_store();

    let forward = store.read_stream_forward(LINK_STREAM, 0, 10).unwrap();
    assert_eq!(forward.status, SliceStatus::Success);
    assert_eq!(forward.events.len(), 1);
    assert_eq!(forward.events[0].event_number, 1);
    assert_eq!(forward.last_event_number, 1);

    let backward = store.read_stream_backward(LINK_STREAM, -1, 10).unwrap();
    assert_eq!(backward.events.len(), 1);
    assert_eq!(backward.events[0].event_number, 1);

    let all_forward = store.read_all_forward(TFPos::START, 10).unwrap();
    assert_eq!(all_forward.events.len(), 1);
    assert_eq!(all_forward.events[0].1.event_number, 1);

    let head = TFPos::head(store.writer_checkpoint());
    let all_backward = store.read_all_backward(head, 10).unwrap();
    assert_eq!(all_backward.events.len(), 1);
    assert_eq!(all_backward.events[0].1.event_number, 1);
}

#[test]
fn first_chunk_holds_only_the_last_transaction() {
    let store = scavenged_link_store();

    let chunks = store.chunk_infos().unwrap();
    let chunk = &chunks[0];
    assert!(chunk.sealed);
    assert_eq!(chunk.version, 1);
    assert_eq!(chunk.record_count, 2);

    let records: Vec<LogRecord> = store
        .scan_log(0)
        .unwrap()
        .map(Result::unwrap)
        .take_while(|r| r.position() < chunk.end_position)
        .collect();
    assert_eq!(records.len(), 2);

    let LogRecord::Prepare(prepare) = &records[0] else {
        panic!("expected a prepare, got {:?}", records[0]);
    };
    assert_eq!(prepare.stream_id, LINK_STREAM);
    assert_eq!(prepare.data, b"12@test-stream");

    let LogRecord::Commit(commit) = &records[1] else {
        panic!("expected a commit, got {:?}", records[1]);
    };
    assert_eq!(commit.transaction_position, prepare.position);
    assert_eq!(commit.first_event_number, 1);
}

#[test]
fn surviving_link_is_still_unresolved() {
    let store = scavenged_link_store();
    let last = store.read_event(LINK_STREAM, 1).unwrap().into_event().unwrap();
    let err = store.resolve_link(last).unwrap_err();
    assert!(matches!(err, CoreError::LinkUnresolved { ref target } if target == "12@test-stream"));
}

#[test]
fn links_do_not_need_their_target() {
    let store = TestStore::memory();
    scenarios::link_to_stream(&store).unwrap();

    assert!(store.stream_info(TARGET_STREAM).is_none());
    let slice = store.read_stream_forward(LINK_STREAM, 0, 10).unwrap();
    assert_eq!(slice.events.len(), 2);
}

#[test]
fn resolved_links_survive_default_policy() {
    let store = TestStore::memory();
    ScenarioBuilder::new()
        .events("orders", 3)
        .link("by-type", "orders", 0)
        .link("by-type", "orders", 2)
        .link("by-type", "orders", 9)
        .link("by-type", "orders", 1)
        .complete_chunk()
        .build(&store)
        .unwrap();

    let result = store.scavenge().unwrap();
    assert_eq!(result.events_discarded, 1);

    let numbers: Vec<i64> = store
        .read_stream_forward("by-type", 0, 10)
        .unwrap()
        .events
        .iter()
        .map(|e| e.event_number)
        .collect();
    assert_eq!(numbers, vec![0, 1, 3]);
    let resolved = store
        .resolve_link(store.read_event("by-type", 1).unwrap().into_event().unwrap())
        .unwrap();
    assert_eq!(resolved.event.stream_id, "orders");
    assert_eq!(resolved.event.event_number, 2);
}

#[test]
fn chained_links_go_in_a_single_pass() {
    let store = TestStore::memory();
    ScenarioBuilder::new()
        .link("x", "gone", 0)
        .events("x", 1)
        .link("a", "x", 0)
        .events("a", 1)
        .complete_chunk()
        .build(&store)
        .unwrap();

    let first = store.scavenge().unwrap();
    assert_eq!(first.events_discarded, 2);
    assert_eq!(first.records_discarded, 4);
    assert!(!store.read_event("x", 0).unwrap().is_success());
    assert!(!store.read_event("a", 0).unwrap().is_success());

    let second = store.scavenge().unwrap();
    assert_eq!(second.records_discarded, 0);
    assert_eq!(second.chunks_rewritten, 0);
    assert_eq!(store.stream_info("a").unwrap().last_event_number, 1);
}

#[test]
fn keep_all_changes_nothing() {
    let store = TestStore::memory();
    scenarios::link_to_stream(&store).unwrap();
    let before = store.chunk_infos().unwrap();

    let result = store.scavenge_with(KeepAll, CancelToken::new()).unwrap();
    assert_eq!(result.chunks_scanned, 1);
    assert_eq!(result.chunks_rewritten, 0);
    assert_eq!(result.records_discarded, 0);
    assert_eq!(store.chunk_infos().unwrap()[0], before[0]);
}

#[test]
fn open_chunk_is_left_for_later() {
    let db = Database::open_in_memory().unwrap();
    db.append(
        LINK_STREAM,
        ExpectedVersion::Any,
        vec![NewEvent::link_to(TARGET_STREAM, 11)],
    )
    .unwrap();
    db.append(
        LINK_STREAM,
        ExpectedVersion::Any,
        vec![NewEvent::link_to(TARGET_STREAM, 12)],
    )
    .unwrap();

    let result = db.scavenge().unwrap();
    assert_eq!(result.chunks_scanned, 0);
    assert!(db.read_event(LINK_STREAM, 0).unwrap().is_success());
}

#[test]
fn max_count_keeps_newest_per_stream() {
    let store = scenarios::populated_store(2, 6);
    let result = store
        .scavenge_with(evstore_core::scavenge::MaxCount(2), CancelToken::new())
        .unwrap();
    assert_eq!(result.events_discarded, 8);

    for stream in ["stream-0", "stream-1"] {
        let info = store.stream_info(stream).unwrap();
        assert_eq!(info.last_event_number, 5);
        assert_eq!(info.event_count, 2);
        let slice = store.read_stream_forward(stream, 0, 10).unwrap();
        let numbers: Vec<i64> = slice.events.iter().map(|e| e.event_number).collect();
        assert_eq!(numbers, vec![4, 5]);
    }
}

#[test]
fn stats_count_scavenge_work() {
    let store = scavenged_link_store();
    let stats = store.stats();
    assert_eq!(stats.scavenges, 1);
    assert_eq!(stats.chunks_rewritten, 1);
    assert_eq!(stats.records_discarded, 2);
}
