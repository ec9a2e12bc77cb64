mod common;

use common::{async_config, eventually, harness};
use formula_sql::{Arg, Completion, RequestDescriptor, Status, TopicState};
use pretty_assertions::assert_eq;
use std::time::Duration;

#[test]
fn configuration_gate_holds_requests_until_marked_ready() {
    let h = harness(async_config());
    assert!(!h.graph.is_configured());

    let initial = h.graph.subscribe(
        1,
        RequestDescriptor::query("SELECT x FROM src WHERE x > 2", vec![])
            .with_wait_for_config(true),
    );
    assert_eq!(initial, Status::awaiting_config().to_string());
    assert_eq!(initial, "#BLOCKED!config: waiting for configuration");
    assert_eq!(h.graph.topic_state(1), Some(TopicState::AwaitingConfig));

    // Startup statements still get through while requests wait.
    h.graph
        .execute_admin("CREATE TABLE settings (k TEXT, v TEXT)")
        .expect("admin statement");
    assert_eq!(h.probe.count_containing("WHERE x > 2"), 0);

    h.graph.mark_configured();
    assert!(h.graph.is_configured());
    assert_eq!(h.host.wait_for_push(1).as_deref(), Some("tbl:1 [2x1]"));

    // Later requests skip the gate entirely.
    let value = h.subscribe_settled(
        2,
        RequestDescriptor::query("SELECT 1 AS one", vec![]).with_wait_for_config(true),
    );
    assert_eq!(value, "tbl:2 [1x1]");
}

#[test]
fn requests_without_the_flag_ignore_the_gate() {
    let h = harness(async_config());
    let value = h.subscribe_settled(1, RequestDescriptor::query("SELECT 1 AS one", vec![]));
    assert_eq!(value, "tbl:1 [1x1]");
    assert!(!h.graph.is_configured());
}

#[test]
fn config_sentinel_argument_waits_then_reports_an_error() {
    let h = harness(async_config());
    let sentinel = Status::awaiting_config().to_string();

    let initial = h.graph.subscribe(
        1,
        RequestDescriptor::query("SELECT * FROM ?", vec![Arg::Ref(sentinel)]),
    );
    assert_eq!(initial, Status::awaiting_config().to_string());
    assert_eq!(h.graph.topic_state(1), Some(TopicState::AwaitingConfig));

    h.graph.mark_configured();
    let pushed = h.host.wait_for_push(1).expect("pushed status");
    assert!(pushed.starts_with("#ERROR!"), "{pushed}");
    assert_eq!(
        h.graph.topic_state(1),
        Some(TopicState::Completed(Completion::Err))
    );
}

#[test]
fn unsubscribing_while_awaiting_config_never_pushes() {
    let h = harness(async_config());
    h.graph.subscribe(
        1,
        RequestDescriptor::query("SELECT x FROM src", vec![]).with_wait_for_config(true),
    );
    assert!(eventually(|| h.graph.topic_state(1) == Some(TopicState::AwaitingConfig)));

    h.graph.unsubscribe(1);
    assert_eq!(h.graph.topic_state(1), None);

    h.graph.mark_configured();
    std::thread::sleep(Duration::from_millis(50));
    assert!(h.host.pushes_for(1).is_empty());
    assert_eq!(h.probe.count_containing("SELECT x FROM src"), 0);
}

#[test]
fn config_wait_is_followed_by_the_pause_gate() {
    let h = harness(async_config());
    h.graph.set_paused(true);
    h.graph.subscribe(
        1,
        RequestDescriptor::query("SELECT y FROM src", vec![]).with_wait_for_config(true),
    );
    assert!(eventually(|| h.graph.topic_state(1) == Some(TopicState::AwaitingConfig)));

    h.graph.mark_configured();
    assert!(eventually(|| h.graph.topic_state(1) == Some(TopicState::AwaitingUnpause)));
    assert_eq!(h.probe.count_containing("SELECT y FROM src"), 0);

    h.graph.set_paused(false);
    assert_eq!(h.host.wait_for_push(1).as_deref(), Some("tbl:1 [3x1]"));
}
