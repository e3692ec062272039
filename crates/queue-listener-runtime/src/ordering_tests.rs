//! Tests for per-group sequencing.

use super::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn group(id: &str) -> MessageGroupId {
    MessageGroupId::new(id.to_string()).unwrap()
}

#[tokio::test]
async fn test_first_turn_does_not_wait() {
    let mut sequencer = GroupSequencer::new();
    let mut turn = sequencer.next_turn(&group("a"));

    tokio::time::timeout(Duration::from_millis(100), turn.wait())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_turns_of_one_group_run_in_order() {
    let mut sequencer = GroupSequencer::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..5u64 {
        let mut turn = sequencer.next_turn(&group("a"));
        let order = Arc::clone(&order);
        handles.push(tokio::spawn(async move {
            turn.wait().await;
            // Earlier turns sleep longer, so any overlap would reorder
            tokio::time::sleep(Duration::from_millis(50 - i * 10)).await;
            order.lock().unwrap().push(i);
            turn.finish();
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_groups_are_independent() {
    let mut sequencer = GroupSequencer::new();
    let _blocking = sequencer.next_turn(&group("a"));
    let mut other = sequencer.next_turn(&group("b"));

    tokio::time::timeout(Duration::from_millis(100), other.wait())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_dropped_turn_releases_the_next() {
    let mut sequencer = GroupSequencer::new();
    let first = sequencer.next_turn(&group("a"));
    let mut second = sequencer.next_turn(&group("a"));

    drop(first);

    tokio::time::timeout(Duration::from_millis(100), second.wait())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_finished_groups_are_pruned() {
    let mut sequencer = GroupSequencer::new();
    let first = sequencer.next_turn(&group("a"));
    let _second = sequencer.next_turn(&group("b"));
    assert_eq!(sequencer.active_groups(), 2);

    first.finish();
    assert_eq!(sequencer.active_groups(), 1);
}
