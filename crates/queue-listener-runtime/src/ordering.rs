//! Per-group sequencing for FIFO listeners.
//!
//! Messages of one message group must be handled strictly one after the
//! other, including across polls. The poll loop asks the [`GroupSequencer`]
//! for a [`GroupTurn`] before handing a group's messages to a task; the task
//! waits for the previous turn of the same group to finish before it starts.
//!
//! Different groups never wait on each other.
//!
//! # Example
//!
//! ```rust
//! use queue_listener_runtime::ordering::GroupSequencer;
//! use queue_listener_runtime::message::MessageGroupId;
//!
//! # tokio_test::block_on(async {
//! let mut sequencer = GroupSequencer::new();
//! let group = MessageGroupId::new("sensor-7".to_string()).unwrap();
//!
//! let mut first = sequencer.next_turn(&group);
//! let mut second = sequencer.next_turn(&group);
//!
//! first.wait().await; // nothing before it
//! first.finish();
//! second.wait().await; // released by `first`
//! # });
//! ```

use crate::message::MessageGroupId;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Hands out ordered turns per message group
#[derive(Debug, Default)]
pub struct GroupSequencer {
    tails: HashMap<MessageGroupId, oneshot::Receiver<()>>,
}

impl GroupSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next turn for `group`, behind every turn handed out before
    pub fn next_turn(&mut self, group: &MessageGroupId) -> GroupTurn {
        self.prune();

        let (done, tail) = oneshot::channel();
        let previous = self.tails.insert(group.clone(), tail);

        GroupTurn { previous, done }
    }

    /// Number of groups with a turn still outstanding
    pub fn active_groups(&mut self) -> usize {
        self.prune();
        self.tails.len()
    }

    /// Forget groups whose last turn has finished
    fn prune(&mut self) {
        self.tails.retain(|_, tail| {
            matches!(tail.try_recv(), Err(oneshot::error::TryRecvError::Empty))
        });
    }
}

/// One position in a group's sequence.
///
/// Finishing or dropping the turn releases the next one, so a panicking or
/// cancelled task never blocks its group.
#[derive(Debug)]
pub struct GroupTurn {
    previous: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

impl GroupTurn {
    /// Wait until the previous turn of the group is over
    pub async fn wait(&mut self) {
        if let Some(previous) = self.previous.take() {
            // Err means the previous turn was dropped, which also ends it
            let _ = previous.await;
        }
    }

    pub fn finish(self) {
        let _ = self.done.send(());
    }
}

#[cfg(test)]
#[path = "ordering_tests.rs"]
mod tests;
