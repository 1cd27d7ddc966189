use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug, Default)]
struct GroupQueue {
    members: usize,
    queue: VecDeque<Bytes>,
}

type GroupQueues = HashMap<String, GroupQueue>;

#[derive(Debug, Default)]
struct BrokerState {
    topics: Mutex<HashMap<String, GroupQueues>>,
    published: Notify,
}

/// An in-process broker shared by every transport created from it.
///
/// Each topic keeps one queue per subscribed consumer group. Publishing
/// appends to every group's queue, so distinct groups each see every message
/// while members of one group compete for the shared queue.
#[derive(Clone, Debug, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes raw bytes to a topic. Topics with no subscribed group drop
    /// the message.
    pub fn publish_raw(&self, topic: &str, payload: Bytes) {
        let mut topics = self.state.topics.lock();
        if let Some(groups) = topics.get_mut(topic) {
            for (group, queue) in groups.iter_mut() {
                trace!(topic, group = %group, "enqueue");
                queue.queue.push_back(payload.clone());
            }
        }
        drop(topics);

        self.state.published.notify_waiters();
    }

    /// Number of messages waiting for a group on a topic.
    #[must_use]
    pub fn backlog(&self, topic: &str, group: &str) -> usize {
        self.state
            .topics
            .lock()
            .get(topic)
            .and_then(|groups| groups.get(group))
            .map_or(0, |group| group.queue.len())
    }

    pub(crate) fn join(&self, topic: &str, group: &str) {
        self.state
            .topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .entry(group.to_string())
            .or_default()
            .members += 1;
    }

    /// Removes one member of `group` from `topic`. The group's queue is
    /// dropped with its last member.
    pub(crate) fn leave(&self, topic: &str, group: &str) {
        let mut topics = self.state.topics.lock();
        let Some(groups) = topics.get_mut(topic) else {
            return;
        };

        if let Some(queue) = groups.get_mut(group) {
            queue.members = queue.members.saturating_sub(1);
            if queue.members == 0 {
                groups.remove(group);
                trace!(topic, group, "group left");
            }
        }

        if groups.is_empty() {
            topics.remove(topic);
        }
    }

    /// Pops up to `max` messages for `group` across `topics`, oldest topic
    /// queue first.
    pub(crate) fn take(&self, group: &str, topics: &[String], max: usize) -> Vec<(String, Bytes)> {
        let mut batch = Vec::new();
        let mut state = self.state.topics.lock();

        for topic in topics {
            let Some(GroupQueue { queue, .. }) =
                state.get_mut(topic).and_then(|groups| groups.get_mut(group))
            else {
                continue;
            };

            while batch.len() < max {
                match queue.pop_front() {
                    Some(payload) => batch.push((topic.clone(), payload)),
                    None => break,
                }
            }

            if batch.len() >= max {
                break;
            }
        }

        batch
    }

    pub(crate) fn published(&self) -> &Notify {
        &self.state.published
    }
}
