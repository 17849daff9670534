//! Thread index: files nodes into per-topic threads and archives idle ones.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::shard::OwnerShard;
use super::types::{MemoryThread, NodeId, ThreadId};

impl OwnerShard {
    /// File a node into the active thread for its primary topic, creating the
    /// thread if needed. A node that already has a thread is left alone.
    pub(crate) fn file_node(&mut self, id: NodeId, now: DateTime<Utc>) -> Option<ThreadId> {
        let node = self.nodes.get(&id)?;
        if let Some(existing) = node.thread_id {
            return Some(existing);
        }
        let topic = node.primary_topic().to_string();
        let weight = node.emotional_weight;

        let active = self
            .topic_index
            .get(&topic)
            .copied()
            .filter(|tid| self.threads.contains_key(tid));

        let thread_id = match active {
            Some(tid) => tid,
            None => {
                let thread = MemoryThread::new(self.owner_id.clone(), topic.clone(), now);
                let tid = thread.id;
                debug!(owner = %self.owner_id, topic = %topic, thread = %tid, "created thread");
                self.threads.insert(tid, thread);
                self.topic_index.insert(topic, tid);
                tid
            }
        };

        if let Some(thread) = self.threads.get_mut(&thread_id) {
            thread.append(id, weight, now);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.thread_id = Some(thread_id);
        }
        Some(thread_id)
    }

    /// Move threads idle for at least `idle_days` out of the active index.
    ///
    /// Archived threads keep their members; a later node with the same topic
    /// starts a new active thread.
    pub(crate) fn archive_idle_threads(&mut self, idle_days: i64, now: DateTime<Utc>) -> usize {
        let idle: Vec<ThreadId> = self
            .threads
            .values()
            .filter(|t| t.idle_for(idle_days, now))
            .map(|t| t.id)
            .collect();

        for tid in &idle {
            if let Some(thread) = self.threads.remove(tid) {
                if self.topic_index.get(&thread.topic) == Some(tid) {
                    self.topic_index.remove(&thread.topic);
                }
                debug!(owner = %self.owner_id, topic = %thread.topic, thread = %tid, "archived thread");
                self.archived.insert(*tid, thread);
            }
        }

        idle.len()
    }

    /// Active threads, most recently active first.
    pub(crate) fn active_threads(&self) -> Vec<&MemoryThread> {
        let mut threads: Vec<&MemoryThread> = self.threads.values().collect();
        threads.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        threads
    }
}
