//! Memory-aware ordering of ready tasks.
//!
//! Tasks that mostly reuse buffers already resident in the cache dispatch
//! first, maximizing reuse of the working set before it is evicted. With
//! prioritization disabled the queue degenerates to FCFS.

use std::collections::VecDeque;
use std::sync::Arc;

use block_cache::{Cache, Key, KeySet};

use crate::task::Task;

pub(crate) struct TaskInfo {
    pub task: Arc<Task>,
    /// Unique set of every key the task touches.
    pub keys: KeySet,
    /// Bytes the task needs beyond what is resident (as of the last
    /// update).
    pub mem_required: u64,
}

pub(crate) struct Prioritizer {
    /// Keys known resident as of the last [`Prioritizer::update`].
    resident: KeySet,
    queue: VecDeque<TaskInfo>,
    enabled: bool,
}

impl Prioritizer {
    pub fn new(enabled: bool) -> Self {
        Self {
            resident: KeySet::default(),
            queue: VecDeque::new(),
            enabled,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Append tasks without reordering. Ordering refreshes on the next
    /// [`Prioritizer::update`].
    pub fn insert(&mut self, tasks: Vec<Arc<Task>>) {
        for task in tasks {
            let keys: KeySet = task
                .read_keys()
                .into_iter()
                .chain(task.write_keys())
                .collect();
            let mem_required = if self.enabled {
                Self::missing_bytes(&self.resident, &keys)
            } else {
                0
            };
            self.queue.push_back(TaskInfo {
                task,
                keys,
                mem_required,
            });
        }
    }

    /// Re-derive residency from the cache, recompute each task's extra
    /// footprint, and sort ascending so the cheapest task dispatches
    /// first. No-op when prioritization is disabled.
    pub fn update(&mut self, cache: &Cache) {
        if !self.enabled {
            return;
        }
        self.resident.clear();
        for info in &self.queue {
            self.resident.extend(info.keys.iter().cloned());
        }
        cache.retain_if_cached(&mut self.resident);

        for info in &mut self.queue {
            info.mem_required = Self::missing_bytes(&self.resident, &info.keys);
        }
        self.queue
            .make_contiguous()
            .sort_by_key(|info| info.mem_required);
    }

    /// Pop the highest-priority task.
    pub fn pop(&mut self) -> Option<TaskInfo> {
        self.queue.pop_front()
    }

    /// Return a task whose allocation was deferred; it keeps its place at
    /// the head.
    pub fn push_front(&mut self, info: TaskInfo) {
        self.queue.push_front(info);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn missing_bytes(resident: &KeySet, keys: &KeySet) -> u64 {
        keys.iter()
            .filter(|k| !resident.contains(k))
            .map(Key::buf_len)
            .sum()
    }
}
