use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;

use super::TaskId;

/// Receiving half of the session event channel that hands out the events of
/// each task in the order they were stamped.
pub struct OrderedEvents<T> {
    // task -> sequence -> item
    buffer: HashMap<TaskId, BTreeMap<u64, T>>,
    // task -> next sequence
    next_seq: HashMap<TaskId, u64>,
    // task, sequence, item
    rx: mpsc::UnboundedReceiver<(TaskId, u64, T)>,
}

impl<T> OrderedEvents<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<(TaskId, u64, T)>) -> Self {
        Self {
            buffer: HashMap::new(),
            next_seq: HashMap::new(),
            rx,
        }
    }

    pub async fn next(&mut self) -> Option<(TaskId, u64, T)> {
        loop {
            if let Some(item) = self.pop_buffered() {
                return Some(item);
            }

            match self.rx.recv().await {
                Some((task, seq, item)) => {
                    let next_seq = self.next_seq.entry(task).or_insert(0);

                    if seq == *next_seq {
                        *next_seq += 1;
                        return Some((task, seq, item));
                    } else if seq > *next_seq {
                        self.buffer.entry(task).or_default().insert(seq, item);
                    } else {
                        tracing::warn!("Dropping replayed event #{seq} of task {task}.");
                    }
                }
                None => return None,
            }
        }
    }

    fn pop_buffered(&mut self) -> Option<(TaskId, u64, T)> {
        for (task, next_seq) in self.next_seq.iter_mut() {
            let Some(task_buffer) = self.buffer.get_mut(task) else {
                continue;
            };
            if let Some(item) = task_buffer.remove(next_seq) {
                let seq = *next_seq;
                *next_seq += 1;
                let task = *task;
                if task_buffer.is_empty() {
                    self.buffer.remove(&task);
                }
                return Some((task, seq, item));
            }
        }
        None
    }

    /// Forget the bookkeeping of a task that has delivered its last event.
    pub fn retire(&mut self, task: TaskId) {
        self.next_seq.remove(&task);
        self.buffer.remove(&task);
    }
}
