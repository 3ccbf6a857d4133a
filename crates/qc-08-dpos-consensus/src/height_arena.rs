//! Per-height task bookkeeping shared by both managers.
//!
//! Every live height owns one task reading a bounded inbox. Heights are
//! legal inside `[cur, cur + window]`; moving the current height aborts the
//! tasks below it.

use crate::domain::{ConsensusError, ConsensusResult};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct HeightTask<I> {
    inbox: mpsc::Sender<I>,
    handle: JoinHandle<()>,
}

pub struct HeightArena<I> {
    name: &'static str,
    cur_number: u64,
    window: u64,
    capacity: usize,
    tasks: BTreeMap<u64, HeightTask<I>>,
}

impl<I: Send + 'static> HeightArena<I> {
    pub fn new(name: &'static str, window: u64, capacity: usize) -> Self {
        Self {
            name,
            cur_number: 0,
            window,
            capacity,
            tasks: BTreeMap::new(),
        }
    }

    pub fn cur_number(&self) -> u64 {
        self.cur_number
    }

    pub fn is_legal(&self, number: u64) -> bool {
        number >= self.cur_number && number <= self.cur_number.saturating_add(self.window)
    }

    pub fn contains(&self, number: u64) -> bool {
        self.tasks.contains_key(&number)
    }

    pub fn live_numbers(&self) -> Vec<u64> {
        self.tasks.keys().copied().collect()
    }

    /// Moves the current height forward and closes everything below it.
    /// Lower heights are ignored.
    pub fn set_cur_number(&mut self, number: u64) {
        if number < self.cur_number {
            return;
        }
        self.cur_number = number;
        let keep = self.tasks.split_off(&number);
        for (old, task) in std::mem::replace(&mut self.tasks, keep) {
            debug!(manager = self.name, number = old, "Closing height");
            task.handle.abort();
        }
    }

    /// Delivers `input` to the task of `number`, starting the task with
    /// `spawn` on first use.
    pub fn dispatch<F>(&mut self, number: u64, input: I, spawn: F) -> ConsensusResult<()>
    where
        F: FnOnce(mpsc::Sender<I>, mpsc::Receiver<I>) -> JoinHandle<()>,
    {
        if !self.is_legal(number) {
            return Err(ConsensusError::IllegalNumber {
                number,
                current: self.cur_number,
            });
        }

        if self
            .tasks
            .get(&number)
            .is_some_and(|task| task.handle.is_finished())
        {
            self.tasks.remove(&number);
        }
        let task = self.tasks.entry(number).or_insert_with(|| {
            info!(manager = self.name, number, "Starting height");
            let (tx, rx) = mpsc::channel(self.capacity);
            let handle = spawn(tx.clone(), rx);
            HeightTask { inbox: tx, handle }
        });

        task.inbox.try_send(input).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ConsensusError::InboxFull(number),
            mpsc::error::TrySendError::Closed(_) => ConsensusError::InboxClosed(number),
        })
    }
}

impl<I> Drop for HeightArena<I> {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.handle.abort();
        }
    }
}
