/*!
 * One-shot batch rendezvous buffer
 *
 * Producers append file paths while the box is open; a single consumer
 * closes it, performs the batched transfer, and broadcasts the outcome to
 * every producer blocked in `wait`. The lifecycle is strictly
 * open -> closed -> completed.
 */

use std::path::PathBuf;
use std::sync::{Condvar, Mutex};

/// Appending to a box whose batch has already been claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxClosed;

#[derive(Debug)]
struct State {
    entries: Vec<PathBuf>,
    open: bool,
    done: bool,
    result: bool,
}

/// A mailbox-with-barrier: many producers, one consumer, one broadcast
/// result.
#[derive(Debug)]
pub struct PostBox {
    state: Mutex<State>,
    lever: Condvar,
}

impl PostBox {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                entries: Vec::new(),
                open: true,
                done: false,
                result: false,
            }),
            lever: Condvar::new(),
        }
    }

    /// Append a path. Fails once the box has been closed.
    pub fn append(&self, e: PathBuf) -> Result<(), BoxClosed> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(BoxClosed);
        }
        state.entries.push(e);
        Ok(())
    }

    /// Stop accepting appends.
    pub fn close(&self) {
        self.state.lock().unwrap().open = false;
    }

    /// Publish the batch outcome and wake every waiter.
    pub fn wakeup(&self, result: bool) {
        let mut state = self.state.lock().unwrap();
        state.result = result;
        state.done = true;
        self.lever.notify_all();
    }

    /// Block until the outcome is published, then return it.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        while !state.done {
            state = self.lever.wait(state).unwrap();
        }
        state.result
    }

    /// Snapshot of the accumulated batch.
    pub fn entries(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().entries.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }
}

impl Default for PostBox {
    fn default() -> Self {
        Self::new()
    }
}
