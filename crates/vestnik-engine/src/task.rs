//! Task spawn and error propagation
//!
//! A go-flagged call runs its callee to completion on an independent OS
//! thread. Tasks share only the compound-value heap and the builtins
//! registry; frames, handler stacks and loop stacks are per-task. A failed
//! task delivers its error to the engine-wide error channel and never takes
//! sibling tasks down with it.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use vestnik_core::{Func, Value, VmError};

/// Owner of spawned tasks and the engine-wide error channel.
pub struct TaskHub {
    err_tx: Sender<VmError>,
    err_rx: Receiver<VmError>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskHub {
    /// Create a hub with an empty task set.
    pub fn new() -> Self {
        let (err_tx, err_rx) = unbounded();
        TaskHub {
            err_tx,
            err_rx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Run `func(args)` on a new task, discarding its return values.
    pub fn spawn(&self, func: Arc<Func>, args: Vec<Value>) {
        let err_tx = self.err_tx.clone();
        let handle = std::thread::spawn(move || {
            let mut rets = Vec::new();
            if let Err(e) = (func.call)(&args, &mut rets) {
                if err_tx.send(e.clone()).is_err() {
                    eprintln!("задача завершилась с ошибкой: {}", e);
                }
            }
        });
        self.handles.lock().push(handle);
    }

    /// Receiver of errors from failed tasks.
    pub fn errors(&self) -> &Receiver<VmError> {
        &self.err_rx
    }

    /// Join every task spawned so far.
    pub fn wait(&self) {
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Default for TaskHub {
    fn default() -> Self {
        Self::new()
    }
}
