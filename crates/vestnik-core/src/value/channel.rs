//! Blocking FIFO channels
//!
//! Capacity is fixed at creation; 0 means synchronous rendezvous, where a
//! send completes only once a receiver has taken the value. Channels carry
//! their own mutual exclusion and may be used from any number of tasks.

use super::func::{func_must_params, Func};
use super::Value;
use crate::{VmError, VmResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

struct ChanState {
    queue: VecDeque<Value>,
    closed: bool,
    /// Receivers currently blocked in `recv`
    recv_waiting: usize,
    /// Values pushed / popped over the channel lifetime; the difference
    /// tells a rendezvous sender whether its value has been taken yet
    pushed: u64,
    popped: u64,
}

/// Bounded FIFO of values with blocking send/receive.
pub struct Channel {
    capacity: usize,
    state: Mutex<ChanState>,
    send_cv: Condvar,
    recv_cv: Condvar,
}

impl Channel {
    /// Create a channel with the given buffer capacity (0 = rendezvous).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(ChanState {
                queue: VecDeque::new(),
                closed: false,
                recv_waiting: 0,
                pushed: 0,
                popped: 0,
            }),
            send_cv: Condvar::new(),
            recv_cv: Condvar::new(),
        }
    }

    /// Buffer capacity fixed at creation.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered values.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether the buffer is currently empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// Whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Blocking send. Fails with `ChannelClosed` if the channel is or
    /// becomes closed while waiting.
    pub fn send(&self, value: Value) -> VmResult<()> {
        let mut st = self.state.lock();
        loop {
            if st.closed {
                return Err(VmError::ChannelClosed);
            }
            if self.capacity > 0 {
                if st.queue.len() < self.capacity {
                    st.queue.push_back(value);
                    st.pushed += 1;
                    self.recv_cv.notify_one();
                    return Ok(());
                }
            } else if st.recv_waiting > st.queue.len() {
                // a receiver is ready; hand the value over and wait until it
                // is actually taken
                st.queue.push_back(value);
                st.pushed += 1;
                let my_seq = st.pushed;
                self.recv_cv.notify_one();
                while st.popped < my_seq && !st.closed {
                    self.send_cv.wait(&mut st);
                }
                if st.popped < my_seq {
                    return Err(VmError::ChannelClosed);
                }
                return Ok(());
            }
            self.send_cv.wait(&mut st);
        }
    }

    /// Blocking receive. Fails with `ChannelClosed` once the channel is
    /// closed and drained.
    pub fn recv(&self) -> VmResult<Value> {
        self.recv_inner()?.ok_or(VmError::ChannelClosed)
    }

    /// Blocking receive for iteration: `None` once closed and drained.
    pub fn recv_opt(&self) -> VmResult<Option<Value>> {
        self.recv_inner()
    }

    fn recv_inner(&self) -> VmResult<Option<Value>> {
        let mut st = self.state.lock();
        loop {
            if let Some(v) = st.queue.pop_front() {
                st.popped += 1;
                // room appeared (or a rendezvous completed): wake senders
                self.send_cv.notify_all();
                return Ok(Some(v));
            }
            if st.closed {
                return Ok(None);
            }
            st.recv_waiting += 1;
            // let rendezvous senders see the waiting receiver
            self.send_cv.notify_all();
            self.recv_cv.wait(&mut st);
            st.recv_waiting -= 1;
        }
    }

    /// Close the channel. Buffered values stay receivable; blocked senders
    /// fail with `ChannelClosed`.
    pub fn close(&self) {
        let mut st = self.state.lock();
        st.closed = true;
        self.send_cv.notify_all();
        self.recv_cv.notify_all();
    }

    /// Method table consulted by late-bound member lookup.
    pub fn method_member(chan: &Arc<Channel>, lower: &str) -> Option<Func> {
        let chan = chan.clone();
        Some(match lower {
            "закрыть" | "close" => func_must_params("Закрыть", 0, move |_, _| {
                chan.close();
                Ok(())
            }),
            "размер" | "len" => func_must_params("Размер", 0, move |_, rets| {
                rets.push(Value::Int(chan.len() as i64));
                Ok(())
            }),
            _ => return None,
        })
    }
}
