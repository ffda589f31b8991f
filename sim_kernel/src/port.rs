//! In-process ports
//!
//! A [`SimPort`] is a bounded queue of envelopes guarded by a mutex, plus the
//! table of receives that still owe a reply. Every envelope carries its own
//! reply channel, so a reply always reaches the sender that is waiting for it.

use crate::message_queue::MessageQueue;
use core_types::PortId;
use ipc::{Message, Reply, ResponseToken};
use kernel_api::{Duration, KernelError, MessagePort};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

struct Envelope {
    message: Message,
    reply_to: Sender<Reply>,
}

struct PortState {
    queue: MessageQueue<Envelope>,
    outstanding: HashMap<u64, Sender<Reply>>,
    next_token: u64,
    closed: bool,
}

/// A port of the simulated kernel
pub struct SimPort {
    id: PortId,
    state: Mutex<PortState>,
    arrived: Condvar,
    space: Condvar,
}

impl SimPort {
    pub(crate) fn new(id: PortId, capacity: usize) -> Self {
        Self {
            id,
            state: Mutex::new(PortState {
                queue: MessageQueue::with_capacity(capacity),
                outstanding: HashMap::new(),
                next_token: 1,
                closed: false,
            }),
            arrived: Condvar::new(),
            space: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PortState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a message, blocking while the queue is full
    pub(crate) fn deliver(&self, message: Message) -> Result<PendingReply, KernelError> {
        let (reply_to, rx) = mpsc::channel();
        let mut state = self.lock();
        while !state.closed && state.queue.is_full() {
            state = self
                .space
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.closed {
            return Err(KernelError::PortClosed);
        }
        state
            .queue
            .push(Envelope { message, reply_to })
            .map_err(|_| KernelError::SendFailed(format!("queue of {} full", self.id)))?;
        self.arrived.notify_one();
        Ok(PendingReply { rx })
    }

    /// Messages queued but not yet received
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Receives that have not been responded to
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl MessagePort for SimPort {
    fn port_id(&self) -> PortId {
        self.id
    }

    fn receive(&self) -> Result<(Message, ResponseToken), KernelError> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(KernelError::PortClosed);
            }
            if let Some(envelope) = state.queue.pop() {
                let token = state.next_token;
                state.next_token += 1;
                state.outstanding.insert(token, envelope.reply_to);
                self.space.notify_one();
                return Ok((envelope.message, ResponseToken::from_raw(token)));
            }
            state = self
                .arrived
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn respond(&self, token: ResponseToken, reply: Reply) -> Result<(), KernelError> {
        let reply_to = self
            .lock()
            .outstanding
            .remove(&token.as_raw())
            .ok_or(KernelError::InvalidToken(token.as_raw()))?;
        // The sender may have given up waiting; that is not the server's error.
        let _ = reply_to.send(reply);
        Ok(())
    }

    fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        // Dropping the reply channels tells every waiting sender the port is gone.
        state.queue.drain().for_each(drop);
        state.outstanding.clear();
        drop(state);
        self.arrived.notify_all();
        self.space.notify_all();
    }
}

/// Reply of a message sent without waiting
pub struct PendingReply {
    rx: Receiver<Reply>,
}

impl PendingReply {
    /// Blocks until the reply arrives
    pub fn wait(self) -> Result<Reply, KernelError> {
        self.rx.recv().map_err(|_| KernelError::PortClosed)
    }

    /// Blocks at most `timeout` for the reply
    ///
    /// A timeout leaves the reply pending; it can be waited for again.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Reply, KernelError> {
        match self.rx.recv_timeout(timeout.into()) {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => Err(KernelError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(KernelError::PortClosed),
        }
    }

    /// Returns the reply if it already arrived
    pub fn try_wait(&self) -> Option<Result<Reply, KernelError>> {
        match self.rx.try_recv() {
            Ok(reply) => Some(Ok(reply)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(KernelError::PortClosed)),
        }
    }
}
