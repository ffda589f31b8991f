//! Deadlines of parked requests
//!
//! One thread sleeps until the earliest deadline, then hands every expired
//! entry back to the resource the request is parked on. A request that was
//! answered in the meantime is simply no longer found there.

use crate::context::ServerContext;
use crate::request::RequestId;
use crate::resource::Resource;
use core_types::ResourceId;
use kernel_api::Instant;
use services_logger::LogEntry;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// When a parked request gives up waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    pub at: Instant,
    pub resource: ResourceId,
    pub request: RequestId,
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Reverse<Deadline>>,
    stopped: bool,
}

/// Min-heap of deadlines plus the condition the timer thread sleeps on
#[derive(Default)]
pub struct Timer {
    state: Mutex<TimerState>,
    wake: Condvar,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn schedule(&self, deadline: Deadline) {
        self.lock().heap.push(Reverse(deadline));
        self.wake.notify_one();
    }

    /// Removes and returns every deadline at or before `now`, earliest first
    pub fn take_expired(&self, now: Instant) -> Vec<Deadline> {
        Self::drain_expired(&mut self.lock(), now)
    }

    fn drain_expired(state: &mut TimerState, now: Instant) -> Vec<Deadline> {
        let mut expired = Vec::new();
        while let Some(Reverse(next)) = state.heap.peek() {
            if next.at > now {
                break;
            }
            if let Some(Reverse(deadline)) = state.heap.pop() {
                expired.push(deadline);
            }
        }
        expired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.lock().heap.peek().map(|Reverse(next)| next.at)
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes the timer thread exit
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.wake.notify_all();
    }
}

/// Body of the timer thread
pub(crate) fn run(cx: Arc<ServerContext>) {
    let timer = cx.timer();
    loop {
        let expired = {
            let mut state = timer.lock();
            loop {
                if state.stopped {
                    return;
                }
                let now = cx.kernel().now();
                let expired = Timer::drain_expired(&mut state, now);
                if !expired.is_empty() {
                    break expired;
                }
                let next_at = state.heap.peek().map(|Reverse(next)| next.at);
                state = match next_at {
                    Some(at) => {
                        let wait = at.duration_since(now);
                        timer
                            .wake
                            .wait_timeout(state, wait.into())
                            .unwrap_or_else(PoisonError::into_inner)
                            .0
                    }
                    None => timer
                        .wake
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner),
                };
            }
        };

        for deadline in expired {
            fire(&cx, deadline);
        }
    }
}

/// Times out the request behind an expired deadline, if it is still parked
pub(crate) fn fire(cx: &ServerContext, deadline: Deadline) {
    let Ok(this) = cx.registry().acquire(deadline.resource) else {
        return;
    };
    match this.resource() {
        Resource::EventQueue(queue) => queue.expire(cx, deadline.request),
        other => cx.log().log(
            LogEntry::warn("deadline on resource without timeouts")
                .with_field("resource", deadline.resource)
                .with_field("kind", other.kind_name()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deadline(nanos: u64, request: u64) -> Deadline {
        Deadline {
            at: Instant::from_nanos(nanos),
            resource: ResourceId::new(1, 0),
            request: RequestId::new(request),
        }
    }

    #[test]
    fn test_expired_in_deadline_order() {
        let timer = Timer::new();
        timer.schedule(deadline(300, 1));
        timer.schedule(deadline(100, 2));
        timer.schedule(deadline(200, 3));

        assert_eq!(timer.next_deadline(), Some(Instant::from_nanos(100)));

        let expired = timer.take_expired(Instant::from_nanos(250));
        let requests: Vec<u64> = expired.iter().map(|d| d.request.as_raw()).collect();
        assert_eq!(requests, vec![2, 3]);
        assert_eq!(timer.len(), 1);
    }

    #[test]
    fn test_nothing_expires_early() {
        let timer = Timer::new();
        timer.schedule(deadline(500, 1));
        assert!(timer.take_expired(Instant::from_nanos(499)).is_empty());
        assert!(!timer.is_empty());
    }
}
