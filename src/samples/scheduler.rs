// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Lookahead scheduling of timed events.
//!
//! Events due within the lookahead window are dispatched right away. Everything
//! else waits in a time-ordered queue drained by a poll loop on the host timer.
//! The loop only runs while the queue has something in it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::error::SchedulerError;
use super::timer::{Tick, Timer};
use crate::audio::Clock;
use crate::playsync::CancelHandle;

/// Anything with an optional due time. No due time means now.
pub trait Scheduled {
    fn due(&self) -> Option<f64>;
}

/// Lookahead and poll interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub lookahead: Duration,
    pub interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            lookahead: Duration::from_millis(200),
            interval: Duration::from_millis(50),
        }
    }
}

impl SchedulerConfig {
    /// Checks that `lookahead >= interval > 0`.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.interval.is_zero() || self.lookahead < self.interval {
            return Err(SchedulerError::InvalidTiming {
                lookahead_ms: self.lookahead.as_millis(),
                interval_ms: self.interval.as_millis(),
            });
        }
        Ok(())
    }
}

type Dispatch<E> = Box<dyn FnOnce(E) + Send>;

struct Entry<E> {
    id: u64,
    due: f64,
    event: E,
    dispatch: Dispatch<E>,
}

struct Queue<E> {
    /// Sorted by due time. Equal due times keep insertion order.
    entries: VecDeque<Entry<E>>,
    running: bool,
    next_id: u64,
}

struct Inner<E> {
    config: SchedulerConfig,
    lookahead: f64,
    clock: Arc<dyn Clock>,
    timer: Arc<dyn Timer>,
    queue: Mutex<Queue<E>>,
}

/// Dispatches events now or later, depending on how far off they are.
pub struct Scheduler<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Scheduler<E>
where
    E: Scheduled + Send + 'static,
{
    /// Creates a scheduler. Fails if the timing configuration is invalid.
    pub fn new(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        timer: Arc<dyn Timer>,
    ) -> Result<Scheduler<E>, SchedulerError> {
        config.validate()?;
        Ok(Scheduler {
            inner: Arc::new(Inner {
                config,
                lookahead: config.lookahead.as_secs_f64(),
                clock,
                timer,
                queue: Mutex::new(Queue {
                    entries: VecDeque::new(),
                    running: false,
                    next_id: 0,
                }),
            }),
        })
    }

    /// Schedules `dispatch(event)` for the event's due time.
    ///
    /// Events due within the lookahead window are dispatched before this returns and
    /// get a no-op cancel handle. Otherwise the handle removes this exact entry.
    pub fn schedule<F>(&self, event: E, dispatch: F) -> CancelHandle
    where
        F: FnOnce(E) + Send + 'static,
    {
        let now = self.inner.clock.now();
        let due = event.due().unwrap_or(now);
        if due <= now + self.inner.lookahead {
            dispatch(event);
            return CancelHandle::noop();
        }

        let id = {
            let mut queue = self.inner.queue.lock();
            let id = queue.next_id;
            queue.next_id += 1;

            let index = queue.entries.partition_point(|entry| entry.due <= due);
            queue.entries.insert(
                index,
                Entry {
                    id,
                    due,
                    event,
                    dispatch: Box::new(dispatch),
                },
            );

            if !queue.running {
                queue.running = true;
                self.inner
                    .timer
                    .start(self.inner.config.interval, Inner::tick_fn(&self.inner));
            }
            id
        };
        debug!(id, due, now, "Event queued");

        let inner = Arc::downgrade(&self.inner);
        CancelHandle::new(move |_| {
            if let Some(inner) = inner.upgrade() {
                inner.cancel(id);
            }
        })
    }

    /// Runs one poll of the queue.
    pub fn tick(&self) {
        self.inner.tick();
    }

    /// Clears the queue and halts the poll loop.
    pub fn stop(&self) {
        let mut queue = self.inner.queue.lock();
        let dropped = queue.entries.len();
        queue.entries.clear();
        queue.running = false;
        self.inner.timer.stop();
        debug!(dropped, "Scheduler stopped");
    }

    /// Number of events still waiting.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().entries.len()
    }

    /// Whether the poll loop is running.
    pub fn is_running(&self) -> bool {
        self.inner.queue.lock().running
    }

    pub fn config(&self) -> SchedulerConfig {
        self.inner.config
    }
}

impl<E> Inner<E>
where
    E: Send + 'static,
{
    fn tick_fn(inner: &Arc<Inner<E>>) -> Tick {
        let inner: Weak<Inner<E>> = Arc::downgrade(inner);
        Arc::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.tick();
            }
        })
    }

    fn tick(&self) {
        let now = self.clock.now();
        let dispatch_before = now + self.lookahead;

        let ready: Vec<Entry<E>> = {
            let mut queue = self.queue.lock();
            let count = queue
                .entries
                .partition_point(|entry| entry.due <= dispatch_before);
            let ready = queue.entries.drain(..count).collect();
            if queue.entries.is_empty() && queue.running {
                queue.running = false;
                self.timer.stop();
            }
            ready
        };

        for entry in ready {
            debug!(id = entry.id, due = entry.due, now, "Dispatching queued event");
            (entry.dispatch)(entry.event);
        }
    }

    fn cancel(&self, id: u64) {
        let mut queue = self.queue.lock();
        if let Some(index) = queue.entries.iter().position(|entry| entry.id == id) {
            queue.entries.remove(index);
            debug!(id, "Queued event cancelled");
        }
    }
}

impl<E> Drop for Inner<E> {
    fn drop(&mut self) {
        self.timer.stop();
    }
}

impl<E> fmt::Debug for Scheduler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.inner.queue.lock();
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("pending", &queue.entries.len())
            .field("running", &queue.running)
            .finish()
    }
}
