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

//! Host timer facilities driving the scheduler's poll loop and deferred releases.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, SendError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

/// A periodic callback.
pub type Tick = Arc<dyn Fn() + Send + Sync>;

/// A one-shot callback.
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs a periodic poll loop and one-shot deferred tasks.
///
/// Implementations must never invoke the tick from inside `start` or `stop`:
/// callers hold locks across both.
pub trait Timer: Send + Sync {
    /// Starts calling `tick` every `interval`. Ignored if already running.
    fn start(&self, interval: Duration, tick: Tick);

    /// Stops the poll loop. Safe to call when not running.
    fn stop(&self);

    /// Runs `task` once after `delay`.
    fn defer(&self, delay: Duration, task: Task);
}

/// Deferred tasks closer than this are waited out with a spin sleep.
const SPIN_THRESHOLD: Duration = Duration::from_millis(2);

type Deferred = (Instant, Task);

/// A timer backed by OS threads.
///
/// The poll loop gets a thread while it runs. Deferred tasks share one worker
/// thread, started on first use, that runs them in due order.
#[derive(Default)]
pub struct ThreadTimer {
    /// Dropping the sender ends the running loop.
    running: Mutex<Option<Sender<()>>>,
    /// Dropping the sender ends the deferred worker.
    deferred: Mutex<Option<Sender<Deferred>>>,
}

impl ThreadTimer {
    pub fn new() -> ThreadTimer {
        ThreadTimer::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

impl Timer for ThreadTimer {
    fn start(&self, interval: Duration, tick: Tick) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let spawned = thread::Builder::new()
            .name("sampler-poll".to_string())
            .spawn(move || loop {
                // The receive doubles as an interruptible sleep.
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => tick(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        debug!("Poll loop stopped");
                        return;
                    }
                }
            });

        match spawned {
            Ok(_) => *running = Some(stop_tx),
            Err(e) => error!(err = %e, "Unable to start poll thread"),
        }
    }

    fn stop(&self) {
        self.running.lock().take();
    }

    /// Queues the task on the deferred worker. If no worker can run, the task runs
    /// right away.
    fn defer(&self, delay: Duration, task: Task) {
        let due = Instant::now() + delay;
        let rejected = {
            let mut worker = self.deferred.lock();
            if worker.is_none() {
                *worker = spawn_deferred_worker();
            }
            let sent = match worker.as_ref() {
                Some(sender) => sender
                    .send((due, task))
                    .map_err(|SendError((_, task))| task),
                None => Err(task),
            };
            if sent.is_err() {
                *worker = None;
            }
            sent.err()
        };

        if let Some(task) = rejected {
            warn!("No deferred task worker, running task now");
            task();
        }
    }
}

fn spawn_deferred_worker() -> Option<Sender<Deferred>> {
    let (sender, receiver) = unbounded();
    let spawned = thread::Builder::new()
        .name("sampler-deferred".to_string())
        .spawn(move || run_deferred(receiver));

    match spawned {
        Ok(_) => Some(sender),
        Err(e) => {
            error!(err = %e, "Unable to start deferred task thread");
            None
        }
    }
}

/// Runs deferred tasks in due order. Equal due times run in the order they were
/// queued. Once the sender goes away the remaining tasks still run on time.
fn run_deferred(receiver: Receiver<Deferred>) {
    let mut pending: Vec<Deferred> = Vec::new();
    let queue = |pending: &mut Vec<Deferred>, (due, task): Deferred| {
        let index = pending.partition_point(|(at, _)| *at <= due);
        pending.insert(index, (due, task));
    };

    loop {
        while let Ok(deferred) = receiver.try_recv() {
            queue(&mut pending, deferred);
        }

        let next_due = pending.first().map(|(due, _)| *due);
        let received = match next_due {
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(due) => {
                let wait = due.saturating_duration_since(Instant::now());
                if wait <= SPIN_THRESHOLD {
                    spin_sleep::sleep(wait);
                    let (_, task) = pending.remove(0);
                    task();
                    continue;
                }
                receiver.recv_timeout(wait - SPIN_THRESHOLD)
            }
        };

        match received {
            Ok(deferred) => queue(&mut pending, deferred),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!(remaining = pending.len(), "Deferred task worker stopping");
                for (due, task) in pending.drain(..) {
                    spin_sleep::sleep(due.saturating_duration_since(Instant::now()));
                    task();
                }
                return;
            }
        }
    }
}

impl fmt::Debug for ThreadTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadTimer")
            .field("running", &self.is_running())
            .field("deferred_worker", &self.deferred.lock().is_some())
            .finish()
    }
}

#[derive(Default)]
struct ManualState {
    tick: Option<Tick>,
    interval: Option<Duration>,
    now: f64,
    deferred: Vec<(f64, Task)>,
}

/// A timer that only moves when told to. Deferred tasks run against a virtual clock
/// advanced with [`ManualTimer::advance`].
#[derive(Default)]
pub struct ManualTimer {
    state: Mutex<ManualState>,
}

impl ManualTimer {
    pub fn new() -> ManualTimer {
        ManualTimer::default()
    }

    /// Runs one poll tick. Returns false if the loop isn't running.
    pub fn tick(&self) -> bool {
        let tick = self.state.lock().tick.clone();
        match tick {
            Some(tick) => {
                tick();
                true
            }
            None => false,
        }
    }

    /// Moves virtual time forward, running every deferred task that comes due in order.
    pub fn advance(&self, secs: f64) {
        let target = self.state.lock().now + secs.max(0.0);
        loop {
            let task = {
                let mut state = self.state.lock();
                let next = state
                    .deferred
                    .iter()
                    .enumerate()
                    .filter(|(_, (due, _))| *due <= target)
                    .min_by(|(_, (a, _)), (_, (b, _))| a.total_cmp(b))
                    .map(|(index, _)| index);
                match next {
                    Some(index) => {
                        let (due, task) = state.deferred.remove(index);
                        state.now = due.max(state.now);
                        task
                    }
                    None => {
                        state.now = target;
                        return;
                    }
                }
            };
            task();
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().tick.is_some()
    }

    /// The interval of the running loop.
    pub fn interval(&self) -> Option<Duration> {
        self.state.lock().interval
    }

    /// Number of deferred tasks that haven't run yet.
    pub fn pending_deferred(&self) -> usize {
        self.state.lock().deferred.len()
    }
}

impl Timer for ManualTimer {
    fn start(&self, interval: Duration, tick: Tick) {
        let mut state = self.state.lock();
        if state.tick.is_none() {
            state.tick = Some(tick);
            state.interval = Some(interval);
        }
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        state.tick = None;
        state.interval = None;
    }

    fn defer(&self, delay: Duration, task: Task) {
        let mut state = self.state.lock();
        let due = state.now + delay.as_secs_f64();
        state.deferred.push((due, task));
    }
}

impl fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualTimer")
            .field("running", &state.tick.is_some())
            .field("now", &state.now)
            .field("deferred", &state.deferred.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::testutil::eventually;

    fn counter() -> (Arc<AtomicUsize>, Tick) {
        let count = Arc::new(AtomicUsize::new(0));
        let tick: Tick = {
            let count = count.clone();
            Arc::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        (count, tick)
    }

    #[test]
    fn test_thread_timer_ticks_until_stopped() {
        let timer = ThreadTimer::new();
        let (count, tick) = counter();

        timer.start(Duration::from_millis(5), tick);
        assert!(timer.is_running());
        eventually(
            || count.load(Ordering::SeqCst) >= 3,
            "Poll loop never ticked",
        );

        timer.stop();
        assert!(!timer.is_running());
        // Allow an in-flight tick to land, then make sure the loop is gone.
        thread::sleep(Duration::from_millis(30));
        let stopped_at = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
    }

    #[test]
    fn test_thread_timer_defer() {
        let timer = ThreadTimer::new();
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let ran = ran.clone();
            timer.defer(
                Duration::from_millis(5),
                Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        eventually(
            || ran.load(Ordering::SeqCst) == 1,
            "Deferred task never ran",
        );
    }

    #[test]
    fn test_thread_timer_defers_on_one_worker_in_due_order() {
        let timer = ThreadTimer::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let threads = Arc::new(Mutex::new(Vec::new()));

        // Queued latest first, so due order is the reverse of queue order.
        for index in 0..20u64 {
            let order = order.clone();
            let threads = threads.clone();
            timer.defer(
                Duration::from_millis(5 * (20 - index)),
                Box::new(move || {
                    order.lock().push(index);
                    threads.lock().push(thread::current().id());
                }),
            );
        }

        eventually(|| order.lock().len() == 20, "Deferred tasks never all ran");
        let expected: Vec<u64> = (0..20).rev().collect();
        assert_eq!(*order.lock(), expected);

        let threads = threads.lock();
        assert!(threads.iter().all(|id| *id == threads[0]));
        assert_ne!(threads[0], thread::current().id());
    }

    #[test]
    fn test_thread_timer_runs_deferred_tasks_after_drop() {
        let timer = ThreadTimer::new();
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let ran = ran.clone();
            timer.defer(
                Duration::from_millis(20),
                Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        drop(timer);

        eventually(
            || ran.load(Ordering::SeqCst) == 1,
            "Deferred task lost when the timer was dropped",
        );
    }

    #[test]
    fn test_manual_timer_tick() {
        let timer = ManualTimer::new();
        let (count, tick) = counter();

        assert!(!timer.tick());
        timer.start(Duration::from_millis(50), tick);
        assert_eq!(timer.interval(), Some(Duration::from_millis(50)));
        assert!(timer.tick());
        assert!(timer.tick());
        assert_eq!(count.load(Ordering::SeqCst), 2);

        timer.stop();
        assert!(!timer.is_running());
        assert!(!timer.tick());
    }

    #[test]
    fn test_manual_timer_defer_runs_in_due_order() {
        let timer = ManualTimer::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (name, delay) in [("late", 300), ("early", 100)] {
            let order = order.clone();
            timer.defer(
                Duration::from_millis(delay),
                Box::new(move || order.lock().push(name)),
            );
        }

        timer.advance(0.05);
        assert!(order.lock().is_empty());
        assert_eq!(timer.pending_deferred(), 2);

        timer.advance(0.5);
        assert_eq!(*order.lock(), vec!["early", "late"]);
        assert_eq!(timer.pending_deferred(), 0);
    }
}
