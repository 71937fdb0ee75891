use super::{Waiter, Wake};

use parking_lot::{Condvar, Mutex};
use tracing::info;

use std::sync::Arc;
use std::time::{Duration, Instant};

/// A `Waiter` woken by Ctrl-C (or SIGTERM). This uses `parking_lot::Mutex`
/// and `parking_lot::Condvar` so the reporting thread consumes no CPU time
/// while waiting for the next interval.
#[derive(Clone, Default)]
pub struct SignalWaiter {
    trigger: Arc<(Mutex<bool>, Condvar)>,
}

impl SignalWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the process-wide signal handler. The first signal lets the
    /// current cycle finish with a final report. A second one exits
    /// immediately with status 2.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let waiter = self.clone();

        ctrlc::set_handler(move || {
            if waiter.trigger() {
                info!("terminating immediately");
                std::process::exit(2);
            }

            info!("finishing the current report before exiting");
        })
    }

    /// Wakes the waiting thread. Returns `true` if termination had already
    /// been requested.
    pub fn trigger(&self) -> bool {
        let (lock, cvar) = &*self.trigger;
        let mut triggered = lock.lock();
        let previous = *triggered;
        *triggered = true;
        cvar.notify_all();
        previous
    }

    pub fn is_triggered(&self) -> bool {
        *self.trigger.0.lock()
    }
}

impl Waiter for SignalWaiter {
    fn wait(&mut self, interval: Option<Duration>) -> Wake {
        let (lock, cvar) = &*self.trigger;
        let mut triggered = lock.lock();

        match interval {
            Some(interval) => {
                let deadline = Instant::now() + interval;
                while !*triggered {
                    if cvar.wait_until(&mut triggered, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while !*triggered {
                    cvar.wait(&mut triggered);
                }
            }
        }

        if *triggered {
            Wake::Terminate
        } else {
            Wake::Interval
        }
    }

    fn terminated(&self) -> bool {
        self.is_triggered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_elapses() {
        let mut waiter = SignalWaiter::new();
        let start = Instant::now();
        assert_eq!(waiter.wait(Some(Duration::from_millis(20))), Wake::Interval);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn trigger_interrupts_interval() {
        let mut waiter = SignalWaiter::new();
        let remote = waiter.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            remote.trigger()
        });

        let start = Instant::now();
        assert_eq!(waiter.wait(Some(Duration::from_secs(30))), Wake::Terminate);
        assert!(start.elapsed() < Duration::from_secs(30));
        assert!(!handle.join().unwrap());
    }

    #[test]
    fn wait_forever_until_triggered() {
        let mut waiter = SignalWaiter::new();
        let remote = waiter.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            remote.trigger();
        });

        assert_eq!(waiter.wait(None), Wake::Terminate);
        handle.join().unwrap();
    }

    #[test]
    fn second_trigger_is_reported() {
        let mut waiter = SignalWaiter::new();
        assert!(!waiter.terminated());
        assert!(!waiter.trigger());
        assert!(waiter.trigger());

        // stays triggered
        assert_eq!(waiter.wait(Some(Duration::from_secs(30))), Wake::Terminate);
        assert_eq!(waiter.wait(None), Wake::Terminate);
    }
}
