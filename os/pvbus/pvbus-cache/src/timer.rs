//! Hosted periodic trimming.
//!
//! In a kernel the owner arms a periodic timer whose callback calls
//! [`Cache::trim`]. Hosted builds use a background thread holding only a
//! weak reference to the cache.

use crate::cache::Cache;
use crate::config::CacheConfig;
use crate::ops::{BackingAllocator, CacheOps};
use log::{debug, trace};
use pvbus_sync::ExecutionUnits;
use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Something that can be trimmed periodically.
pub trait Trim: Send + Sync {
    /// Run one trim pass, returning the number of objects released.
    fn trim(&self) -> usize;
}

impl<O, U, B> Trim for Cache<O, U, B>
where
    O: CacheOps + Send,
    U: ExecutionUnits + Send,
    B: BackingAllocator + Send,
{
    fn trim(&self) -> usize {
        Self::trim(self)
    }
}

#[derive(Default)]
struct Shutdown {
    requested: Mutex<bool>,
    wake: Condvar,
}

/// A thread calling [`Trim::trim`] every period until cancelled, dropped, or
/// the target is gone.
#[must_use = "dropping the timer stops it"]
pub struct TrimTimer {
    shutdown: Arc<Shutdown>,
    thread: Option<JoinHandle<()>>,
}

impl TrimTimer {
    /// Trim `target` every [`CacheConfig::TRIM_PERIOD`].
    ///
    /// # Errors
    /// If the timer thread cannot be spawned.
    pub fn start<T: Trim + 'static>(target: &Arc<T>) -> io::Result<Self> {
        Self::with_period(target, CacheConfig::TRIM_PERIOD)
    }

    /// # Errors
    /// If the timer thread cannot be spawned.
    pub fn with_period<T: Trim + 'static>(target: &Arc<T>, period: Duration) -> io::Result<Self> {
        let shutdown = Arc::new(Shutdown::default());
        let weak = Arc::downgrade(target);

        let thread = thread::Builder::new()
            .name("pvbus-trim".into())
            .spawn({
                let shutdown = Arc::clone(&shutdown);
                move || run(&weak, &shutdown, period)
            })?;

        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    /// Stop the timer and wait for an in-flight trim to finish.
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        *self
            .shutdown
            .requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = true;
        self.shutdown.wake.notify_all();

        if thread.join().is_err() {
            debug!("trim timer thread panicked");
        }
    }
}

impl Drop for TrimTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<T: Trim>(target: &Weak<T>, shutdown: &Shutdown, period: Duration) {
    loop {
        let requested = shutdown
            .requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (requested, _) = shutdown
            .wake
            .wait_timeout_while(requested, period, |requested| !*requested)
            .unwrap_or_else(PoisonError::into_inner);
        if *requested {
            return;
        }
        drop(requested);

        let Some(target) = target.upgrade() else {
            trace!("trim target dropped; stopping timer");
            return;
        };
        target.trim();
    }
}
