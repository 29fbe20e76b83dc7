//! Background maintenance thread
//!
//! Sweeps the cache on an interval that shortens under pool pressure. Other
//! parts of the system can wake it and wait for a full pass, e.g. when an
//! interface goes away.

use crate::cache::FlowCache;
use crate::error::{FlowTableError, FlowTableResult};
use crate::resolver::RouteResolver;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;

/// Reaper thread name
pub const REAPER_THREAD_NAME: &str = "flowtable-reaper";

#[derive(Debug, Default)]
struct ReaperState {
    running: bool,
    /// Set by `request_sweep`, consumed when a pass starts
    wake: bool,
    sweeping: bool,
    /// Completed passes
    passes: u64,
}

#[derive(Debug, Default)]
struct Control {
    state: Mutex<ReaperState>,
    wake_cv: Condvar,
    done_cv: Condvar,
}

/// Handle to the running reaper
pub struct Reaper<R: RouteResolver + 'static> {
    cache: Arc<FlowCache<R>>,
    control: Arc<Control>,
    thread: Option<thread::JoinHandle<()>>,
}

impl<R: RouteResolver + 'static> Reaper<R> {
    /// Start the reaper for `cache`
    pub fn spawn(cache: Arc<FlowCache<R>>) -> FlowTableResult<Self> {
        let control = Arc::new(Control::default());
        control.state.lock().running = true;

        let thread = thread::Builder::new()
            .name(REAPER_THREAD_NAME.into())
            .spawn({
                let cache = Arc::clone(&cache);
                let control = Arc::clone(&control);
                move || run(&cache, &control)
            })
            .map_err(|e| FlowTableError::SpawnFailed(e.to_string()))?;

        tracing::info!("flow cache reaper started");
        Ok(Self {
            cache,
            control,
            thread: Some(thread),
        })
    }

    pub fn cache(&self) -> &Arc<FlowCache<R>> {
        &self.cache
    }

    /// Completed passes so far
    pub fn passes(&self) -> u64 {
        self.control.state.lock().passes
    }

    pub fn is_running(&self) -> bool {
        self.control.state.lock().running
    }

    /// Wake the reaper and block until a pass that started after this call
    /// has finished. Returns the pass count at that point.
    ///
    /// If the reaper has stopped, sweeps on the calling thread instead.
    pub fn request_sweep(&self) -> u64 {
        let mut state = self.control.state.lock();
        if !state.running {
            drop(state);
            self.cache.sweep();
            return self.passes();
        }

        // A pass already under way may have missed entries the caller cares about
        let target = state.passes + if state.sweeping { 2 } else { 1 };
        state.wake = true;
        self.control.wake_cv.notify_one();
        while state.passes < target && state.running {
            self.control.done_cv.wait(&mut state);
        }
        state.passes
    }

    fn stop(&mut self) {
        {
            let mut state = self.control.state.lock();
            state.running = false;
        }
        self.control.wake_cv.notify_all();
        self.control.done_cv.notify_all();

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::warn!("flow cache reaper panicked");
            }
        }
    }

    /// Stop the thread, then flush every entry. Returns the number flushed.
    pub fn shutdown(mut self) -> usize {
        self.stop();
        let freed = self.cache.flush_all();
        tracing::info!(freed, "flow cache reaper stopped");
        freed
    }
}

impl<R: RouteResolver + 'static> Drop for Reaper<R> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<R: RouteResolver>(cache: &FlowCache<R>, control: &Control) {
    tracing::debug!("reaper loop starting");
    loop {
        {
            let mut state = control.state.lock();
            if !state.running {
                break;
            }
            state.sweeping = true;
            state.wake = false;
        }

        let was_pressured = cache.under_pressure();
        cache.sweep();
        let interval = cache.sweep_interval();
        if was_pressured != cache.under_pressure() {
            tracing::debug!(under_pressure = !was_pressured, ?interval, "reaper pace changed");
        }

        let mut state = control.state.lock();
        state.sweeping = false;
        state.passes += 1;
        control.done_cv.notify_all();

        if !state.running {
            break;
        }
        if !state.wake {
            control.wake_cv.wait_for(&mut state, interval);
        }
    }
    tracing::debug!("reaper loop exiting");
}
