//! Window scheduler
//!
//! Drives each window through `Open → Closing → Emitted` by wall-clock time.
//! Windows are discovered lazily from the state store (a window is open from
//! its first merge). On every tick each window whose end has passed is closed
//! in increasing end order, so per-key output stays ordered across windows.

use super::emitter::{EmitReport, Emitter};
use super::engine::NowFn;
use super::metrics::EngineMetrics;
use super::state::AggregationStateStore;
use super::windows::WindowId;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Open,
    Closing,
    Emitted,
}

/// A window that went through closure during a tick or drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedWindow {
    pub window: WindowId,
    pub report: EmitReport,
}

pub struct WindowScheduler {
    store: Arc<AggregationStateStore>,
    emitter: Arc<Emitter>,
    metrics: Arc<EngineMetrics>,
    windows: BTreeMap<WindowId, WindowState>,
}

impl WindowScheduler {
    pub fn new(
        store: Arc<AggregationStateStore>,
        emitter: Arc<Emitter>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            store,
            emitter,
            metrics,
            windows: BTreeMap::new(),
        }
    }

    /// Lifecycle state of a window still under bookkeeping
    ///
    /// Emitted windows are dropped right after hand-off, so this returns
    /// `None` for them.
    pub fn state_of(&self, window: WindowId) -> Option<WindowState> {
        self.windows.get(&window).copied()
    }

    pub fn tracked_windows(&self) -> Vec<WindowId> {
        self.windows.keys().copied().collect()
    }

    /// Register windows that received their first merge since the last tick
    pub fn sync_open_windows(&mut self) {
        for window in self.store.open_windows() {
            self.windows.entry(window).or_insert_with(|| {
                log::debug!("🪟 Window {} OPEN", window);
                WindowState::Open
            });
        }
    }

    /// Open windows whose end is at or before `now`, ascending
    pub fn due_windows(&mut self, now: i64) -> Vec<WindowId> {
        self.sync_open_windows();
        self.windows
            .iter()
            .filter(|(window, state)| **state == WindowState::Open && window.is_closed_at(now))
            .map(|(window, _)| *window)
            .collect()
    }

    /// Close and emit every window that ended at or before `now`
    pub async fn fire_closed(&mut self, now: i64) -> Vec<ClosedWindow> {
        let due = self.due_windows(now);
        let mut closed = Vec::with_capacity(due.len());

        for window in due {
            closed.push(self.close_window(window).await);
        }

        closed
    }

    /// Close every open window regardless of its end (shutdown)
    pub async fn drain(&mut self) -> Vec<ClosedWindow> {
        self.sync_open_windows();
        let open: Vec<WindowId> = self
            .windows
            .iter()
            .filter(|(_, state)| **state == WindowState::Open)
            .map(|(window, _)| *window)
            .collect();

        log::info!("🔄 Draining {} open windows", open.len());

        let mut closed = Vec::with_capacity(open.len());
        for window in open {
            closed.push(self.close_window(window).await);
        }

        self.emitter.flush().await;
        closed
    }

    async fn close_window(&mut self, window: WindowId) -> ClosedWindow {
        self.windows.insert(window, WindowState::Closing);

        let entries = self.store.extract_and_purge(window);
        self.metrics.record_window_closed();

        let report = if entries.is_empty() {
            EmitReport::default()
        } else {
            self.emitter.emit_batch(window, entries).await
        };

        self.windows.insert(window, WindowState::Emitted);
        log::info!(
            "📤 Window {} EMITTED: {} published, {} dead-lettered",
            window,
            report.published,
            report.dead_lettered
        );
        self.windows.remove(&window);

        ClosedWindow { window, report }
    }
}

/// Tick the scheduler until shutdown is signalled, then hand it back
///
/// The caller drains the returned scheduler once ingestion has stopped.
pub async fn window_scheduler_task(
    mut scheduler: WindowScheduler,
    now_fn: NowFn,
    tick_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> WindowScheduler {
    log::info!("⏰ Starting window scheduler (tick: {}ms)", tick_interval.as_millis());

    let mut timer = interval(tick_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let now = now_fn();
                let closed = scheduler.fire_closed(now).await;
                if !closed.is_empty() {
                    log::debug!("⏰ Tick at {} closed {} windows", now, closed.len());
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    log::info!("⏰ Window scheduler stopped");
    scheduler
}
