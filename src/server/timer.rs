//! Timer grid: one tristate slot per worker, scanned by the time
//! poller at ~75 Hz. ON slots get their elapsed time sampled and a
//! TIME frame emitted; OFF clears the start sample; RW means the
//! worker is finalizing a win and owns the slot, so the poller skips.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

use crate::params::*;
use crate::protocol::{write_frame, Frame};
use crate::server::ServerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    Off,
    On,
    Rw,
}

/// Shared handle to one client's write half. Worker replies and poller
/// TIME frames both go through it, one whole record per lock, so
/// frames interleave without tearing.
pub type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

pub struct TimerSlot {
    mode: TimerMode,
    t_start: Option<Instant>,
    t_now: Option<Instant>,
    writer: Option<SharedWriter>,
}

impl TimerSlot {
    fn new() -> Self {
        TimerSlot {
            mode: TimerMode::Off,
            t_start: None,
            t_now: None,
            writer: None,
        }
    }
}

pub struct TimerGrid {
    slots: Vec<TimerSlot>,
}

impl TimerGrid {
    pub fn new() -> Self {
        TimerGrid {
            slots: (0..NUM_WORKERS).map(|_| TimerSlot::new()).collect(),
        }
    }

    /// Bind a freshly attached client's write half to the worker slot.
    pub fn attach(&mut self, idx: usize, writer: SharedWriter) {
        let slot = &mut self.slots[idx];
        slot.mode = TimerMode::Off;
        slot.t_start = None;
        slot.t_now = None;
        slot.writer = Some(writer);
    }

    /// Clear the slot on session teardown.
    pub fn detach(&mut self, idx: usize) {
        self.slots[idx] = TimerSlot::new();
    }

    /// Drop every slot's writer handle; used by shutdown to close the
    /// active sockets once their workers are gone.
    pub fn detach_all(&mut self) {
        for idx in 0..self.slots.len() {
            self.detach(idx);
        }
    }

    pub fn set_mode(&mut self, idx: usize, mode: TimerMode) {
        let slot = &mut self.slots[idx];
        slot.mode = mode;
        if mode == TimerMode::On {
            // force the poller to take a fresh start sample
            slot.t_start = None;
            slot.t_now = None;
        }
    }

    pub fn mode(&self, idx: usize) -> TimerMode {
        self.slots[idx].mode
    }

    /// Elapsed time as last sampled by the poller. Valid for the
    /// winning worker while its slot is in RW.
    pub fn elapsed(&self, idx: usize) -> Duration {
        let slot = &self.slots[idx];
        match (slot.t_start, slot.t_now) {
            (Some(start), Some(now)) => now.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }

    fn poll_slot(&mut self, idx: usize) -> Option<(SharedWriter, Duration)> {
        let slot = &mut self.slots[idx];
        match slot.mode {
            TimerMode::On => {
                let now = Instant::now();
                let start = *slot.t_start.get_or_insert(now);
                slot.t_now = Some(now);
                slot.writer
                    .clone()
                    .map(|w| (w, now.saturating_duration_since(start)))
            }
            TimerMode::Off => {
                slot.t_start = None;
                None
            }
            TimerMode::Rw => None,
        }
    }
}

impl Default for TimerGrid {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Time Poller ────────────────────────────────────────────────────

/// Stream elapsed-time frames to every in-progress game. Writer
/// handles are cloned out under the grid lock; the sends themselves
/// happen after it is released. Send failures are ignored here — the
/// worker's read loop is the authority on disconnects.
pub async fn time_poller(state: Arc<ServerState>) {
    let mut tick = tokio::time::interval(TIME_TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tick.tick().await;
        let mut sends: Vec<(SharedWriter, Duration)> = Vec::new();
        {
            let mut grid = state.timers.lock().await;
            for idx in 0..NUM_WORKERS {
                if let Some(send) = grid.poll_slot(idx) {
                    sends.push(send);
                }
            }
        }
        for (writer, dt) in sends {
            let frame = Frame::Time {
                secs: dt.as_secs(),
                nanos: dt.subsec_nanos() as u64,
            };
            let mut w = writer.lock().await;
            let _ = write_frame(&mut *w, &frame).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_samples_start_once_and_advances() {
        let mut grid = TimerGrid::new();
        grid.set_mode(0, TimerMode::On);
        // no writer attached: no send, but time still advances
        assert!(grid.poll_slot(0).is_none());
        let first = grid.elapsed(0);
        std::thread::sleep(Duration::from_millis(2));
        grid.poll_slot(0);
        let second = grid.elapsed(0);
        assert!(second >= first);
        assert!(second >= Duration::from_millis(2));
    }

    #[test]
    fn test_off_clears_start_sample() {
        let mut grid = TimerGrid::new();
        grid.set_mode(0, TimerMode::On);
        grid.poll_slot(0);
        grid.set_mode(0, TimerMode::Off);
        grid.poll_slot(0);
        assert_eq!(grid.elapsed(0), Duration::ZERO);
        // a restarted game begins from zero, not the old sample
        grid.set_mode(0, TimerMode::On);
        grid.poll_slot(0);
        assert!(grid.elapsed(0) < Duration::from_millis(5));
    }

    #[test]
    fn test_rw_slot_is_left_alone() {
        let mut grid = TimerGrid::new();
        grid.set_mode(0, TimerMode::On);
        grid.poll_slot(0);
        std::thread::sleep(Duration::from_millis(2));
        grid.poll_slot(0);
        let frozen = grid.elapsed(0);
        grid.slots[0].mode = TimerMode::Rw;
        std::thread::sleep(Duration::from_millis(2));
        assert!(grid.poll_slot(0).is_none());
        assert_eq!(grid.elapsed(0), frozen);
    }
}
