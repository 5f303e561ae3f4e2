use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative stop flag shared with whatever drives the detection loop.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }
}

/// Permission to run exactly one detection tick.
///
/// Deliberately not `Clone`: a ticket is consumed when its result is handed
/// back, and tickets from a cancelled run never match again.
#[derive(Debug, PartialEq, Eq)]
pub struct TickTicket {
    generation: u64,
}

/// Cancellable repeating task with at most one tick outstanding.
#[derive(Debug, Default)]
pub struct DetectionLoop {
    generation: u64,
    active: bool,
    pending: bool,
    stop: StopHandle,
}

impl DetectionLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new run, invalidating tickets from any previous one.
    pub fn start(&mut self) {
        self.bump_generation();
        self.active = true;
        self.pending = false;
        self.stop.reset();
    }

    /// End the current run; outstanding tickets become stale.
    pub fn cancel(&mut self) {
        if self.active || self.pending {
            self.bump_generation();
        }
        self.active = false;
        self.pending = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn has_pending(&self) -> bool {
        self.pending
    }

    /// Hand out the next ticket, or `None` when inactive, stopping or busy.
    pub fn schedule(&mut self) -> Option<TickTicket> {
        if !self.active || self.pending || self.stop.is_stop_requested() {
            return None;
        }
        self.pending = true;
        Some(TickTicket {
            generation: self.generation,
        })
    }

    /// Redeem a ticket; `false` means its result must be discarded.
    pub fn complete(&mut self, ticket: TickTicket) -> bool {
        if !self.active || ticket.generation != self.generation {
            return false;
        }
        self.pending = false;
        true
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn bump_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}
