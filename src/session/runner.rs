use std::time::Instant;

use tracing::{debug, warn};

use super::{Precondition, SessionController, SessionError, SessionEvent};
use crate::detector::{DetectorError, HandDetector};

/// Counters for one [`run_detection`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunStats {
    pub ticks: usize,
    pub detector_errors: usize,
    pub discarded: usize,
}

/// Drive the controller's detection loop until it goes idle.
///
/// The loop also ends when the detector runs out of frames, stops being
/// ready or fails to read, and when the controller's stop handle is raised.
/// An unreadable frame is logged and the loop moves on to the next tick.
pub fn run_detection(
    controller: &mut SessionController,
    detector: &mut dyn HandDetector,
    mut on_event: impl FnMut(&SessionEvent),
) -> Result<RunStats, SessionError> {
    let mut stats = RunStats::default();
    while let Some(ticket) = controller.next_tick() {
        stats.ticks += 1;
        let hands = match detector.estimate_hands() {
            Ok(hands) => hands,
            Err(DetectorError::Exhausted) => {
                debug!("Detector has no more frames");
                controller.on_detection_failed(ticket);
                break;
            }
            Err(err @ DetectorError::Frame { .. }) => {
                warn!("Hand detection failed: {err}");
                stats.detector_errors += 1;
                controller.on_detection_failed(ticket);
                continue;
            }
            Err(err) => {
                warn!("Detector unavailable, ending run: {err}");
                stats.detector_errors += 1;
                controller.on_detection_failed(ticket);
                break;
            }
        };
        let transition = match controller.on_detection(ticket, &hands, Instant::now()) {
            Ok(transition) => transition,
            Err(SessionError::PreconditionFailed(Precondition::InvalidSample { actual, .. })) => {
                warn!(values = actual, "Skipping malformed hand");
                stats.detector_errors += 1;
                continue;
            }
            Err(err) => {
                controller.stop();
                return Err(err);
            }
        };
        for event in &transition.events {
            if *event == SessionEvent::Discarded {
                stats.discarded += 1;
            }
            on_event(event);
        }
    }
    if controller.state().is_detecting() {
        for event in &controller.stop().events {
            on_event(event);
        }
    }
    Ok(stats)
}
