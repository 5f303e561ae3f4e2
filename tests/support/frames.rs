use std::io::Write;
use std::path::Path;

use gesturelab::encoder::{Hand, LANDMARK_COUNT, Landmark};

/// A hand whose landmarks fan out from `base`.
pub fn hand_at(base: f32) -> Hand {
    Hand::new(
        (0..LANDMARK_COUNT)
            .map(|i| Landmark::new(base + i as f32 * 0.01, base - i as f32 * 0.02))
            .collect(),
    )
}

/// Write one JSON array of hands per line, as a recorded detector would.
pub fn write_frames(path: &Path, frames: &[Vec<Hand>]) {
    let mut file = std::fs::File::create(path).expect("create frames file");
    for frame in frames {
        let line = serde_json::to_string(frame).expect("serialize frame");
        writeln!(file, "{line}").expect("write frame");
    }
}
