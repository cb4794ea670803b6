//! Tripwire crossing evaluation
//!
//! For a horizontal tripwire at position p, a track's side is
//! sign(center_y / H - p); vertical uses x. A hysteresis band of width
//! `spacing` around p keeps jittering centers from re-firing: the side
//! flips only once the center clears p +/- spacing/2, and a crossing is
//! emitted only on an actual sign flip.

use crate::attendance::Direction;
use crate::config::{DirectionPolicy, Tripwire, TripwireOrientation};
use std::collections::HashMap;

/// One emitted crossing
#[derive(Debug, Clone, PartialEq)]
pub struct Crossing {
    pub tripwire_id: u32,
    pub tripwire_name: String,
    pub track_id: u64,
    pub direction: Direction,
}

/// Per-pipeline tripwire state
pub struct TripwireEvaluator {
    tripwires: Vec<Tripwire>,
    /// Committed side per (track, tripwire): -1 or +1
    sides: HashMap<(u64, u32), i8>,
}

impl TripwireEvaluator {
    pub fn new(mut tripwires: Vec<Tripwire>) -> Self {
        // Stable order by id for deterministic event sequences
        tripwires.sort_by_key(|t| t.id);
        Self {
            tripwires,
            sides: HashMap::new(),
        }
    }

    pub fn tripwires(&self) -> &[Tripwire] {
        &self.tripwires
    }

    /// Evaluate one track's center against every tripwire.
    /// Emits at most one crossing per tripwire per call.
    pub fn evaluate(
        &mut self,
        track_id: u64,
        center_x: f32,
        center_y: f32,
        width: u32,
        height: u32,
    ) -> Vec<Crossing> {
        let mut crossings = Vec::new();
        if width == 0 || height == 0 {
            return crossings;
        }

        for tripwire in &self.tripwires {
            let normalized = match tripwire.orientation {
                TripwireOrientation::Horizontal => center_y / height as f32,
                TripwireOrientation::Vertical => center_x / width as f32,
            };
            let offset = normalized - tripwire.position;

            // Inside the hysteresis band nothing commits
            if offset.abs() < tripwire.spacing / 2.0 {
                continue;
            }
            let side: i8 = if offset > 0.0 { 1 } else { -1 };

            let key = (track_id, tripwire.id);
            match self.sides.insert(key, side) {
                Some(previous) if previous != side => {
                    // Negative-to-positive is "enter" by convention
                    let observed = if side > 0 {
                        Direction::Enter
                    } else {
                        Direction::Exit
                    };
                    let emit = match tripwire.direction {
                        DirectionPolicy::Enter => observed == Direction::Enter,
                        DirectionPolicy::Exit => observed == Direction::Exit,
                        DirectionPolicy::Both => true,
                    };
                    if emit {
                        tracing::debug!(
                            track_id,
                            tripwire_id = tripwire.id,
                            direction = observed.as_str(),
                            "Tripwire crossing"
                        );
                        crossings.push(Crossing {
                            tripwire_id: tripwire.id,
                            tripwire_name: tripwire.name.clone(),
                            track_id,
                            direction: observed,
                        });
                    }
                }
                _ => {}
            }
        }

        crossings
    }

    /// Drop state for an expired track
    pub fn forget_track(&mut self, track_id: u64) {
        self.sides.retain(|(t, _), _| *t != track_id);
    }
}
