//! Normalized driver input record.
//!
//! The core never polls devices. An input-manager collaborator fills one of
//! these per tick (human or AI) and the vehicle consumes it exactly once.

use serde::{Deserialize, Serialize};

/// Driver intent for one physics tick. All axes are normalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverInput {
    pub throttle: f32,  // -1..1 (negative values request reverse once the gearbox allows it)
    pub brake: f32,     // 0..1
    pub steer: f32,     // -1 (left) .. 1 (right)
    pub clutch: f32,    // 0 (engaged) .. 1 (fully disengaged)
    pub handbrake: f32, // 0..1
    pub boost: f32,     // 0..1
}

impl DriverInput {
    /// Clamp every axis to its valid range. Called once per tick before any
    /// component reads the record, so downstream code can assume the ranges.
    pub fn clamped(self) -> Self {
        Self {
            throttle: self.throttle.clamp(-1.0, 1.0),
            brake: self.brake.clamp(0.0, 1.0),
            steer: self.steer.clamp(-1.0, 1.0),
            clutch: self.clutch.clamp(0.0, 1.0),
            handbrake: self.handbrake.clamp(0.0, 1.0),
            boost: self.boost.clamp(0.0, 1.0),
        }
    }

    /// Coasting input (everything released).
    pub fn idle() -> Self {
        Self::default()
    }
}
