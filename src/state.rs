//! Per-tick mutable vehicle telemetry.
//!
//! `VehicleState` is the record every subsystem reads and writes during the
//! fixed tick; external consumers (audio pitch, particle intensity, dashboards)
//! read it between ticks. It owns no behavior beyond clamping helpers.

use serde::Serialize;

use crate::input::DriverInput;

/// Travel direction sign of the drivetrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum Direction {
    Forward,
    #[default]
    Neutral,
    Reverse,
}

impl Direction {
    /// +1 forward, 0 neutral, -1 reverse.
    pub fn sign(self) -> f32 {
        match self {
            Direction::Forward => 1.0,
            Direction::Neutral => 0.0,
            Direction::Reverse => -1.0,
        }
    }
}

/// Mutable vehicle state, created at spawn and destroyed with the vehicle.
///
/// Mutated once per physics tick, in the fixed intra-tick order:
/// drivetrain, then wheel forces, then stability corrections.
#[derive(Debug, Clone, Serialize)]
pub struct VehicleState {
    /// Signed forward speed (m/s), positive along the chassis forward axis.
    pub speed: f32,
    /// Raw engine RPM (filter input side).
    pub engine_rpm_raw: f32,
    /// Externally visible, second-pass smoothed RPM.
    pub engine_rpm: f32,
    /// Gear index into the gear table, only meaningful in forward direction.
    pub current_gear: usize,
    pub direction: Direction,
    /// True while the changing-gear window is open.
    pub changing_gear: bool,
    /// Effective clutch position this tick, 0 engaged .. 1 disengaged.
    /// Driven by the automatic clutch; the driver's pedal overrides it when
    /// the pedal demands more disengagement.
    pub clutch: f32,
    /// Throttle after rev-limiter / shift-window cuts.
    pub effective_throttle: f32,
    /// The clamped driver input consumed this tick.
    pub input: DriverInput,
    pub fuel: f32, // liters
    pub engine_running: bool,
    /// Clamped to >= 1 wherever it divides torque.
    pub powered_wheel_count: usize,
    /// Cleared by the deformation engine when a wheel detaches; ESP reads it.
    pub esp_intact: bool,
}

impl VehicleState {
    pub fn new(fuel: f32, powered_wheel_count: usize, idle_rpm: f32) -> Self {
        Self {
            speed: 0.0,
            engine_rpm_raw: idle_rpm,
            engine_rpm: idle_rpm,
            current_gear: 0,
            direction: Direction::Neutral,
            changing_gear: false,
            clutch: 1.0,
            effective_throttle: 0.0,
            input: DriverInput::default(),
            fuel,
            engine_running: true,
            powered_wheel_count: powered_wheel_count.max(1),
            esp_intact: true,
        }
    }

    /// Powered wheel count guarded against division by zero.
    pub fn powered_wheels(&self) -> f32 {
        self.powered_wheel_count.max(1) as f32
    }

    /// Fuel availability scale for the RPM target: full above the reserve,
    /// tapering to zero as the tank empties.
    pub fn fuel_scale(&self) -> f32 {
        const RESERVE: f32 = 0.5; // liters
        (self.fuel / RESERVE).clamp(0.0, 1.0)
    }
}
