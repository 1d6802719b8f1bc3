//! Engine RPM simulation and torque curve.
//!
//! Raw RPM chases a target blended from a throttle/idle term and the
//! wheel-derived RPM, weighted by clutch engagement and scaled by available
//! fuel. A second smoothing pass produces the externally visible RPM (audio
//! pitch, dashboards read that one).

use crate::settings::EngineSettings;
use crate::state::VehicleState;

// ---------------------------------------------------------------------------
// Torque curve
// ---------------------------------------------------------------------------

/// Piecewise-linear torque curve over RPM, defined by three control points:
/// half peak at idle, peak at the peak-torque RPM, peak/1.5 at max RPM.
#[derive(Debug, Clone, PartialEq)]
pub struct TorqueCurve {
    points: [(f32, f32); 3],
    /// The four parameters the curve was generated from, to detect changes.
    params: (f32, f32, f32, f32),
}

impl TorqueCurve {
    pub fn generate(s: &EngineSettings) -> Self {
        let peak_rpm = s.peak_torque_rpm.clamp(s.min_rpm, s.max_rpm);
        Self {
            points: [
                (s.min_rpm, s.peak_torque * 0.5),
                (peak_rpm, s.peak_torque),
                (s.max_rpm, s.peak_torque / 1.5),
            ],
            params: (s.min_rpm, s.max_rpm, s.peak_torque, s.peak_torque_rpm),
        }
    }

    /// Rebuild only when one of the defining parameters moved.
    pub fn regenerate_if_changed(&mut self, s: &EngineSettings) {
        let params = (s.min_rpm, s.max_rpm, s.peak_torque, s.peak_torque_rpm);
        if params != self.params {
            *self = Self::generate(s);
        }
    }

    /// Sample torque (N*m) at an RPM. Clamped flat outside the control range.
    pub fn sample(&self, rpm: f32) -> f32 {
        let [(r0, t0), (r1, t1), (r2, t2)] = self.points;
        if rpm <= r0 {
            t0
        } else if rpm <= r1 {
            t0 + (t1 - t0) * (rpm - r0) / (r1 - r0).max(1e-3)
        } else if rpm <= r2 {
            t1 + (t2 - t1) * (rpm - r1) / (r2 - r1).max(1e-3)
        } else {
            t2
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Engine {
    pub settings: EngineSettings,
    curve: TorqueCurve,
}

impl Engine {
    pub fn new(settings: EngineSettings) -> Self {
        let curve = TorqueCurve::generate(&settings);
        Self { settings, curve }
    }

    /// Swap engine parameters at runtime; the torque curve follows.
    pub fn set_settings(&mut self, settings: EngineSettings) {
        self.settings = settings;
        self.curve.regenerate_if_changed(&self.settings);
    }

    pub fn torque_at(&self, rpm: f32) -> f32 {
        self.curve.sample(rpm)
    }

    /// True when the rev limiter should cut throttle this tick.
    pub fn rev_limited(&self, rpm: f32) -> bool {
        rpm >= self.settings.max_rpm * self.settings.rev_limit_frac
    }

    /// Advance the RPM filters one tick.
    ///
    /// `wheel_rpm` is the engine-side RPM implied by the powered wheels
    /// (already multiplied through the gear and final-drive ratios);
    /// `clutch` is 0 engaged .. 1 disengaged; `throttle` is the post-cut
    /// effective throttle.
    pub fn update_rpm(
        &self,
        state: &mut VehicleState,
        wheel_rpm: f32,
        clutch: f32,
        throttle: f32,
        dt: f32,
    ) {
        let s = &self.settings;

        // Target: idle/throttle term blended toward wheel RPM by engagement.
        let throttle_term = s.min_rpm + throttle.max(0.0) * (s.max_rpm - s.min_rpm);
        let engagement = 1.0 - clutch.clamp(0.0, 1.0);
        let mut target = throttle_term + (wheel_rpm.max(0.0) - throttle_term) * engagement;
        target *= state.fuel_scale();
        if !state.engine_running {
            target = 0.0;
        }

        // Raw pass: critically damped first-order filter whose time constant
        // grows with engine inertia and slips further out when the clutch is
        // disengaged (a free-revving engine still carries its flywheel).
        let tau_raw = s.inertia * (1.0 + clutch);
        let k_raw = 1.0 - (-dt / tau_raw.max(1e-3)).exp();
        state.engine_rpm_raw += (target - state.engine_rpm_raw) * k_raw;
        state.engine_rpm_raw = state.engine_rpm_raw.clamp(0.0, s.max_rpm + s.rpm_margin);

        // Visible pass: shrinking time constant as the clutch engages, so the
        // audible engine stiffens exactly when it is coupled to the wheels.
        let tau_vis = 0.25 * (0.3 + 0.7 * clutch);
        let k_vis = 1.0 - (-dt / tau_vis.max(1e-3)).exp();
        state.engine_rpm += (state.engine_rpm_raw - state.engine_rpm) * k_vis;
        state.engine_rpm = state.engine_rpm.clamp(0.0, s.max_rpm + s.rpm_margin);
    }
}
