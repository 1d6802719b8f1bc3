// ==============================================================================
// assist.rs — STABILITY ASSIST LAYER (ABS / TCS / ESP / HELPERS)
// ==============================================================================
// Sits between the drivetrain's raw torque commands and the wheel force
// solve. Reads last tick's slip state off the wheels and rewrites motor and
// brake torques in place, then reports chassis-level corrections (yaw torque
// and heading blend) for the rigid-body layer.
//
// Order inside apply():
// 1. ABS   — releases a braked wheel whose forward slip would lock it
// 2. TCS   — attenuates motor torque on a wheel spinning past the surface
//            slip threshold
// 3. ESP   — brakes the outer wheel of the axle that is washing out
// 4. steering helper — yaw torque toward the velocity heading
// 5. traction helper — softens front sideways grip against adverse yaw
// ==============================================================================

use nalgebra::Vector3;

use crate::settings::{AssistSettings, GroundMaterialTable};
use crate::wheel::Wheel;

/// Chassis observations the assists run against, sampled once per tick.
#[derive(Debug, Clone, Copy)]
pub struct AssistContext {
    /// World linear velocity of the chassis.
    pub linvel: Vector3<f32>,
    /// Chassis forward unit vector.
    pub forward: Vector3<f32>,
    /// Signed speed along `forward` (m/s).
    pub forward_speed: f32,
    /// Yaw rate about world up (rad/s).
    pub yaw_rate: f32,
    pub steer_input: f32,
    pub brake_input: f32,
    pub handbrake: f32,
    /// Drift relaxation currently active on any wheel.
    pub drift_active: bool,
    /// Cleared by the damage model once a wheel detaches.
    pub esp_intact: bool,
    /// Reference brake torque for corrective braking (N*m).
    pub brake_torque_ref: f32,
    pub dt: f32,
}

/// Chassis-level outputs of the assist pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssistOutputs {
    /// Corrective torque about world up (N*m).
    pub yaw_torque: f32,
    /// Fraction by which the rigid-body layer should rotate linear velocity
    /// toward the facing direction this tick, 0..1.
    pub heading_blend: f32,
}

#[derive(Debug, Clone)]
pub struct AssistLayer {
    /// Low-passed travel direction, unit length once moving.
    smoothed_travel_dir: Vector3<f32>,
}

impl Default for AssistLayer {
    fn default() -> Self {
        Self {
            smoothed_travel_dir: Vector3::zeros(),
        }
    }
}

/// Below this speed the heading-based helpers stand down.
const HELPER_MIN_SPEED: f32 = 2.0;
/// Yaw rate under which the heading blend is allowed to act.
const QUIET_YAW_RATE: f32 = 0.5;

impl AssistLayer {
    /// Rewrite wheel torque commands in place and return the chassis-level
    /// corrections.
    pub fn apply(
        &mut self,
        settings: &AssistSettings,
        wheels: &mut [Wheel],
        grounds: &GroundMaterialTable,
        ctx: &AssistContext,
    ) -> AssistOutputs {
        self.abs(settings, wheels, ctx);
        self.tcs(settings, wheels, grounds);
        self.esp(settings, wheels, ctx);

        let mut out = AssistOutputs::default();
        if ctx.forward_speed.abs() > HELPER_MIN_SPEED {
            out = self.steering_helper(settings, ctx);
            self.traction_helper(settings, wheels, ctx);
        } else {
            for w in wheels.iter_mut() {
                w.traction_helped = 1.0;
            }
        }
        out
    }

    /// Anti-lock: fully release the brake on a wheel whose slip, scaled by
    /// pedal pressure, crosses the threshold. Binary by design of the
    /// threshold test; the release lasts one tick and re-arms as slip drops.
    fn abs(&self, settings: &AssistSettings, wheels: &mut [Wheel], ctx: &AssistContext) {
        if !settings.abs_enabled {
            return;
        }
        for w in wheels.iter_mut() {
            if !w.spec.braked || !w.grounded {
                continue;
            }
            if w.forward_slip.abs() * ctx.brake_input >= settings.abs_threshold {
                w.brake_torque = 0.0;
            }
        }
    }

    /// Traction control: attenuate motor torque on a powered wheel spinning
    /// past the surface slip threshold. Sign-aware, only torque that feeds
    /// the slip is cut.
    fn tcs(&self, settings: &AssistSettings, wheels: &mut [Wheel], grounds: &GroundMaterialTable) {
        if !settings.tcs_enabled {
            return;
        }
        for w in wheels.iter_mut() {
            if !w.spec.powered || !w.grounded || w.motor_torque == 0.0 {
                continue;
            }
            let threshold = grounds.lookup(w.ground_material).slip_threshold;
            let excess = w.forward_slip.abs() - threshold;
            if excess > 0.0 && w.forward_slip.signum() == w.motor_torque.signum() {
                let cut = (excess * settings.tcs_strength).clamp(0.0, 1.0);
                w.motor_torque *= 1.0 - cut;
            }
        }
    }

    /// Electronic stability: brake the outer wheel of the axle whose
    /// aggregate slip angle flags it as washing out — the outer rear against
    /// oversteer, the outer front against understeer. Stands down while the
    /// driver is braking hard or handbraking, while drift relaxation is
    /// active, and once wheel damage has severed the system.
    fn esp(&self, settings: &AssistSettings, wheels: &mut [Wheel], ctx: &AssistContext) {
        if !settings.esp_enabled || !ctx.esp_intact || ctx.drift_active {
            return;
        }
        if ctx.brake_input > 0.7 || ctx.handbrake > 0.1 {
            return;
        }

        let axle_slip = |steerable: bool| {
            let mut sum = 0.0;
            let mut n = 0u32;
            for w in wheels.iter().filter(|w| w.spec.steerable == steerable) {
                if w.grounded {
                    sum += w.sideways_slip;
                    n += 1;
                }
            }
            if n == 0 { 0.0 } else { sum / n as f32 }
        };
        let front_slip = axle_slip(true);
        let rear_slip = axle_slip(false);

        // Oversteer (rear washing out) takes precedence over understeer.
        let (steerable_target, slip) = if rear_slip.abs() >= settings.esp_threshold {
            (false, rear_slip)
        } else if front_slip.abs() >= settings.esp_threshold {
            (true, front_slip)
        } else {
            return;
        };

        // Outer wheel of the turn. Positive steer turns right; with the
        // wheel centered fall back on yaw, which is positive when the nose
        // rotates left.
        let turning_right = if ctx.steer_input.abs() > 0.05 {
            ctx.steer_input > 0.0
        } else {
            ctx.yaw_rate < 0.0
        };
        let outer_is_left = turning_right;

        let corrective = slip.abs() * settings.esp_strength * ctx.brake_torque_ref;
        for w in wheels.iter_mut() {
            if w.spec.steerable != steerable_target || !w.grounded {
                continue;
            }
            let is_left = w.spec.offset[0] < 0.0;
            if is_left == outer_is_left {
                w.brake_torque += corrective;
            }
        }
    }

    /// Yaw torque that rotates the chassis toward its (smoothed) travel
    /// direction, plus the heading blend applied when yaw is quiet.
    fn steering_helper(&mut self, settings: &AssistSettings, ctx: &AssistContext) -> AssistOutputs {
        if !settings.steering_helper_enabled {
            return AssistOutputs::default();
        }

        let speed = ctx.linvel.norm();
        if speed < HELPER_MIN_SPEED {
            return AssistOutputs::default();
        }
        let travel = ctx.linvel / speed;
        let k = 1.0 - (-8.0 * ctx.dt).exp();
        self.smoothed_travel_dir += (travel - self.smoothed_travel_dir) * k;
        let travel = match self.smoothed_travel_dir.try_normalize(1e-4) {
            Some(v) => v,
            None => return AssistOutputs::default(),
        };

        // Signed heading error about world up, travel relative to facing.
        let sign = if ctx.forward_speed >= 0.0 { 1.0 } else { -1.0 };
        let facing = ctx.forward * sign;
        let cross_y = facing.z * travel.x - facing.x * travel.z;
        let error = cross_y.clamp(-1.0, 1.0).asin();

        // Positive yaw rotates the nose left; travel right of facing gives a
        // negative error, so the torque follows the error's sign directly.
        let yaw_torque = error * ctx.forward_speed.abs() * settings.steer_helper_angular * 1000.0;

        let heading_blend = if ctx.yaw_rate.abs() < QUIET_YAW_RATE {
            (settings.steer_helper_linear * (1.0 - ctx.yaw_rate.abs() / QUIET_YAW_RATE))
                .clamp(0.0, 1.0)
        } else {
            0.0
        };

        AssistOutputs {
            yaw_torque,
            heading_blend,
        }
    }

    /// When the chassis rotates against the steering input, soften front
    /// sideways grip so the front axle stops feeding the spin.
    fn traction_helper(&self, settings: &AssistSettings, wheels: &mut [Wheel], ctx: &AssistContext) {
        for w in wheels.iter_mut() {
            w.traction_helped = 1.0;
        }
        if !settings.traction_helper_enabled || ctx.steer_input.abs() < 0.1 {
            return;
        }
        // Positive steer turns right; right turns yaw negative about world up.
        let adverse = ctx.yaw_rate * ctx.steer_input > 0.0;
        if !adverse {
            return;
        }
        let cut = (ctx.yaw_rate.abs() * settings.traction_helper_strength).clamp(0.0, 0.75);
        for w in wheels.iter_mut().filter(|w| w.spec.steerable) {
            w.traction_helped = 1.0 - cut;
        }
    }
}
