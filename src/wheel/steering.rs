// ==============================================================================
// steering.rs — ACKERMANN STEERING GEOMETRY (FRONT AXLE)
// ==============================================================================
// Responsibilities:
// - Convert driver steering intent into per-wheel steer angles
// - Apply Ackermann steering geometry around the bicycle-model turn radius
// - Apply static toe
// - Build per-wheel forward & side directions (unit vectors, world space)
//
// Sign convention: positive angle steers toward the chassis right vector.
// The wheel basis produced here must match the chassis basis used for slip
// decomposition (forward = rot * -Z, right = forward x up).
// ==============================================================================

use nalgebra::{UnitQuaternion, Vector3};

use crate::settings::SteeringSettings;

/// Inner/outer wheel angles for a bicycle-model turn.
///
/// `reference_length` stands in for the wheelbase in the wheel-angle atan so
/// the geometry can be tuned independently of the physical axle spacing.
fn ackermann_angles(base: f32, settings: &SteeringSettings) -> (f32, f32) {
    let eps = 1e-4;
    if base.abs() < eps {
        return (0.0, 0.0);
    }

    let sign = base.signum();
    let a = base.abs();

    // Bicycle-model turning radius
    let r = settings.wheelbase / a.tan();

    let r_in = (r - settings.track_width * 0.5).max(0.01);
    let r_out = (r + settings.track_width * 0.5).max(0.01);

    let inner = (settings.reference_length / r_in).atan() * sign;
    let outer = (settings.reference_length / r_out).atan() * sign;

    // Positive base = right turn = right wheel is inner.
    if sign > 0.0 {
        (outer, inner)
    } else {
        (inner, outer)
    }
}

/// Per-wheel steer angles (left, right) for a driver steer input in -1..1.
pub fn solve_steering(settings: &SteeringSettings, steer_input: f32) -> (f32, f32) {
    let base = steer_input.clamp(-1.0, 1.0) * settings.max_angle;
    let (ack_l, ack_r) = ackermann_angles(base, settings);

    // Static toe-in: both wheels point slightly inward at center.
    (ack_l + settings.toe_angle, ack_r - settings.toe_angle)
}

/// World-space forward/side basis of a wheel steered by `angle` radians.
///
/// Chassis basis: forward = rot * -Z, right = forward x up (Y-up worlds).
pub fn steered_basis(
    chassis_rot: &UnitQuaternion<f32>,
    angle: f32,
) -> (Vector3<f32>, Vector3<f32>) {
    let up = Vector3::new(0.0, 1.0, 0.0);
    let chassis_fwd = chassis_rot * Vector3::new(0.0, 0.0, -1.0);
    let chassis_right = chassis_fwd.cross(&up);

    let forward = (chassis_fwd * angle.cos() + chassis_right * angle.sin()).normalize();
    let side = forward.cross(&up).normalize();

    debug_assert!(forward.dot(&side).abs() < 1e-4);
    (forward, side)
}
