// ==============================================================================
// wheel — PER-WHEEL SLIP AND FORCE MODEL
// ==============================================================================
// Each wheel carries its own spin state (omega), working friction curves and
// last-tick slip readings. Per tick the vehicle:
// - steers the wheel (steering::solve_steering)
// - moderates the friction curves for the surface under it
// - assigns motor/brake torques (after the stability layer rewrites them)
// - calls solve_wheel_force() to integrate spin and produce the tire force
//
// Slip conventions:
// - forward slip: (omega*r - v_long) / max(|v_long|, floor), positive when
//   the wheel spins faster than the ground moves under it
// - sideways slip: slip angle alpha = atan2(v_lat, |v_long|), radians
// ==============================================================================

pub mod friction;
pub mod steering;

use nalgebra::{Point3, UnitQuaternion, Vector3};

use crate::settings::{BehaviorProfile, WheelSpec};
use friction::WheelFriction;

/// Floor on the slip denominator so launches from standstill stay finite.
const SLIP_SPEED_FLOOR: f32 = 2.0;
/// Forward slip clamp; past this the curve tail is flat anyway.
const SLIP_CLAMP: f32 = 3.0;
/// How fast a gripping wheel's spin converges on ground speed (1/s).
const ROLLING_COUPLING_RATE: f32 = 12.0;
/// Radius fraction left after a tire deflates.
const DEFLATED_RADIUS_FRAC: f32 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelSide {
    Left,
    Right,
}

/// Contact probe result for one wheel, produced by the rigid-body layer.
#[derive(Debug, Clone, Copy)]
pub struct WheelContact {
    pub grounded: bool,
    /// World-space contact point.
    pub point: Point3<f32>,
    /// Surface normal at the contact.
    pub normal: Vector3<f32>,
    /// World velocity of the chassis at the contact point.
    pub point_velocity: Vector3<f32>,
    /// Suspension load (N).
    pub normal_force: f32,
    /// Ground material index (collider user data / splat channel).
    pub surface: usize,
}

impl WheelContact {
    pub fn airborne() -> Self {
        Self {
            grounded: false,
            point: Point3::origin(),
            normal: Vector3::new(0.0, 1.0, 0.0),
            point_velocity: Vector3::zeros(),
            normal_force: 0.0,
            surface: 0,
        }
    }
}

/// Tire force to hand to the rigid-body layer.
#[derive(Debug, Clone, Copy)]
pub struct WheelForce {
    pub force: Vector3<f32>,
    pub at_point: Point3<f32>,
}

#[derive(Debug, Clone)]
pub struct Wheel {
    pub spec: WheelSpec,
    pub side: WheelSide,
    pub friction: WheelFriction,

    // per-tick state
    pub steer_angle: f32, // rad
    pub omega: f32,       // rad/s spin, positive = rolling forward
    pub grounded: bool,
    pub forward_slip: f32,
    pub sideways_slip: f32, // slip angle, rad
    pub ground_material: usize,
    /// Sideways stiffness multiplier written by the traction helper, 1 = off.
    pub traction_helped: f32,

    // torque commands for this tick (N*m), rewritten by the stability layer
    pub motor_torque: f32,
    pub brake_torque: f32,

    // damage
    pub deflated: bool,
    pub detached: bool,
}

impl Wheel {
    pub fn new(spec: WheelSpec, profile: &BehaviorProfile) -> Self {
        let side = if spec.offset[0] < 0.0 {
            WheelSide::Left
        } else {
            WheelSide::Right
        };
        Self {
            spec,
            side,
            friction: WheelFriction::from_profile(profile),
            steer_angle: 0.0,
            omega: 0.0,
            grounded: false,
            forward_slip: 0.0,
            sideways_slip: 0.0,
            ground_material: 0,
            traction_helped: 1.0,
            motor_torque: 0.0,
            brake_torque: 0.0,
            deflated: false,
            detached: false,
        }
    }

    /// Effective rolling radius, reduced while deflated.
    pub fn radius(&self) -> f32 {
        if self.deflated {
            self.spec.radius * DEFLATED_RADIUS_FRAC
        } else {
            self.spec.radius
        }
    }

    /// Magnitude combining both slip channels, used by drift detection.
    pub fn combined_slip(&self) -> f32 {
        (self.forward_slip * self.forward_slip + self.sideways_slip * self.sideways_slip).sqrt()
    }
}

/// Integrate one wheel's spin and produce its tire force for this tick.
///
/// Returns `None` for airborne or detached wheels; the spin still integrates
/// freely so a landing wheel carries realistic wheelspin.
pub fn solve_wheel_force(
    wheel: &mut Wheel,
    contact: &WheelContact,
    chassis_rot: &UnitQuaternion<f32>,
    dt: f32,
) -> Option<WheelForce> {
    // Spin integration: motor drives, brake steps toward zero without
    // reversing across it (a locked wheel stays locked). On the ground the
    // brake torque is clamped to what the contact patch can transmit;
    // anything past that only locks the wheel.
    wheel.omega += wheel.motor_torque / wheel.spec.inertia * dt;
    let mut brake = wheel.brake_torque.abs();
    if contact.grounded && !wheel.detached {
        let fz = contact.normal_force.max(0.0);
        let transferable = wheel.friction.forward.extremum_value
            * wheel.friction.forward.stiffness
            * fz
            * wheel.radius();
        brake = brake.min(transferable);
    }
    let brake_step = brake / wheel.spec.inertia * dt;
    if wheel.omega.abs() <= brake_step {
        wheel.omega = 0.0;
    } else {
        wheel.omega -= brake_step * wheel.omega.signum();
    }

    wheel.grounded = contact.grounded && !wheel.detached;
    if !wheel.grounded {
        wheel.forward_slip = 0.0;
        wheel.sideways_slip = 0.0;
        return None;
    }
    wheel.ground_material = contact.surface;

    let (forward, side) = steering::steered_basis(chassis_rot, wheel.steer_angle);
    let v_long = contact.point_velocity.dot(&forward);
    let v_lat = contact.point_velocity.dot(&side);
    let radius = wheel.radius();

    wheel.forward_slip = ((wheel.omega * radius - v_long)
        / v_long.abs().max(SLIP_SPEED_FLOOR))
    .clamp(-SLIP_CLAMP, SLIP_CLAMP);
    wheel.sideways_slip = v_lat.atan2(v_long.abs().max(0.5));

    let fz = contact.normal_force.max(0.0);
    if fz < 1.0 {
        return None;
    }

    let mut f_long =
        friction::evaluate(&wheel.friction.forward, wheel.forward_slip)
            * wheel.forward_slip.signum()
            * fz;
    let mut f_lat = -friction::evaluate(&wheel.friction.sideways, wheel.sideways_slip)
        * wheel.sideways_slip.signum()
        * fz;

    // Combined-slip friction ellipse: shrink both channels together once the
    // demanded force exceeds the circle of available grip.
    let max_long =
        (wheel.friction.forward.extremum_value * wheel.friction.forward.stiffness * fz).max(1e-6);
    let max_lat =
        (wheel.friction.sideways.extremum_value * wheel.friction.sideways.stiffness * fz)
            .max(1e-6);
    let nx = f_long / max_long;
    let ny = f_lat / max_lat;
    let ellipse = nx * nx + ny * ny;
    if ellipse > 1.0 {
        let scale = 1.0 / ellipse.sqrt();
        f_long *= scale;
        f_lat *= scale;
    }

    // Reaction on the spin axis, then rolling coupling pulls omega toward
    // ground speed at a rate scaled by how hard the tire is gripping.
    wheel.omega -= f_long * radius / wheel.spec.inertia * dt;
    let coupling = 1.0 - (-ROLLING_COUPLING_RATE * dt).exp();
    wheel.omega += (v_long / radius.max(1e-3) - wheel.omega) * coupling;

    Some(WheelForce {
        force: forward * f_long + side * f_lat,
        at_point: contact.point,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{BehaviorProfile, VehicleSettings};

    fn rear_wheel() -> Wheel {
        let settings = VehicleSettings::gt86();
        let profile = BehaviorProfile::default();
        let spec = settings
            .wheels
            .iter()
            .find(|w| w.powered)
            .copied()
            .expect("gt86 has powered wheels");
        Wheel::new(spec, &profile)
    }

    fn rolling_contact(v_long: f32, v_lat: f32) -> WheelContact {
        WheelContact {
            grounded: true,
            point: Point3::new(0.0, 0.0, 0.0),
            normal: Vector3::new(0.0, 1.0, 0.0),
            // chassis forward is -Z at identity rotation
            point_velocity: Vector3::new(v_lat, 0.0, -v_long),
            normal_force: 3300.0,
            surface: 0,
        }
    }

    #[test]
    fn airborne_wheel_produces_no_force_and_spins_free() {
        let mut w = rear_wheel();
        w.motor_torque = 300.0;
        let out = solve_wheel_force(
            &mut w,
            &WheelContact::airborne(),
            &UnitQuaternion::identity(),
            0.02,
        );
        assert!(out.is_none());
        assert!(w.omega > 0.0);
        assert_eq!(w.forward_slip, 0.0);
    }

    #[test]
    fn drive_torque_pushes_forward() {
        let mut w = rear_wheel();
        let rot = UnitQuaternion::identity();
        let contact = rolling_contact(2.0, 0.0);
        w.omega = 2.0 / w.radius();
        w.motor_torque = 400.0;

        let f = solve_wheel_force(&mut w, &contact, &rot, 0.02).expect("grounded");
        // forward is -Z
        assert!(f.force.z < 0.0, "force {:?}", f.force);
        assert!(w.forward_slip > 0.0);
    }

    #[test]
    fn lateral_velocity_is_opposed() {
        let mut w = rear_wheel();
        let rot = UnitQuaternion::identity();
        let contact = rolling_contact(10.0, 3.0);
        w.omega = 10.0 / w.radius();

        let f = solve_wheel_force(&mut w, &contact, &rot, 0.02).expect("grounded");
        // side (right) is +X at identity; sliding right must push left
        assert!(f.force.x < 0.0, "force {:?}", f.force);
        assert!(w.sideways_slip > 0.0);
    }

    #[test]
    fn brake_can_lock_the_wheel() {
        let mut w = rear_wheel();
        w.omega = 5.0;
        w.brake_torque = 10_000.0;
        solve_wheel_force(
            &mut w,
            &WheelContact::airborne(),
            &UnitQuaternion::identity(),
            0.02,
        );
        assert_eq!(w.omega, 0.0);
    }

    #[test]
    fn grounded_braking_holds_slip_at_the_grip_limit() {
        let mut w = rear_wheel();
        let rot = UnitQuaternion::identity();
        let contact = rolling_contact(20.0, 0.0);
        w.omega = 20.0 / w.radius();
        w.brake_torque = 10_000.0;

        let f = solve_wheel_force(&mut w, &contact, &rot, 0.02).expect("grounded");
        // braking while moving forward (-Z) pushes the chassis back (+Z)
        assert!(f.force.z > 0.0, "force {:?}", f.force);
        assert!(w.forward_slip < 0.0);
        assert!(w.forward_slip > -1.0, "slip saturated: {}", w.forward_slip);
        assert!(w.omega > 0.0, "wheel locked despite the grip clamp");
    }

    #[test]
    fn combined_demand_stays_on_the_friction_ellipse() {
        let mut w = rear_wheel();
        let rot = UnitQuaternion::identity();
        // heavy wheelspin and a large slip angle at once
        let contact = rolling_contact(8.0, 6.0);
        w.omega = 30.0 / w.radius();
        w.motor_torque = 2000.0;

        let f = solve_wheel_force(&mut w, &contact, &rot, 0.02).expect("grounded");
        let fz = contact.normal_force;
        let cap = (w.friction.forward.extremum_value * w.friction.forward.stiffness * fz)
            .max(w.friction.sideways.extremum_value * w.friction.sideways.stiffness * fz);
        assert!(
            f.force.norm() <= cap * 1.01,
            "force {} exceeds grip cap {}",
            f.force.norm(),
            cap
        );
    }

    #[test]
    fn deflated_tire_has_smaller_radius() {
        let mut w = rear_wheel();
        let full = w.radius();
        w.deflated = true;
        assert!(w.radius() < full);
    }

    #[test]
    fn rolling_coupling_converges_spin_to_ground_speed() {
        let mut w = rear_wheel();
        let rot = UnitQuaternion::identity();
        let contact = rolling_contact(15.0, 0.0);
        w.omega = 0.0;
        for _ in 0..100 {
            solve_wheel_force(&mut w, &contact, &rot, 0.02);
        }
        let target = 15.0 / w.radius();
        assert!(
            (w.omega - target).abs() / target < 0.05,
            "omega {} vs target {target}",
            w.omega
        );
    }
}
