// ==============================================================================
// vehicle.rs — VEHICLE AGGREGATE AND FIXED-TICK PIPELINE
// ==============================================================================
// One Vehicle owns its drivetrain, wheels, stability assists and damage
// model. step() runs the fixed intra-tick order against an immutable body
// snapshot and wheel contact probes supplied by the rigid-body layer:
//
//   1. clamp input, sample the chassis frame
//   2. drivetrain (engine / clutch / gearbox / fuel)
//   3. steering angles onto the steerable wheels
//   4. raw motor & brake torques onto the wheels
//   5. stability assists rewrite torques, emit yaw/heading corrections
//   6. friction moderation (surface, handbrake, helpers, drift)
//   7. per-wheel spin integration + tire forces
//
// The result is a TickCommands batch the rigid-body layer applies verbatim.
// ==============================================================================

use log::warn;
use nalgebra::{Point3, UnitQuaternion, Vector3};

use crate::assist::{AssistContext, AssistLayer};
use crate::damage::{DamageReport, DeformationEngine, WheelDamage};
use crate::drivetrain::DriveTrain;
use crate::error::ConfigError;
use crate::events::VehicleId;
use crate::input::DriverInput;
use crate::settings::{BehaviorProfile, GroundMaterialTable, VehicleSettings};
use crate::state::{Direction, VehicleState};
use crate::wheel::{self, Wheel, WheelContact, WheelForce};

/// Immutable chassis snapshot for one tick.
#[derive(Debug, Clone, Copy)]
pub struct BodyFrame {
    pub position: Point3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub linvel: Vector3<f32>,
    pub angvel: Vector3<f32>,
    pub mass: f32, // kg
}

impl BodyFrame {
    pub fn forward(&self) -> Vector3<f32> {
        self.rotation * Vector3::new(0.0, 0.0, -1.0)
    }

    pub fn right(&self) -> Vector3<f32> {
        self.forward().cross(&Vector3::new(0.0, 1.0, 0.0))
    }
}

/// Per-tick shared context: timestep, behavior profile, surface table.
#[derive(Clone, Copy)]
pub struct TickContext<'a> {
    pub dt: f32,
    pub profile: &'a BehaviorProfile,
    pub grounds: &'a GroundMaterialTable,
}

#[derive(Debug, Clone, Copy)]
pub struct WheelCommand {
    pub steer_angle: f32,
    /// Tire force at the contact point, `None` for airborne/detached wheels.
    pub force: Option<WheelForce>,
}

/// Everything the rigid-body layer must apply after one step().
#[derive(Debug, Clone, Default)]
pub struct TickCommands {
    pub wheels: Vec<WheelCommand>,
    /// Corrective torque about world up (N*m).
    pub yaw_torque: f32,
    /// Extra force at the COM (drift power slide).
    pub com_force: Vector3<f32>,
    /// Fraction to rotate linear velocity toward the facing direction.
    pub heading_blend: f32,
}

pub struct Vehicle {
    pub id: VehicleId,
    pub settings: VehicleSettings,
    pub state: VehicleState,
    pub drivetrain: DriveTrain,
    pub wheels: Vec<Wheel>,
    pub assists: AssistLayer,
    pub damage: DeformationEngine,
    /// Non-fatal configuration defects repaired at construction.
    defects: Vec<ConfigError>,
}

impl Vehicle {
    /// Build a vehicle. Unrecoverable configuration problems (no wheels, no
    /// powered wheels) fail here; repairable ones are fixed and retained for
    /// `defects()`.
    pub fn new(settings: VehicleSettings, profile: &BehaviorProfile) -> Result<Self, ConfigError> {
        if settings.wheels.is_empty() {
            return Err(ConfigError::MissingWheels);
        }
        let powered = settings.powered_wheel_count();
        if powered == 0 {
            return Err(ConfigError::NoPoweredWheels);
        }

        let (drivetrain, defects) = DriveTrain::new(&settings);
        let wheels: Vec<Wheel> = settings
            .wheels
            .iter()
            .map(|spec| Wheel::new(*spec, profile))
            .collect();

        let mut damage = DeformationEngine::new(settings.damage, settings.mass);
        for spec in &settings.wheels {
            damage
                .wheels
                .push(WheelDamage::new(Point3::from(spec.offset)));
        }

        let state = VehicleState::new(
            settings.fuel_capacity,
            powered,
            settings.engine.min_rpm,
        );

        Ok(Self {
            id: VehicleId::new(),
            settings,
            state,
            drivetrain,
            wheels,
            assists: AssistLayer::default(),
            damage,
            defects,
        })
    }

    pub fn defects(&self) -> &[ConfigError] {
        &self.defects
    }

    /// Average absolute spin of the attached powered wheels (rad/s).
    fn powered_omega_avg(&self) -> f32 {
        let mut sum = 0.0;
        let mut n = 0u32;
        for w in self.wheels.iter().filter(|w| w.spec.powered && !w.detached) {
            sum += w.omega.abs();
            n += 1;
        }
        if n == 0 { 0.0 } else { sum / n as f32 }
    }

    /// Advance the vehicle one fixed tick.
    ///
    /// `contacts` pairs with `wheels` by index; a short slice is treated as
    /// airborne for the missing wheels.
    pub fn step(
        &mut self,
        input: DriverInput,
        body: &BodyFrame,
        contacts: &[WheelContact],
        ctx: &TickContext,
    ) -> TickCommands {
        if contacts.len() != self.wheels.len() {
            warn!(
                "contact count {} != wheel count {}, padding as airborne",
                contacts.len(),
                self.wheels.len()
            );
        }

        // 1. input + chassis observations
        self.state.input = input.clamped();
        let forward = body.forward();
        self.state.speed = body.linvel.dot(&forward);

        // 2. drivetrain, fed last tick's powered wheel spin
        let powered_omega_avg = self.powered_omega_avg();
        self.drivetrain
            .update(&mut self.state, powered_omega_avg, ctx.dt);

        // 3. steering
        let (left_angle, right_angle) =
            wheel::steering::solve_steering(&self.settings.steering, self.state.input.steer);
        for w in self.wheels.iter_mut() {
            w.steer_angle = if w.spec.steerable {
                match w.side {
                    wheel::WheelSide::Left => left_angle,
                    wheel::WheelSide::Right => right_angle,
                }
            } else {
                0.0
            };
        }

        // 4. raw torques. In reverse the pedals swap: the brake pedal drives
        // backward (handled by the drivetrain demand) and the throttle pedal
        // brakes.
        let pedal_brake = match self.state.direction {
            Direction::Reverse => self.state.input.throttle.max(0.0),
            _ => self.state.input.brake,
        };
        let motor = self
            .drivetrain
            .wheel_motor_torque(&self.state, self.settings.boost_gain);
        for w in self.wheels.iter_mut() {
            w.motor_torque = if w.spec.powered {
                motor * w.spec.power_multiplier
            } else {
                0.0
            };
            let mut brake = if w.spec.braked {
                pedal_brake * self.settings.brake_force * w.spec.brake_multiplier
            } else {
                0.0
            };
            if w.spec.handbraked {
                brake += self.state.input.handbrake * self.settings.handbrake_force;
            }
            w.brake_torque = brake;
        }

        // 5. stability assists
        let drift_active = self
            .wheels
            .iter()
            .any(|w| w.friction.drift_relaxed(ctx.profile));
        let assist_ctx = AssistContext {
            linvel: body.linvel,
            forward,
            forward_speed: self.state.speed,
            yaw_rate: body.angvel.y,
            steer_input: self.state.input.steer,
            brake_input: pedal_brake,
            handbrake: self.state.input.handbrake,
            drift_active,
            esp_intact: self.state.esp_intact,
            brake_torque_ref: self.settings.brake_force,
            dt: ctx.dt,
        };
        let assist_out = self.assists.apply(
            &ctx.profile.assists,
            &mut self.wheels,
            ctx.grounds,
            &assist_ctx,
        );

        // 6. friction moderation + drift relaxation
        for w in self.wheels.iter_mut() {
            let ground = ctx.grounds.lookup(w.ground_material);
            let handbrake = if w.spec.handbraked {
                self.state.input.handbrake
            } else {
                0.0
            };
            w.friction
                .moderate(ctx.profile, ground, handbrake, w.traction_helped);
            let combined = w.combined_slip();
            w.friction
                .relax_for_drift(ctx.profile, &ctx.profile.drift, combined, ctx.dt);
        }

        // 7. wheel spin + tire forces
        let mut commands = TickCommands {
            wheels: Vec::with_capacity(self.wheels.len()),
            yaw_torque: assist_out.yaw_torque,
            com_force: Vector3::zeros(),
            heading_blend: assist_out.heading_blend,
        };
        for (i, w) in self.wheels.iter_mut().enumerate() {
            let contact = contacts.get(i).copied().unwrap_or(WheelContact::airborne());
            let force = wheel::solve_wheel_force(w, &contact, &body.rotation, ctx.dt);
            commands.wheels.push(WheelCommand {
                steer_angle: w.steer_angle,
                force,
            });
        }

        // Drift power slide, rear-drive only: with relaxation active and the
        // throttle pinned, push the COM along the steered side so the slide
        // holds instead of scrubbing off.
        let drift = &ctx.profile.drift;
        let rear_drive = self
            .wheels
            .iter()
            .all(|w| !w.spec.powered || !w.spec.steerable);
        if drift.enabled
            && drift_active
            && rear_drive
            && self.state.effective_throttle > drift.throttle_threshold
        {
            commands.com_force = body.right()
                * (self.state.input.steer
                    * self.state.effective_throttle
                    * drift.power_slide_force);
        }

        commands
    }

    /// Fold a damage pass back into the simulation state: detached wheels
    /// stop contributing forces and sever the stability system, capped
    /// wheels run deflated.
    pub fn absorb_damage_report(&mut self, report: &DamageReport) {
        for &i in &report.wheels_detached {
            if let Some(w) = self.wheels.get_mut(i) {
                w.detached = true;
            }
            self.state.esp_intact = false;
        }
        for (w, d) in self.wheels.iter_mut().zip(self.damage.wheels.iter()) {
            w.deflated = d.deflated;
        }
    }

    /// Advance repair; on completion wheels reattach and assists rearm.
    pub fn repair(&mut self, dt: f32) -> bool {
        let done = self.damage.repair(dt);
        if done {
            for (w, d) in self.wheels.iter_mut().zip(self.damage.wheels.iter()) {
                w.detached = d.detached;
                w.deflated = d.deflated;
            }
            self.state.esp_intact = true;
        }
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::damage::CollisionEvent;

    fn level_contacts(vehicle: &Vehicle, body: &BodyFrame) -> Vec<WheelContact> {
        let per_wheel = body.mass * 9.81 / vehicle.wheels.len() as f32;
        vehicle
            .settings
            .wheels
            .iter()
            .map(|spec| {
                let local = Vector3::from(spec.offset);
                WheelContact {
                    grounded: true,
                    point: body.position + body.rotation * local
                        - Vector3::new(0.0, spec.radius, 0.0),
                    normal: Vector3::new(0.0, 1.0, 0.0),
                    point_velocity: body.linvel,
                    normal_force: per_wheel,
                    surface: 0,
                }
            })
            .collect()
    }

    fn resting_body(mass: f32) -> BodyFrame {
        BodyFrame {
            position: Point3::new(0.0, 0.5, 0.0),
            rotation: UnitQuaternion::identity(),
            linvel: Vector3::zeros(),
            angvel: Vector3::zeros(),
            mass,
        }
    }

    fn vehicle() -> Vehicle {
        Vehicle::new(VehicleSettings::gt86(), &BehaviorProfile::default()).unwrap()
    }

    #[test]
    fn construction_rejects_wheelless_configs() {
        let mut s = VehicleSettings::gt86();
        s.wheels.clear();
        assert!(matches!(
            Vehicle::new(s, &BehaviorProfile::default()),
            Err(ConfigError::MissingWheels)
        ));

        let mut s = VehicleSettings::gt86();
        for w in s.wheels.iter_mut() {
            w.powered = false;
        }
        assert!(matches!(
            Vehicle::new(s, &BehaviorProfile::default()),
            Err(ConfigError::NoPoweredWheels)
        ));
    }

    #[test]
    fn launch_drives_the_powered_wheels_forward() {
        let mut v = vehicle();
        let body = resting_body(v.settings.mass);
        let contacts = level_contacts(&v, &body);
        let profile = BehaviorProfile::default();
        let grounds = GroundMaterialTable::standard();
        let ctx = TickContext {
            dt: 0.02,
            profile: &profile,
            grounds: &grounds,
        };

        let input = DriverInput {
            throttle: 1.0,
            ..DriverInput::default()
        };
        // first ticks engage first gear out of neutral (shift window)
        let mut commands = TickCommands::default();
        for _ in 0..60 {
            commands = v.step(input, &body, &contacts, &ctx);
        }
        assert_eq!(v.state.direction, Direction::Forward);

        let mut pushed = 0;
        for (cmd, w) in commands.wheels.iter().zip(&v.wheels) {
            if !w.spec.powered {
                continue;
            }
            let f = cmd.force.expect("powered wheel grounded");
            // chassis forward is -Z
            if f.force.z < -1.0 {
                pushed += 1;
            }
        }
        assert!(pushed > 0, "no powered wheel produced forward force");
    }

    #[test]
    fn steer_input_reaches_only_the_steerable_wheels() {
        let mut v = vehicle();
        let body = resting_body(v.settings.mass);
        let contacts = level_contacts(&v, &body);
        let profile = BehaviorProfile::default();
        let grounds = GroundMaterialTable::standard();
        let ctx = TickContext {
            dt: 0.02,
            profile: &profile,
            grounds: &grounds,
        };

        let input = DriverInput {
            steer: 1.0,
            ..DriverInput::default()
        };
        v.step(input, &body, &contacts, &ctx);

        for w in &v.wheels {
            if w.spec.steerable {
                assert!(w.steer_angle.abs() > 0.1);
            } else {
                assert_eq!(w.steer_angle, 0.0);
            }
        }
    }

    #[test]
    fn sustained_brake_at_rest_engages_reverse() {
        let mut v = vehicle();
        let body = resting_body(v.settings.mass);
        let contacts = level_contacts(&v, &body);
        let profile = BehaviorProfile::default();
        let grounds = GroundMaterialTable::standard();
        let ctx = TickContext {
            dt: 0.02,
            profile: &profile,
            grounds: &grounds,
        };

        let input = DriverInput {
            brake: 1.0,
            ..DriverInput::default()
        };
        for _ in 0..80 {
            v.step(input, &body, &contacts, &ctx);
        }
        assert_eq!(v.state.direction, Direction::Reverse);

        // In reverse the brake pedal drives: the powered wheels get negative
        // motor torque once the clutch bites.
        for _ in 0..40 {
            v.step(input, &body, &contacts, &ctx);
        }
        let motor: f32 = v
            .wheels
            .iter()
            .filter(|w| w.spec.powered)
            .map(|w| w.motor_torque)
            .sum();
        assert!(motor < 0.0, "reverse motor torque {motor}");
    }

    #[test]
    fn counter_spinning_wheels_do_not_cancel_in_the_drivetrain_feed() {
        let mut v = vehicle();
        v.wheels[2].omega = 30.0;
        v.wheels[3].omega = -30.0;
        assert_eq!(v.powered_omega_avg(), 30.0);
    }

    #[test]
    fn power_slide_assists_only_rear_drive_layouts() {
        let profile = BehaviorProfile::drift();
        let grounds = GroundMaterialTable::standard();
        let ctx = TickContext {
            dt: 0.02,
            profile: &profile,
            grounds: &grounds,
        };
        let input = DriverInput {
            throttle: 1.0,
            steer: 1.0,
            ..DriverInput::default()
        };

        let run = |settings: VehicleSettings| {
            let mut v = Vehicle::new(settings, &profile).unwrap();
            let body = resting_body(v.settings.mass);
            let contacts = level_contacts(&v, &body);
            for _ in 0..60 {
                v.step(input, &body, &contacts, &ctx);
            }
            // drop the lateral grip so drift relaxation engages
            for w in v.wheels.iter_mut() {
                w.friction.sideways.extremum_value = 0.5;
            }
            v.step(input, &body, &contacts, &ctx)
        };

        let rwd = run(VehicleSettings::gt86());
        assert!(rwd.com_force.norm() > 1.0, "rwd slide force {:?}", rwd.com_force);

        let awd = run(VehicleSettings::truck());
        assert_eq!(awd.com_force, Vector3::zeros());
    }

    #[test]
    fn short_contact_slice_is_padded_as_airborne() {
        let mut v = vehicle();
        let body = resting_body(v.settings.mass);
        let profile = BehaviorProfile::default();
        let grounds = GroundMaterialTable::standard();
        let ctx = TickContext {
            dt: 0.02,
            profile: &profile,
            grounds: &grounds,
        };
        let commands = v.step(DriverInput::idle(), &body, &[], &ctx);
        assert_eq!(commands.wheels.len(), v.wheels.len());
        assert!(commands.wheels.iter().all(|c| c.force.is_none()));
    }

    #[test]
    fn detached_wheel_severs_esp_until_repair() {
        let mut v = vehicle();
        let wheel_point = Point3::from(v.settings.wheels[0].offset);
        for _ in 0..10 {
            v.damage.queue_collision(CollisionEvent {
                local_point: wheel_point,
                local_impulse: Vector3::new(9000.0, 0.0, 0.0),
            });
        }
        let report = v.damage.process_queued();
        v.absorb_damage_report(&report);

        assert!(v.wheels[0].detached);
        assert!(!v.state.esp_intact);

        let mut done = false;
        for _ in 0..800 {
            if v.repair(0.02) {
                done = true;
                break;
            }
        }
        assert!(done);
        assert!(!v.wheels[0].detached);
        assert!(v.state.esp_intact);
    }
}
