// ==============================================================================
// bridge.rs — RAPIER RIGID-BODY BRIDGE
// ==============================================================================
// Owns the rapier world and runs the per-tick contract around Vehicle::step:
//
//   raycast suspension  -> WheelContact probes
//   Vehicle::step       -> TickCommands
//   apply commands      -> impulses on the chassis
//   pipeline.step       -> integrate
//   failsafe            -> reset exploded bodies
//
// Ground colliders carry their material index in collider user_data; terrain
// heightfields report splatmap channels the same way with the high bit set.
// Collision impulses are reported by the host (it sees the contact events)
// through report_collision(), which feeds the damage queue.
// ==============================================================================

use std::collections::HashMap;

use log::warn;
use rapier3d::prelude::*;

use crate::damage::CollisionEvent;
use crate::error::ConfigError;
use crate::events::{EventHub, LifecycleEvent, VehicleId};
use crate::input::DriverInput;
use crate::settings::{BehaviorProfile, GroundMaterialTable, SimSettings, VehicleSettings};
use crate::vehicle::{BodyFrame, TickCommands, TickContext, Vehicle};
use crate::wheel::WheelContact;

/// Terrain colliders set this bit; the low bits are then a splat channel
/// instead of a direct material index.
pub const TERRAIN_SURFACE_BIT: u128 = 1 << 63;

/// Per-wheel suspension parameters, derived from static sag at spawn.
#[derive(Debug, Clone, Copy)]
struct Suspension {
    rest_length: f32,
    max_length: f32,
    stiffness: f32, // N/m
    damping: f32,   // N*s/m
}

/// Spring constant and damping from target static sag and damping ratio.
fn suspension_from_sag(vehicle_mass: f32, wheels: usize, sag_m: f32, zeta: f32) -> (f32, f32) {
    let m = vehicle_mass / wheels.max(1) as f32;
    let f_static = m * 9.81;
    let k = f_static / sag_m.max(1e-3);
    let c = 2.0 * zeta * (k * m).sqrt();
    (k, c)
}

struct Entry {
    vehicle: Vehicle,
    body: RigidBodyHandle,
    suspension: Vec<Suspension>,
    input: DriverInput,
    /// Free bodies spawned for detached wheels, indexed like the wheels.
    detached_bodies: Vec<Option<RigidBodyHandle>>,
}

pub struct VehicleWorld {
    pub sim: SimSettings,
    pub profile: BehaviorProfile,
    pub grounds: GroundMaterialTable,

    gravity: Vector<Real>,
    pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd: CCDSolver,
    query_pipeline: QueryPipeline,

    entries: HashMap<VehicleId, Entry>,
    pub events: EventHub,
}

impl VehicleWorld {
    pub fn new(sim: SimSettings, profile: BehaviorProfile, grounds: GroundMaterialTable) -> Self {
        let gravity = Vector::from(sim.gravity);
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        // Flat asphalt pad at y = 0 as the default floor.
        let ground = bodies.insert(
            RigidBodyBuilder::fixed()
                .translation(vector![0.0, -1.0, 0.0])
                .build(),
        );
        colliders.insert_with_parent(
            ColliderBuilder::cuboid(500.0, 1.0, 500.0)
                .friction(1.0)
                .restitution(0.0)
                .user_data(0)
                .build(),
            ground,
            &mut bodies,
        );

        Self {
            sim,
            profile,
            grounds,
            gravity,
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders,
            joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            entries: HashMap::new(),
            events: EventHub::default(),
        }
    }

    /// Add a static surface with an explicit ground material index.
    pub fn add_surface(&mut self, collider: ColliderBuilder, material: usize) -> ColliderHandle {
        self.colliders
            .insert(collider.user_data(material as u128).build())
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.entries.get(&id).map(|e| &e.vehicle)
    }

    pub fn vehicle_mut(&mut self, id: VehicleId) -> Option<&mut Vehicle> {
        self.entries.get_mut(&id).map(|e| &mut e.vehicle)
    }

    pub fn body_handle(&self, id: VehicleId) -> Option<RigidBodyHandle> {
        self.entries.get(&id).map(|e| e.body)
    }

    pub fn spawn_vehicle(
        &mut self,
        settings: VehicleSettings,
        position: [f32; 3],
    ) -> Result<VehicleId, ConfigError> {
        let vehicle = Vehicle::new(settings, &self.profile)?;
        let settings = &vehicle.settings;

        let rb = RigidBodyBuilder::dynamic()
            .translation(vector![position[0], position[1], position[2]])
            .linear_damping(0.08)
            .angular_damping(0.6)
            .ccd_enabled(true)
            .build();
        let body = self.bodies.insert(rb);

        let half_base = settings.steering.wheelbase * 0.5;
        let half_track = settings.steering.track_width * 0.5;
        let collider = ColliderBuilder::cuboid(half_track + 0.2, 0.35, half_base + 0.6)
            .density(settings.mass / (2.0 * half_track * 0.7 * 2.0 * half_base).max(0.5))
            .friction(0.0)
            .restitution(0.0)
            .build();
        self.colliders
            .insert_with_parent(collider, body, &mut self.bodies);

        let (k, c) = suspension_from_sag(settings.mass, settings.wheels.len(), 0.05, 0.9);
        let suspension = settings
            .wheels
            .iter()
            .map(|_| Suspension {
                rest_length: 0.5,
                max_length: 0.4,
                stiffness: k,
                damping: c,
            })
            .collect();

        let id = vehicle.id;
        let wheel_count = vehicle.wheels.len();
        self.entries.insert(
            id,
            Entry {
                vehicle,
                body,
                suspension,
                input: DriverInput::idle(),
                detached_bodies: vec![None; wheel_count],
            },
        );
        self.events.publish(LifecycleEvent::VehicleSpawned { id });
        Ok(id)
    }

    pub fn despawn_vehicle(&mut self, id: VehicleId) {
        let Some(entry) = self.entries.remove(&id) else {
            return;
        };
        self.bodies.remove(
            entry.body,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            true,
        );
        for handle in entry.detached_bodies.into_iter().flatten() {
            self.bodies.remove(
                handle,
                &mut self.island_manager,
                &mut self.colliders,
                &mut self.joints,
                &mut self.multibody_joints,
                true,
            );
        }
        self.events.publish(LifecycleEvent::VehicleDestroyed { id });
    }

    pub fn set_input(&mut self, id: VehicleId, input: DriverInput) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.input = input.clamped();
        }
    }

    /// Feed one chassis impact into the vehicle's damage queue.
    pub fn report_collision(
        &mut self,
        id: VehicleId,
        world_point: Point<Real>,
        world_impulse: Vector<Real>,
    ) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let Some(body) = self.bodies.get(entry.body) else {
            return;
        };
        let pos = body.position();
        entry.vehicle.damage.queue_collision(CollisionEvent::from_world(
            world_point,
            world_impulse,
            pos.translation.vector.into(),
            pos.rotation,
        ));
        self.events.publish(LifecycleEvent::CollisionOccurred {
            id,
            impulse: world_impulse.magnitude(),
        });
    }

    /// Advance repair on one vehicle by `dt`.
    pub fn repair_vehicle(&mut self, id: VehicleId, dt: f32) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        if entry.vehicle.repair(dt) {
            for handle in entry.detached_bodies.iter_mut() {
                if let Some(h) = handle.take() {
                    self.bodies.remove(
                        h,
                        &mut self.island_manager,
                        &mut self.colliders,
                        &mut self.joints,
                        &mut self.multibody_joints,
                        true,
                    );
                }
            }
        }
    }

    /// One fixed simulation tick.
    pub fn step(&mut self) {
        let dt = self.sim.fixed_dt;
        self.query_pipeline.update(&self.colliders);

        let ids: Vec<VehicleId> = self.entries.keys().copied().collect();
        for id in ids {
            let (frame, contacts) = {
                let entry = &self.entries[&id];
                let Some(body) = self.bodies.get(entry.body) else {
                    continue;
                };
                let frame = body_frame(body);
                let contacts = self.probe_contacts(entry, &frame);
                (frame, contacts)
            };

            let commands = {
                let ctx = TickContext {
                    dt,
                    profile: &self.profile,
                    grounds: &self.grounds,
                };
                let entry = self.entries.get_mut(&id).expect("id from keys");
                entry.vehicle.step(entry.input, &frame, &contacts, &ctx)
            };

            self.apply_commands(id, &frame, &contacts, &commands, dt);
            self.run_damage_pass(id);
        }

        let hooks = ();
        let mut collision_events = ();
        self.pipeline.step(
            &self.gravity,
            &IntegrationParameters {
                dt,
                ..IntegrationParameters::default()
            },
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.query_pipeline),
            &mut collision_events,
            &hooks,
        );

        self.reset_exploded_bodies();
        self.events.dispatch();
    }

    /// Suspension raycasts: one probe per wheel, spring + one-way damper
    /// normal force, material read from the hit collider's user_data.
    fn probe_contacts(&self, entry: &Entry, frame: &BodyFrame) -> Vec<WheelContact> {
        let Some(body) = self.bodies.get(entry.body) else {
            return vec![WheelContact::airborne(); entry.vehicle.wheels.len()];
        };
        let pos = body.position();
        let com = *body.center_of_mass();
        let filter = QueryFilter::default().exclude_rigid_body(entry.body);
        let down = vector![0.0, -1.0, 0.0];
        let up = vector![0.0, 1.0, 0.0];

        entry
            .vehicle
            .wheels
            .iter()
            .zip(&entry.suspension)
            .enumerate()
            .map(|(i, (wheel, susp))| {
                if wheel.detached {
                    return WheelContact::airborne();
                }
                // Pose damage shifts the attachment point.
                let damage = entry
                    .vehicle
                    .damage
                    .wheels
                    .get(i)
                    .map(|d| d.offset)
                    .unwrap_or_default();
                let radius = wheel.radius();
                let local = Point::from(wheel.spec.offset) + damage;
                let origin = pos * (local + vector![0.0, radius + 0.02, 0.0]);
                let max_dist = susp.rest_length + susp.max_length + radius;

                let ray = Ray::new(origin, down);
                let Some((collider, toi)) = self.query_pipeline.cast_ray(
                    &self.bodies,
                    &self.colliders,
                    &ray,
                    max_dist,
                    true,
                    filter,
                ) else {
                    return WheelContact::airborne();
                };
                if toi <= radius {
                    return WheelContact::airborne();
                }

                let suspension_length = toi - radius;
                let compression =
                    (susp.rest_length - suspension_length).clamp(0.0, susp.max_length);
                if compression <= 0.0 {
                    return WheelContact::airborne();
                }
                let hit_point = origin + down * toi;

                let r = hit_point.coords - com.coords;
                let point_velocity = frame.linvel + frame.angvel.cross(&r);
                let mut suspension_vel = point_velocity.dot(&up);
                if suspension_vel.abs() < 0.05 {
                    suspension_vel = 0.0;
                }
                // one-way damper: rebound is mostly free
                if suspension_vel > 0.0 {
                    suspension_vel *= 0.15;
                }

                let spring = susp.stiffness * compression;
                let damper =
                    (-susp.damping * suspension_vel).clamp(-spring * 0.6, spring * 0.6);
                let normal_force = (spring + damper).clamp(0.0, 25_000.0);

                let surface = self
                    .colliders
                    .get(collider)
                    .map(|c| decode_surface(c.user_data, &self.grounds))
                    .unwrap_or(0);

                WheelContact {
                    grounded: true,
                    point: hit_point,
                    normal: up,
                    point_velocity,
                    normal_force,
                    surface,
                }
            })
            .collect()
    }

    fn apply_commands(
        &mut self,
        id: VehicleId,
        frame: &BodyFrame,
        contacts: &[WheelContact],
        commands: &TickCommands,
        dt: f32,
    ) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let Some(body) = self.bodies.get_mut(entry.body) else {
            return;
        };

        // Suspension support first, then the tire forces the wheel model
        // produced against those loads.
        let up = vector![0.0, 1.0, 0.0];
        for contact in contacts.iter().filter(|c| c.grounded) {
            body.apply_impulse_at_point(up * (contact.normal_force * dt), contact.point, true);
        }
        for cmd in commands.wheels.iter() {
            if let Some(f) = cmd.force {
                body.apply_impulse_at_point(f.force * dt, f.at_point, true);
            }
        }

        if commands.yaw_torque != 0.0 {
            body.apply_torque_impulse(vector![0.0, commands.yaw_torque * dt, 0.0], true);
        }
        if commands.com_force != Vector::zeros() {
            body.apply_impulse(commands.com_force * dt, true);
        }

        // Heading blend: rotate planar velocity toward the facing direction.
        if commands.heading_blend > 0.0 {
            let linvel = *body.linvel();
            let planar = vector![linvel.x, 0.0, linvel.z];
            let speed = planar.magnitude();
            if speed > 1.0 {
                let facing = frame.forward() * frame.linvel.dot(&frame.forward()).signum();
                let blended = planar.lerp(&(facing * speed), commands.heading_blend);
                let blended = if blended.magnitude() > 1e-4 {
                    blended.normalize() * speed
                } else {
                    planar
                };
                body.set_linvel(vector![blended.x, linvel.y, blended.z], true);
            }
        }
    }

    /// Drain the vehicle's damage queue and realize the consequences in the
    /// rapier world (detached wheel bodies, severed assists).
    fn run_damage_pass(&mut self, id: VehicleId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        if entry.vehicle.damage.queued() == 0 {
            return;
        }
        let report = entry.vehicle.damage.process_queued();
        entry.vehicle.absorb_damage_report(&report);

        let detached: Vec<usize> = report.wheels_detached.clone();
        for wheel_index in detached {
            self.events
                .publish(LifecycleEvent::WheelDetached { id, wheel: wheel_index });
            self.spawn_detached_wheel(id, wheel_index);
        }
    }

    /// A detached wheel becomes a free dynamic body tumbling away from the
    /// chassis.
    fn spawn_detached_wheel(&mut self, id: VehicleId, wheel_index: usize) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let Some(wheel) = entry.vehicle.wheels.get(wheel_index) else {
            return;
        };
        let Some(body) = self.bodies.get(entry.body) else {
            return;
        };
        let pos = body.position();
        let world = pos * Point::from(wheel.spec.offset);
        let linvel = *body.linvel();
        let radius = wheel.spec.radius;

        let rb = RigidBodyBuilder::dynamic()
            .translation(world.coords)
            .linvel(linvel + vector![0.0, 1.5, 0.0])
            .build();
        let handle = self.bodies.insert(rb);
        self.colliders.insert_with_parent(
            ColliderBuilder::ball(radius)
                .density(60.0)
                .friction(0.9)
                .build(),
            handle,
            &mut self.bodies,
        );

        if let Some(entry) = self.entries.get_mut(&id) {
            if let Some(slot) = entry.detached_bodies.get_mut(wheel_index) {
                *slot = Some(handle);
            }
        }
    }

    /// NaN/teleport failsafe: park any exploded body back near the origin.
    fn reset_exploded_bodies(&mut self) {
        for (_, body) in self.bodies.iter_mut() {
            let pos = *body.translation();
            let bad = !pos.x.is_finite()
                || !pos.y.is_finite()
                || !pos.z.is_finite()
                || pos.x.abs() > 10_000.0
                || pos.y.abs() > 10_000.0
                || pos.z.abs() > 10_000.0;
            if bad {
                warn!("resetting exploded body from {pos:?}");
                body.set_translation(vector![0.0, 1.0, 0.0], true);
                body.set_linvel(vector![0.0, 0.0, 0.0], true);
                body.set_angvel(vector![0.0, 0.0, 0.0], true);
            }
        }
    }
}

fn body_frame(body: &RigidBody) -> BodyFrame {
    let pos = body.position();
    BodyFrame {
        position: pos.translation.vector.into(),
        rotation: pos.rotation,
        linvel: *body.linvel(),
        angvel: *body.angvel(),
        mass: body.mass(),
    }
}

/// Collider user_data -> ground material index, resolving terrain splat
/// channels through the table.
fn decode_surface(user_data: u128, grounds: &GroundMaterialTable) -> usize {
    if user_data & TERRAIN_SURFACE_BIT != 0 {
        let splat = (user_data & !TERRAIN_SURFACE_BIT) as usize;
        grounds
            .terrain_fallback
            .get(splat)
            .copied()
            .unwrap_or(splat)
    } else {
        user_data as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> VehicleWorld {
        VehicleWorld::new(
            SimSettings::default(),
            BehaviorProfile::default(),
            GroundMaterialTable::standard(),
        )
    }

    #[test]
    fn spawn_rejects_bad_configs_and_emits_events() {
        let mut w = world();
        let mut s = VehicleSettings::gt86();
        s.wheels.clear();
        assert!(w.spawn_vehicle(s, [0.0, 1.0, 0.0]).is_err());

        let id = w.spawn_vehicle(VehicleSettings::gt86(), [0.0, 1.0, 0.0]).unwrap();
        assert!(w.vehicle(id).is_some());
        assert_eq!(w.events.pending_len(), 1);

        w.despawn_vehicle(id);
        assert!(w.vehicle(id).is_none());
        assert_eq!(w.events.pending_len(), 2);
    }

    #[test]
    fn suspension_from_sag_is_consistent() {
        let (k, c) = suspension_from_sag(1350.0, 4, 0.05, 0.9);
        // per-wheel static load 1350/4*9.81 over 5 cm sag
        assert!((k - 1350.0 / 4.0 * 9.81 / 0.05).abs() < 1.0);
        assert!(c > 0.0);
    }

    #[test]
    fn decode_surface_resolves_terrain_channels() {
        let grounds = GroundMaterialTable::standard();
        assert_eq!(decode_surface(1, &grounds), 1);
        assert_eq!(decode_surface(TERRAIN_SURFACE_BIT, &grounds), 2); // splat 0 -> grass
        assert_eq!(decode_surface(TERRAIN_SURFACE_BIT | 1, &grounds), 3); // splat 1 -> sand
    }

    #[test]
    fn settled_vehicle_reports_grounded_contacts() {
        let mut w = world();
        let id = w.spawn_vehicle(VehicleSettings::gt86(), [0.0, 0.7, 0.0]).unwrap();
        for _ in 0..150 {
            w.step();
        }
        let entry = &w.entries[&id];
        let body = w.bodies.get(entry.body).unwrap();
        let frame = body_frame(body);
        let contacts = w.probe_contacts(entry, &frame);
        assert!(
            contacts.iter().filter(|c| c.grounded).count() >= 3,
            "vehicle should settle onto its suspension"
        );
        for c in contacts.iter().filter(|c| c.grounded) {
            assert!(c.normal_force > 0.0);
            assert_eq!(c.surface, 0);
        }
    }

    #[test]
    fn full_throttle_moves_the_car_forward() {
        let mut w = world();
        let id = w.spawn_vehicle(VehicleSettings::gt86(), [0.0, 0.7, 0.0]).unwrap();
        // settle first
        for _ in 0..100 {
            w.step();
        }
        let start = w.bodies[w.body_handle(id).unwrap()].translation().z;

        w.set_input(
            id,
            DriverInput {
                throttle: 1.0,
                ..DriverInput::default()
            },
        );
        for _ in 0..500 {
            w.step();
        }
        let end = w.bodies[w.body_handle(id).unwrap()].translation().z;
        // chassis forward is -Z
        assert!(
            end < start - 3.0,
            "vehicle should have driven forward: {start} -> {end}"
        );
        let v = w.vehicle(id).unwrap();
        assert!(v.state.speed > 1.0);
    }

    #[test]
    fn reported_collision_reaches_the_damage_model() {
        let mut w = world();
        let mut settings = VehicleSettings::gt86();
        settings.damage.wheel_detach_enabled = false;
        let id = w.spawn_vehicle(settings, [0.0, 0.7, 0.0]).unwrap();
        for _ in 0..50 {
            w.step();
        }
        let body = w.bodies[w.body_handle(id).unwrap()].position().clone();
        let nose = body * Point::from([0.0, 0.0, -2.0]);
        w.report_collision(id, nose, vector![0.0, 0.0, 9000.0]);
        w.step(); // damage pass runs inside the tick
        assert!(w.vehicle(id).unwrap().damage.is_damaged());
        assert_eq!(w.vehicle(id).unwrap().damage.queued(), 0);
    }
}
