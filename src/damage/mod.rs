// ==============================================================================
// damage — COLLISION DEFORMATION AND REPAIR
// ==============================================================================
// Everything runs in chassis-local space. The rigid-body layer converts its
// contact events with CollisionEvent::from_world() and queues them; the
// owner drains the queue once per tick with process_queued().
//
// Impulse normalization:
//   norm = (|impulse| / reference_impulse) * (reference_mass / mass)
// clamped to 0..10 so a single absurd contact cannot fold the mesh.
//
// A vertex within damage_radius of the contact moves by
//   norm * (1 - d/radius) * damage_multiplier
// along the local impulse direction, and its total displacement from the
// original position is capped at maximum_damage. Wheels, constrained parts
// and lights take the same falloff against their own radii and thresholds.
// ==============================================================================

pub mod octree;

use std::collections::VecDeque;

use log::warn;
use nalgebra::{Point3, UnitQuaternion, Vector3};

use crate::error::DamageError;
use crate::settings::{DamageSettings, RepairMode};
use octree::Octree;

/// A collision already transformed into chassis-local space.
#[derive(Debug, Clone, Copy)]
pub struct CollisionEvent {
    pub local_point: Point3<f32>,
    pub local_impulse: Vector3<f32>,
}

impl CollisionEvent {
    /// Localize a world-space contact against the chassis pose.
    pub fn from_world(
        world_point: Point3<f32>,
        world_impulse: Vector3<f32>,
        position: Point3<f32>,
        rotation: UnitQuaternion<f32>,
    ) -> Self {
        let inv = rotation.inverse();
        Self {
            local_point: inv * (world_point - position.coords),
            local_impulse: inv * world_impulse,
        }
    }
}

/// One deformable render mesh. `readable` mirrors the asset pipeline flag:
/// meshes imported without CPU-side vertex access cannot deform and are
/// skipped (and counted) by the damage pass.
#[derive(Debug, Clone)]
pub struct DeformableMesh {
    pub original: Vec<Point3<f32>>,
    pub current: Vec<Point3<f32>>,
    pub readable: bool,
    /// Set whenever `current` changed; the renderer clears it after upload.
    pub dirty: bool,
    index: Option<Octree>,
}

impl DeformableMesh {
    pub fn new(vertices: Vec<Point3<f32>>) -> Self {
        Self {
            original: vertices.clone(),
            current: vertices,
            readable: true,
            dirty: false,
            index: None,
        }
    }

    pub fn unreadable(vertex_count: usize) -> Self {
        let vertices = vec![Point3::origin(); vertex_count];
        Self {
            readable: false,
            ..Self::new(vertices)
        }
    }

    pub fn max_displacement(&self) -> f32 {
        self.original
            .iter()
            .zip(&self.current)
            .map(|(o, c)| (c - o).norm())
            .fold(0.0, f32::max)
    }
}

/// Pose damage for one wheel. Offsets are chassis-local, added to the
/// attachment point by the pose readback.
#[derive(Debug, Clone, Copy)]
pub struct WheelDamage {
    pub attach_point: Point3<f32>,
    pub offset: Vector3<f32>,
    pub deflated: bool,
    pub detached: bool,
}

impl WheelDamage {
    pub fn new(attach_point: Point3<f32>) -> Self {
        Self {
            attach_point,
            offset: Vector3::zeros(),
            deflated: false,
            detached: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartState {
    #[default]
    Locked,
    /// Constraint axes freed, the part flaps but stays attached.
    Loose,
    Detached,
}

/// A constrained detachable part (hood, doors, bumpers).
#[derive(Debug, Clone)]
pub struct Part {
    pub name: String,
    pub local_point: Point3<f32>,
    /// 1 intact .. 0 destroyed.
    pub strength: f32,
    pub state: PartState,
}

impl Part {
    pub fn new(name: impl Into<String>, local_point: Point3<f32>) -> Self {
        Self {
            name: name.into(),
            local_point,
            strength: 1.0,
            state: PartState::Locked,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Light {
    pub name: String,
    pub local_point: Point3<f32>,
    pub strength: f32,
    pub broken: bool,
}

impl Light {
    pub fn new(name: impl Into<String>, local_point: Point3<f32>) -> Self {
        Self {
            name: name.into(),
            local_point,
            strength: 1.0,
            broken: false,
        }
    }
}

/// What one damage pass did, for event publication and logging.
#[derive(Debug, Clone, Default)]
pub struct DamageReport {
    pub events_processed: usize,
    pub vertices_moved: usize,
    /// Wheel indices that crossed the detach threshold this pass.
    pub wheels_detached: Vec<usize>,
    pub parts_loosened: Vec<usize>,
    pub parts_detached: Vec<usize>,
    pub lights_broken: Vec<usize>,
    /// Aggregated skip diagnostic, at most one per pass.
    pub diagnostic: Option<DamageError>,
}

#[derive(Debug, Clone)]
pub struct DeformationEngine {
    settings: DamageSettings,
    mass: f32, // kg, for impulse normalization
    pub meshes: Vec<DeformableMesh>,
    pub wheels: Vec<WheelDamage>,
    pub parts: Vec<Part>,
    pub lights: Vec<Light>,
    queue: VecDeque<CollisionEvent>,
    repaired: bool,
}

impl DeformationEngine {
    pub fn new(settings: DamageSettings, mass: f32) -> Self {
        Self {
            settings,
            mass: mass.max(1.0),
            meshes: Vec::new(),
            wheels: Vec::new(),
            parts: Vec::new(),
            lights: Vec::new(),
            queue: VecDeque::new(),
            repaired: true,
        }
    }

    pub fn settings(&self) -> &DamageSettings {
        &self.settings
    }

    pub fn mesh(&self, index: usize) -> Result<&DeformableMesh, DamageError> {
        self.meshes.get(index).ok_or(DamageError::InvalidMeshIndex {
            index,
            count: self.meshes.len(),
        })
    }

    /// Closest original vertex of a mesh to a chassis-local point.
    ///
    /// Requires that mesh's spatial index, which is built lazily by the first
    /// damage pass touching it.
    pub fn nearest_vertex(
        &self,
        mesh_index: usize,
        point: &Point3<f32>,
    ) -> Result<(u32, f32), DamageError> {
        let mesh = self.mesh(mesh_index)?;
        let index = mesh
            .index
            .as_ref()
            .ok_or(DamageError::OctreeUninitialized(mesh_index))?;
        index
            .nearest(point)
            .ok_or(DamageError::OctreeUninitialized(mesh_index))
    }

    pub fn queue_collision(&mut self, event: CollisionEvent) {
        if !self.settings.enabled {
            return;
        }
        // A zero impulse is the caller's "no contact" sentinel; queueing it
        // is a misuse upstream, not a damage event.
        if event.local_impulse.norm_squared() < 1e-8 {
            warn!("collision event with zero impulse dropped (sentinel misuse?)");
            return;
        }
        self.queue.push_back(event);
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_damaged(&self) -> bool {
        !self.repaired
    }

    /// Drain the collision queue and apply deformation, wheel pose damage,
    /// part weakening and light breakage.
    pub fn process_queued(&mut self) -> DamageReport {
        let mut report = DamageReport::default();
        if !self.settings.enabled {
            self.queue.clear();
            return report;
        }

        let mut skipped_meshes = 0usize;
        while let Some(event) = self.queue.pop_front() {
            report.events_processed += 1;
            self.repaired = false;

            let norm = (event.local_impulse.norm() / self.settings.reference_impulse.max(1.0)
                * (self.settings.reference_mass / self.mass))
                .clamp(0.0, 10.0);
            let dir = event.local_impulse.normalize();

            if self.settings.mesh_deform {
                skipped_meshes = 0;
                for mesh in self.meshes.iter_mut() {
                    if !mesh.readable {
                        skipped_meshes += 1;
                        continue;
                    }
                    report.vertices_moved += deform_mesh(mesh, &self.settings, &event, norm, dir);
                }
            }

            self.apply_wheel_damage(&event, norm, dir, &mut report);
            self.apply_part_damage(&event, norm, &mut report);
            self.apply_light_damage(&event, norm, &mut report);
        }

        if skipped_meshes > 0 {
            let diag = DamageError::UnreadableMeshes(skipped_meshes);
            warn!("{diag}");
            report.diagnostic = Some(diag);
        }
        report
    }

    fn apply_wheel_damage(
        &mut self,
        event: &CollisionEvent,
        norm: f32,
        dir: Vector3<f32>,
        report: &mut DamageReport,
    ) {
        let radius = self.settings.wheel_damage_radius;
        for (i, wheel) in self.wheels.iter_mut().enumerate() {
            if wheel.detached {
                continue;
            }
            let d = (event.local_point - wheel.attach_point).norm();
            if d >= radius {
                continue;
            }
            let falloff = 1.0 - d / radius;
            wheel.offset += dir * (norm * falloff * self.settings.damage_multiplier * 0.1);

            if wheel.offset.norm() > self.settings.maximum_wheel_damage {
                if self.settings.wheel_detach_enabled {
                    wheel.detached = true;
                    report.wheels_detached.push(i);
                } else {
                    // Hold at the cap, tire gives out instead.
                    wheel.offset = wheel.offset.normalize() * self.settings.maximum_wheel_damage;
                    wheel.deflated = true;
                }
            }
        }
    }

    fn apply_part_damage(&mut self, event: &CollisionEvent, norm: f32, report: &mut DamageReport) {
        let radius = self.settings.damage_radius;
        for (i, part) in self.parts.iter_mut().enumerate() {
            if part.state == PartState::Detached {
                continue;
            }
            let d = (event.local_point - part.local_point).norm();
            if d >= radius {
                continue;
            }
            part.strength = (part.strength - norm * (1.0 - d / radius)).max(0.0);

            if part.strength < self.settings.part_detach_point {
                part.state = PartState::Detached;
                report.parts_detached.push(i);
            } else if part.strength < self.settings.part_loose_point
                && part.state == PartState::Locked
            {
                part.state = PartState::Loose;
                report.parts_loosened.push(i);
            }
        }
    }

    fn apply_light_damage(&mut self, event: &CollisionEvent, norm: f32, report: &mut DamageReport) {
        let radius = self.settings.damage_radius;
        for (i, light) in self.lights.iter_mut().enumerate() {
            if light.broken {
                continue;
            }
            let d = (event.local_point - light.local_point).norm();
            if d >= radius {
                continue;
            }
            light.strength = (light.strength - norm * (1.0 - d / radius)).max(0.0);
            if light.strength < self.settings.light_break_point {
                light.broken = true;
                report.lights_broken.push(i);
            }
        }
    }

    /// Advance repair one update. Returns true when the vehicle snapped back
    /// to pristine this call.
    pub fn repair(&mut self, dt: f32) -> bool {
        if self.repaired {
            return false;
        }

        // Constrained parts and lights come back whole on the first request;
        // only meshes and wheel poses interpolate toward pristine.
        for part in self.parts.iter_mut() {
            part.strength = 1.0;
            part.state = PartState::Locked;
        }
        for light in self.lights.iter_mut() {
            light.strength = 1.0;
            light.broken = false;
        }

        let step = match self.settings.repair_mode {
            RepairMode::TimeScaled => None,
            RepairMode::FixedStep => Some(self.settings.repair_rate),
        };
        let lerp = (self.settings.repair_rate * dt).clamp(0.0, 1.0);

        let mut residual = 0.0f32;
        for mesh in self.meshes.iter_mut().filter(|m| m.readable) {
            let mut moved = false;
            for (c, o) in mesh.current.iter_mut().zip(&mesh.original) {
                let delta = o - *c;
                let n = delta.norm();
                if n == 0.0 {
                    continue;
                }
                moved = true;
                match step {
                    Some(s) if n > s => *c += delta / n * s,
                    Some(_) => *c = *o,
                    None => *c += delta * lerp,
                }
                residual = residual.max((o - *c).norm());
            }
            mesh.dirty |= moved;
        }

        for wheel in self.wheels.iter_mut() {
            let n = wheel.offset.norm();
            match step {
                Some(s) if n > s => wheel.offset -= wheel.offset / n * s,
                Some(_) => wheel.offset = Vector3::zeros(),
                None => wheel.offset *= 1.0 - lerp,
            }
            residual = residual.max(wheel.offset.norm());
        }

        if residual < self.settings.repair_epsilon {
            self.snap_to_pristine();
            return true;
        }
        false
    }

    fn snap_to_pristine(&mut self) {
        for mesh in self.meshes.iter_mut() {
            if mesh.current != mesh.original {
                mesh.dirty = true;
            }
            mesh.current.clone_from(&mesh.original);
        }
        for wheel in self.wheels.iter_mut() {
            wheel.offset = Vector3::zeros();
            wheel.deflated = false;
            wheel.detached = false;
        }
        for part in self.parts.iter_mut() {
            part.strength = 1.0;
            part.state = PartState::Locked;
        }
        for light in self.lights.iter_mut() {
            light.strength = 1.0;
            light.broken = false;
        }
        self.repaired = true;
    }
}

/// Displace one mesh's vertices around a contact. Returns how many moved.
fn deform_mesh(
    mesh: &mut DeformableMesh,
    settings: &DamageSettings,
    event: &CollisionEvent,
    norm: f32,
    dir: Vector3<f32>,
) -> usize {
    if mesh.index.is_none() {
        mesh.index = Some(Octree::from_points(&mesh.original));
    }
    let index = mesh.index.as_ref().expect("built above");

    let mut hits = Vec::new();
    index.within_radius(&event.local_point, settings.damage_radius, &mut hits);
    if hits.is_empty() {
        return 0;
    }

    let mut moved = 0;
    for &vi in &hits {
        let vi = vi as usize;
        let original = mesh.original[vi];
        let d = (original - event.local_point).norm();
        let falloff = 1.0 - d / settings.damage_radius;
        let delta = dir * (norm * falloff * settings.damage_multiplier);

        let mut displaced = mesh.current[vi] + delta;
        let total = displaced - original;
        let n = total.norm();
        if n > settings.maximum_damage {
            displaced = original + total / n * settings.maximum_damage;
        }
        if displaced != mesh.current[vi] {
            mesh.current[vi] = displaced;
            moved += 1;
        }
    }
    if moved > 0 {
        mesh.dirty = true;
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel_mesh() -> DeformableMesh {
        // a 1x1 front panel at z = -2, 11x11 grid
        let mut verts = Vec::new();
        for i in 0..11 {
            for j in 0..11 {
                verts.push(Point3::new(
                    -0.5 + i as f32 * 0.1,
                    j as f32 * 0.1,
                    -2.0,
                ));
            }
        }
        DeformableMesh::new(verts)
    }

    fn engine() -> DeformationEngine {
        let mut e = DeformationEngine::new(DamageSettings::default(), 1350.0);
        e.meshes.push(panel_mesh());
        e.wheels.push(WheelDamage::new(Point3::new(-0.75, -0.3, -1.25)));
        e.wheels.push(WheelDamage::new(Point3::new(0.75, -0.3, -1.25)));
        e.parts.push(Part::new("hood", Point3::new(0.0, 0.5, -1.6)));
        e.lights.push(Light::new("head_l", Point3::new(-0.5, 0.3, -2.0)));
        e
    }

    fn frontal_hit(impulse: f32) -> CollisionEvent {
        CollisionEvent {
            local_point: Point3::new(0.0, 0.5, -2.0),
            // head-on: impulse pushes the nose back along +Z
            local_impulse: Vector3::new(0.0, 0.0, impulse),
        }
    }

    #[test]
    fn vertices_move_with_radial_falloff() {
        let mut e = engine();
        e.queue_collision(frontal_hit(9000.0));
        let report = e.process_queued();
        assert!(report.vertices_moved > 0);
        assert!(e.is_damaged());

        let mesh = e.mesh(0).unwrap();
        // vertex at the contact point vs one near the radius edge
        let center = mesh.original.iter().position(|p| {
            (p - Point3::new(0.0, 0.5, -2.0)).norm() < 1e-4
        });
        let center = center.expect("grid contains the contact point");
        let edge = mesh
            .original
            .iter()
            .position(|p| (p - Point3::new(0.0, 0.5, -2.0)).norm() > 0.65)
            .expect("grid reaches past 0.65 m");

        let center_disp = (mesh.current[center] - mesh.original[center]).norm();
        let edge_disp = (mesh.current[edge] - mesh.original[edge]).norm();
        assert!(center_disp > edge_disp);
        // reference impulse on reference mass: norm = 1, full falloff at center
        assert!(
            (center_disp - e.settings().maximum_damage).abs() < 1e-3
                || center_disp <= e.settings().maximum_damage + 1e-5
        );
    }

    #[test]
    fn displacement_never_exceeds_maximum_damage() {
        let mut e = engine();
        for _ in 0..20 {
            e.queue_collision(frontal_hit(50_000.0));
        }
        e.process_queued();
        assert!(e.mesh(0).unwrap().max_displacement() <= e.settings().maximum_damage + 1e-5);
    }

    #[test]
    fn unreadable_meshes_are_skipped_and_aggregated() {
        let mut e = engine();
        e.meshes.push(DeformableMesh::unreadable(100));
        e.meshes.push(DeformableMesh::unreadable(50));
        e.queue_collision(frontal_hit(9000.0));
        let report = e.process_queued();
        assert_eq!(report.diagnostic, Some(DamageError::UnreadableMeshes(2)));
    }

    #[test]
    fn zero_impulse_events_are_dropped() {
        let mut e = engine();
        e.queue_collision(CollisionEvent {
            local_point: Point3::origin(),
            local_impulse: Vector3::zeros(),
        });
        assert_eq!(e.queued(), 0);
    }

    #[test]
    fn wheel_detaches_past_the_pose_cap() {
        let mut e = engine();
        // repeated hits right on the left wheel
        for _ in 0..10 {
            e.queue_collision(CollisionEvent {
                local_point: Point3::new(-0.75, -0.3, -1.25),
                local_impulse: Vector3::new(9000.0, 0.0, 0.0),
            });
        }
        let report = e.process_queued();
        assert!(report.wheels_detached.contains(&0));
        assert!(e.wheels[0].detached);
        assert!(!e.wheels[1].detached, "far wheel untouched");
    }

    #[test]
    fn capped_wheel_deflates_when_detach_is_disabled() {
        let mut settings = DamageSettings::default();
        settings.wheel_detach_enabled = false;
        let mut e = DeformationEngine::new(settings, 1350.0);
        e.wheels.push(WheelDamage::new(Point3::new(-0.75, -0.3, -1.25)));
        for _ in 0..10 {
            e.queue_collision(CollisionEvent {
                local_point: Point3::new(-0.75, -0.3, -1.25),
                local_impulse: Vector3::new(9000.0, 0.0, 0.0),
            });
        }
        e.process_queued();
        assert!(!e.wheels[0].detached);
        assert!(e.wheels[0].deflated);
        assert!(e.wheels[0].offset.norm() <= settings.maximum_wheel_damage + 1e-5);
    }

    #[test]
    fn parts_loosen_then_detach() {
        let mut e = engine();
        let hit = CollisionEvent {
            local_point: Point3::new(0.0, 0.5, -1.6),
            local_impulse: Vector3::new(0.0, 0.0, 5500.0),
        };
        e.queue_collision(hit);
        let r1 = e.process_queued();
        assert_eq!(e.parts[0].state, PartState::Loose);
        assert!(r1.parts_loosened.contains(&0));

        e.queue_collision(hit);
        e.queue_collision(hit);
        let r2 = e.process_queued();
        assert_eq!(e.parts[0].state, PartState::Detached);
        assert!(r2.parts_detached.contains(&0));
    }

    #[test]
    fn lights_break_past_the_threshold() {
        let mut e = engine();
        e.queue_collision(CollisionEvent {
            local_point: Point3::new(-0.5, 0.3, -2.0),
            local_impulse: Vector3::new(0.0, 0.0, 6000.0),
        });
        let report = e.process_queued();
        assert!(e.lights[0].broken);
        assert!(report.lights_broken.contains(&0));
    }

    #[test]
    fn time_scaled_repair_converges_and_snaps_clean() {
        let mut e = engine();
        e.queue_collision(frontal_hit(9000.0));
        e.process_queued();
        assert!(e.is_damaged());

        let mut done = false;
        for _ in 0..800 {
            if e.repair(0.02) {
                done = true;
                break;
            }
        }
        assert!(done, "repair never converged");
        assert!(!e.is_damaged());
        assert_eq!(e.mesh(0).unwrap().max_displacement(), 0.0);
        assert_eq!(e.parts[0].strength, 1.0);
        // repairing a pristine vehicle is a no-op
        assert!(!e.repair(0.02));
    }

    #[test]
    fn fixed_step_repair_restores_a_detached_wheel() {
        let mut settings = DamageSettings::default();
        settings.repair_mode = RepairMode::FixedStep;
        settings.repair_rate = 0.05;
        let mut e = DeformationEngine::new(settings, 1350.0);
        e.meshes.push(panel_mesh());
        e.wheels.push(WheelDamage::new(Point3::new(-0.75, -0.3, -1.25)));
        for _ in 0..10 {
            e.queue_collision(CollisionEvent {
                local_point: Point3::new(-0.75, -0.3, -1.25),
                local_impulse: Vector3::new(9000.0, 0.0, 0.0),
            });
        }
        e.process_queued();
        assert!(e.wheels[0].detached);

        let mut done = false;
        for _ in 0..100 {
            if e.repair(0.02) {
                done = true;
                break;
            }
        }
        assert!(done);
        assert!(!e.wheels[0].detached);
        assert_eq!(e.wheels[0].offset, Vector3::zeros());
    }

    #[test]
    fn nearest_vertex_needs_a_built_index() {
        let mut e = engine();
        assert!(matches!(
            e.nearest_vertex(0, &Point3::origin()),
            Err(DamageError::OctreeUninitialized(0))
        ));
        assert!(matches!(
            e.nearest_vertex(5, &Point3::origin()),
            Err(DamageError::InvalidMeshIndex { index: 5, count: 1 })
        ));

        e.queue_collision(frontal_hit(9000.0));
        e.process_queued(); // builds the index lazily
        let (_, d) = e
            .nearest_vertex(0, &Point3::new(0.0, 0.5, -2.0))
            .expect("index built");
        assert!(d < 1e-6);
    }
}
