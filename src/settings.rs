//! Simulation settings: behavior profiles, ground materials, vehicle
//! configuration and named presets.
//!
//! Everything here is plain data. Components receive references at
//! construction (no globals), so several simulations with different settings
//! can coexist in one process. Profiles are hot-swappable: they are read
//! fresh every tick through the `TickContext`.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Friction curve parameters
// ---------------------------------------------------------------------------

/// Four-parameter slip/grip curve: rises to (extremum_slip, extremum_value),
/// falls to (asymptote_slip, asymptote_value), flat past the asymptote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrictionCurveParams {
    pub extremum_slip: f32,
    pub extremum_value: f32,
    pub asymptote_slip: f32,
    pub asymptote_value: f32,
    /// Linear multiplier on the whole curve output.
    pub stiffness: f32,
}

impl Default for FrictionCurveParams {
    fn default() -> Self {
        Self {
            extremum_slip: 0.4,
            extremum_value: 1.0,
            asymptote_slip: 0.8,
            asymptote_value: 0.75,
            stiffness: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Ground materials
// ---------------------------------------------------------------------------

/// Per-surface friction parameters, keyed by surface type index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundMaterial {
    pub name: String,
    pub forward_stiffness: f32,  // scales longitudinal grip
    pub sideways_stiffness: f32, // scales lateral grip
    /// Combined-slip magnitude above which this surface counts as sliding
    /// (drives drift relaxation and skid consumers).
    pub slip_threshold: f32,
}

impl Default for GroundMaterial {
    fn default() -> Self {
        Self {
            name: "asphalt".into(),
            forward_stiffness: 1.0,
            sideways_stiffness: 1.0,
            slip_threshold: 0.25,
        }
    }
}

/// Surface lookup table with a terrain-splatmap fallback mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GroundMaterialTable {
    pub materials: Vec<GroundMaterial>,
    /// splat index -> material index, for terrain surfaces reported by the
    /// external collider layer as splatmap channels.
    pub terrain_fallback: Vec<usize>,
}

impl GroundMaterialTable {
    /// Default road set: asphalt, gravel, grass, sand.
    pub fn standard() -> Self {
        Self {
            materials: vec![
                GroundMaterial::default(),
                GroundMaterial {
                    name: "gravel".into(),
                    forward_stiffness: 0.75,
                    sideways_stiffness: 0.7,
                    slip_threshold: 0.3,
                },
                GroundMaterial {
                    name: "grass".into(),
                    forward_stiffness: 0.55,
                    sideways_stiffness: 0.5,
                    slip_threshold: 0.35,
                },
                GroundMaterial {
                    name: "sand".into(),
                    forward_stiffness: 0.4,
                    sideways_stiffness: 0.45,
                    slip_threshold: 0.4,
                },
            ],
            terrain_fallback: vec![2, 3],
        }
    }

    /// Material for a surface index. Unknown indices degrade to material 0
    /// with a warning, never fail.
    pub fn lookup(&self, surface: usize) -> &GroundMaterial {
        if let Some(m) = self.materials.get(surface) {
            return m;
        }
        log::warn!("unknown ground surface index {surface}, falling back to material 0");
        // materials is never empty for a validated table; guard anyway
        static FALLBACK: std::sync::OnceLock<GroundMaterial> = std::sync::OnceLock::new();
        self.materials
            .first()
            .unwrap_or_else(|| FALLBACK.get_or_init(GroundMaterial::default))
    }

    /// Terrain splat channel -> material, falling back like `lookup`.
    pub fn lookup_terrain(&self, splat: usize) -> &GroundMaterial {
        match self.terrain_fallback.get(splat) {
            Some(&idx) => self.lookup(idx),
            None => self.lookup(splat),
        }
    }
}

// ---------------------------------------------------------------------------
// Stability assists
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistSettings {
    pub abs_enabled: bool,
    pub tcs_enabled: bool,
    pub esp_enabled: bool,
    pub steering_helper_enabled: bool,
    pub traction_helper_enabled: bool,

    /// ABS trips when |forward slip| * brake fraction reaches this.
    pub abs_threshold: f32, // typical 0.3-0.5
    /// TCS torque attenuation per unit of forward slip.
    pub tcs_strength: f32, // typical 0.5-1.0
    /// Aggregate sideways slip that flags under/oversteer.
    pub esp_threshold: f32, // typical 0.4-0.6
    /// Scale on the corrective outer-wheel brake force.
    pub esp_strength: f32, // typical 0.1-0.5
    /// Corrective yaw torque per radian of heading error per m/s.
    pub steer_helper_angular: f32, // typical 0.05-0.2
    /// Per-tick linear-velocity heading blend when yaw is quiet.
    pub steer_helper_linear: f32, // typical 0.05-0.3
    /// Front sideways stiffness cut per rad/s of adverse yaw.
    pub traction_helper_strength: f32, // typical 0.1-0.4
}

impl Default for AssistSettings {
    fn default() -> Self {
        Self {
            abs_enabled: true,
            tcs_enabled: true,
            esp_enabled: true,
            steering_helper_enabled: true,
            traction_helper_enabled: true,
            abs_threshold: 0.35,
            tcs_strength: 0.6,
            esp_threshold: 0.5,
            esp_strength: 0.25,
            steer_helper_angular: 0.1,
            steer_helper_linear: 0.1,
            traction_helper_strength: 0.25,
        }
    }
}

// ---------------------------------------------------------------------------
// Drift mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftSettings {
    pub enabled: bool,
    /// Exponential relaxation rate toward the reduced targets (1/s).
    pub relaxation_rate: f32,
    /// Reduced curve targets approached while sliding.
    pub extremum_value_target: f32,
    pub asymptote_value_target: f32,
    /// Combined slip past which relaxation engages.
    pub slip_threshold: f32,
    /// Throttle above which the RWD power-slide force is injected.
    pub throttle_threshold: f32,
    /// Lateral power-slide force at the COM (N) at full throttle/slip.
    pub power_slide_force: f32,
}

impl Default for DriftSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            relaxation_rate: 2.5,
            extremum_value_target: 0.65,
            asymptote_value_target: 0.45,
            slip_threshold: 0.5,
            throttle_threshold: 0.6,
            power_slide_force: 3000.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Behavior profile
// ---------------------------------------------------------------------------

/// Swappable global driving-feel profile: friction curve defaults plus
/// assist/drift defaults. Supplied by the settings collaborator and read
/// through the tick context, so swapping it takes effect next tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorProfile {
    pub name: String,
    pub forward_curve: FrictionCurveParams,
    pub sideways_curve: FrictionCurveParams,
    pub assists: AssistSettings,
    pub drift: DriftSettings,
    /// Sideways stiffness multiplier applied while the handbrake is pulled.
    pub handbrake_sideways_mult: f32,
}

impl Default for BehaviorProfile {
    fn default() -> Self {
        Self {
            name: "balanced".into(),
            forward_curve: FrictionCurveParams::default(),
            sideways_curve: FrictionCurveParams {
                extremum_slip: 0.25,
                extremum_value: 1.0,
                asymptote_slip: 0.5,
                asymptote_value: 0.8,
                stiffness: 1.0,
            },
            assists: AssistSettings::default(),
            drift: DriftSettings::default(),
            handbrake_sideways_mult: 1.4,
        }
    }
}

impl BehaviorProfile {
    /// Loose, assist-light profile with drift relaxation on.
    pub fn drift() -> Self {
        Self {
            name: "drift".into(),
            assists: AssistSettings {
                esp_enabled: false,
                tcs_enabled: false,
                traction_helper_enabled: false,
                ..AssistSettings::default()
            },
            drift: DriftSettings {
                enabled: true,
                ..DriftSettings::default()
            },
            ..Self::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

// ---------------------------------------------------------------------------
// Engine / transmission / steering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub min_rpm: f32,        // idle
    pub max_rpm: f32,
    pub peak_torque: f32,    // N*m
    pub peak_torque_rpm: f32,
    /// Smoothing inertia for the raw RPM filter (bigger = lazier engine).
    pub inertia: f32,
    /// Headroom above max_rpm the raw value may briefly occupy.
    pub rpm_margin: f32,
    /// Fraction of max_rpm where the limiter cuts throttle.
    pub rev_limit_frac: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            min_rpm: 900.0,
            max_rpm: 7000.0,
            peak_torque: 350.0,
            peak_torque_rpm: 4800.0,
            inertia: 0.35,
            rpm_margin: 150.0,
            rev_limit_frac: 0.985,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReversePolicy {
    /// Reverse engages whenever brake is held and the car is near-stopped.
    Always,
    /// Additionally requires forward speed below the reverse speed gate.
    #[default]
    SpeedGated,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmissionSettings {
    pub gear_count: usize, // 1..=8
    pub final_drive: f32,
    pub shift_up_rpm: f32,
    pub shift_down_rpm: f32,
    /// Length of the changing-gear window (s) during which throttle is cut.
    pub shift_delay: f32,
    pub reverse_policy: ReversePolicy,
    /// Brake input that must be sustained to request reverse.
    pub reverse_brake_threshold: f32,
    /// Forward speed (m/s) under which reverse may engage.
    pub reverse_speed_gate: f32,
}

impl Default for TransmissionSettings {
    fn default() -> Self {
        Self {
            gear_count: 6,
            final_drive: 3.7,
            shift_up_rpm: 4400.0,
            shift_down_rpm: 2200.0,
            shift_delay: 0.35,
            reverse_policy: ReversePolicy::SpeedGated,
            reverse_brake_threshold: 0.6,
            reverse_speed_gate: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SteeringSettings {
    pub max_angle: f32,        // radians at the rack
    pub wheelbase: f32,        // meters
    pub track_width: f32,      // meters
    /// Reference length for the Ackermann approximation (usually close to
    /// the wheelbase; kept separate so tuning does not move the axles).
    pub reference_length: f32,
    /// Static toe angle added per side (radians, positive = toe-in).
    pub toe_angle: f32,
}

impl Default for SteeringSettings {
    fn default() -> Self {
        Self {
            max_angle: 0.6, // ~34 degrees
            wheelbase: 2.5,
            track_width: 1.5,
            reference_length: 2.55,
            toe_angle: 0.004,
        }
    }
}

// ---------------------------------------------------------------------------
// Wheels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WheelSpec {
    /// Chassis-local attachment point.
    pub offset: [f32; 3],
    pub radius: f32,  // meters
    pub inertia: f32, // kg*m^2 about the spin axis
    pub steerable: bool,
    pub powered: bool,
    pub braked: bool,
    pub handbraked: bool,
    pub power_multiplier: f32,
    pub brake_multiplier: f32,
}

impl Default for WheelSpec {
    fn default() -> Self {
        Self {
            offset: [0.0, -0.3, 0.0],
            radius: 0.33,
            inertia: 1.6,
            steerable: false,
            powered: false,
            braked: true,
            handbraked: false,
            power_multiplier: 1.0,
            brake_multiplier: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Damage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RepairMode {
    /// Frame-rate independent lerp toward the original (rate * dt).
    #[default]
    TimeScaled,
    /// Fixed displacement step per update, for deterministic convergence.
    FixedStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DamageSettings {
    pub enabled: bool,
    pub mesh_deform: bool,
    pub damage_radius: f32,       // meters around the contact point
    pub damage_multiplier: f32,
    /// Per-vertex displacement cap from the original position.
    pub maximum_damage: f32,
    pub wheel_damage_radius: f32,
    /// Per-wheel pose displacement cap before detachment.
    pub maximum_wheel_damage: f32,
    pub wheel_detach_enabled: bool,
    /// Part strength below which constrained axes unlock.
    pub part_loose_point: f32,
    /// Part strength below which the constraint joint is destroyed.
    pub part_detach_point: f32,
    /// Light strength below which the light stops illuminating.
    pub light_break_point: f32,
    pub repair_mode: RepairMode,
    /// Repair convergence rate (1/s for TimeScaled, m/update for FixedStep).
    pub repair_rate: f32,
    pub repair_epsilon: f32,
    /// Collision impulse normalization constants.
    pub reference_mass: f32,
    pub reference_impulse: f32,
}

impl Default for DamageSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            mesh_deform: true,
            damage_radius: 0.75,
            damage_multiplier: 1.0,
            maximum_damage: 0.5,
            wheel_damage_radius: 0.9,
            maximum_wheel_damage: 0.12,
            wheel_detach_enabled: true,
            part_loose_point: 0.5,
            part_detach_point: 0.2,
            light_break_point: 0.6,
            repair_mode: RepairMode::TimeScaled,
            repair_rate: 2.0,
            repair_epsilon: 1e-3,
            reference_mass: 1350.0,
            reference_impulse: 9000.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Whole-vehicle settings + presets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleSettings {
    pub mass: f32,       // kg
    pub max_speed: f32,  // m/s
    pub brake_force: f32, // N*m of brake torque per wheel at full pedal
    pub handbrake_force: f32,
    pub engine: EngineSettings,
    pub transmission: TransmissionSettings,
    pub steering: SteeringSettings,
    pub wheels: Vec<WheelSpec>,
    pub damage: DamageSettings,
    pub fuel_capacity: f32,    // liters
    pub fuel_consumption: f32, // liters/s at full throttle, max rpm
    /// Extra engine torque fraction at full boost input.
    pub boost_gain: f32,
}

impl Default for VehicleSettings {
    fn default() -> Self {
        Self::gt86()
    }
}

impl VehicleSettings {
    /// RWD coupe baseline (the tuning car everything else is derived from).
    pub fn gt86() -> Self {
        let steering = SteeringSettings::default();
        let half_track = steering.track_width * 0.5;
        let half_base = steering.wheelbase * 0.5;
        let front = |x: f32| WheelSpec {
            offset: [x, -0.3, -half_base],
            steerable: true,
            ..WheelSpec::default()
        };
        let rear = |x: f32| WheelSpec {
            offset: [x, -0.3, half_base],
            powered: true,
            handbraked: true,
            ..WheelSpec::default()
        };
        Self {
            mass: 1350.0,
            max_speed: 55.0,
            brake_force: 2400.0,
            handbrake_force: 2800.0,
            engine: EngineSettings::default(),
            transmission: TransmissionSettings::default(),
            steering,
            wheels: vec![
                front(-half_track),
                front(half_track),
                rear(-half_track),
                rear(half_track),
            ],
            damage: DamageSettings::default(),
            fuel_capacity: 50.0,
            fuel_consumption: 0.004,
            boost_gain: 0.35,
        }
    }

    /// Soft, heavy utility truck: fewer gears, lazy engine, AWD.
    pub fn truck() -> Self {
        let mut s = Self::gt86();
        s.mass = 3200.0;
        s.max_speed = 33.0;
        s.engine = EngineSettings {
            min_rpm: 700.0,
            max_rpm: 4500.0,
            peak_torque: 900.0,
            peak_torque_rpm: 2200.0,
            inertia: 0.6,
            ..EngineSettings::default()
        };
        s.transmission.gear_count = 5;
        s.transmission.shift_up_rpm = 2300.0;
        s.transmission.shift_down_rpm = 1100.0;
        for w in &mut s.wheels {
            w.powered = true;
            w.radius = 0.42;
            w.inertia = 3.5;
        }
        s
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn powered_wheel_count(&self) -> usize {
        self.wheels.iter().filter(|w| w.powered).count()
    }
}

/// Global simulation constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimSettings {
    /// Fixed physics timestep (s).
    pub fixed_dt: f32,
    pub gravity: [f32; 3],
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            fixed_dt: 0.02, // 50 Hz
            gravity: [0.0, -9.81, 0.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ground_lookup_falls_back_to_first_material() {
        let table = GroundMaterialTable::standard();
        assert_eq!(table.lookup(99).name, "asphalt");
        assert_eq!(table.lookup(1).name, "gravel");
    }

    #[test]
    fn terrain_fallback_maps_splat_channels() {
        let table = GroundMaterialTable::standard();
        assert_eq!(table.lookup_terrain(0).name, "grass");
        assert_eq!(table.lookup_terrain(1).name, "sand");
    }

    #[test]
    fn profile_round_trips_through_json() {
        let profile = BehaviorProfile::drift();
        let text = serde_json::to_string(&profile).unwrap();
        let back = BehaviorProfile::from_json(&text).unwrap();
        assert_eq!(back, profile);
    }

    #[test]
    fn profile_json_fills_missing_fields_with_defaults() {
        let profile = BehaviorProfile::from_json(r#"{"name":"custom"}"#).unwrap();
        assert_eq!(profile.name, "custom");
        assert_eq!(profile.assists, AssistSettings::default());
    }

    #[test]
    fn gt86_preset_is_rwd() {
        let s = VehicleSettings::gt86();
        assert_eq!(s.wheels.len(), 4);
        assert_eq!(s.powered_wheel_count(), 2);
        assert!(s.wheels[0].steerable && !s.wheels[0].powered);
        assert!(s.wheels[2].powered && s.wheels[2].handbraked);
    }
}
