//! Drivetrain: engine + gearbox + automatic clutch.
//!
//! Runs first in the fixed intra-tick order. Consumes driver input and the
//! averaged powered-wheel angular rate, produces RPM, gear state, clutch
//! position and the per-wheel motor torque the wheel models distribute.

pub mod clutch;
pub mod engine;
pub mod gearbox;

use log::warn;

pub use clutch::AutoClutch;
pub use engine::{Engine, TorqueCurve};
pub use gearbox::{Gear, GearTable, Gearbox};

use crate::error::ConfigError;
use crate::settings::VehicleSettings;
use crate::state::{Direction, VehicleState};

const RADS_TO_RPM: f32 = 60.0 / (2.0 * std::f32::consts::PI);

#[derive(Debug, Clone)]
pub struct DriveTrain {
    pub engine: Engine,
    pub gearbox: Gearbox,
    auto_clutch: AutoClutch,
    max_speed: f32,
    /// Representative powered-wheel radius for speed/RPM conversions.
    drive_wheel_radius: f32,
    fuel_consumption: f32,
}

impl DriveTrain {
    /// Build from vehicle settings. Configuration defects are repaired where
    /// possible and returned for the caller's validation report.
    pub fn new(settings: &VehicleSettings) -> (Self, Vec<ConfigError>) {
        let mut defects = Vec::new();

        let mut engine_settings = settings.engine;
        if engine_settings.min_rpm >= engine_settings.max_rpm {
            defects.push(ConfigError::RpmRangeInvalid {
                min: engine_settings.min_rpm,
                max: engine_settings.max_rpm,
            });
            warn!(
                "engine rpm range invalid ({} >= {}), restoring defaults",
                engine_settings.min_rpm, engine_settings.max_rpm
            );
            engine_settings = crate::settings::EngineSettings::default();
        }

        let (gearbox, table_defect) = Gearbox::new(settings.transmission, settings.max_speed);
        if let Some(d) = table_defect {
            defects.push(d);
        }

        let drive_wheel_radius = {
            let powered: Vec<f32> = settings
                .wheels
                .iter()
                .filter(|w| w.powered)
                .map(|w| w.radius)
                .collect();
            if powered.is_empty() {
                settings.wheels.first().map(|w| w.radius).unwrap_or(0.33)
            } else {
                powered.iter().sum::<f32>() / powered.len() as f32
            }
        };

        (
            Self {
                engine: Engine::new(engine_settings),
                gearbox,
                auto_clutch: AutoClutch::default(),
                max_speed: settings.max_speed,
                drive_wheel_radius,
                fuel_consumption: settings.fuel_consumption,
            },
            defects,
        )
    }

    /// Recompute the gear table speed columns when maximum speed changes.
    pub fn set_max_speed(&mut self, max_speed: f32) {
        self.max_speed = max_speed;
        self.gearbox.table.rebuild_for_max_speed(max_speed);
    }

    /// Gear ratio currently coupling engine to wheels.
    pub fn current_ratio(&self, state: &VehicleState) -> f32 {
        match state.direction {
            Direction::Forward => self.gearbox.table.ratio(state.current_gear),
            // Reverse runs through the first forward ratio, flipped at the
            // torque sign, matching the single reverse gear of the box.
            Direction::Reverse => self.gearbox.table.ratio(0),
            Direction::Neutral => 0.0,
        }
    }

    /// Engine RPM the first gear's shift target speed corresponds to.
    fn first_gear_target_rpm(&self) -> f32 {
        let target_speed = self.gearbox.table.gear(0).target_shift_speed;
        let omega = target_speed / self.drive_wheel_radius.max(1e-3);
        omega * RADS_TO_RPM * self.gearbox.table.ratio(0) * self.gearbox.settings.final_drive
    }

    /// Throttle demand after direction mapping and cuts. In reverse the brake
    /// pedal drives the car backward and the throttle pedal brakes (handled
    /// by the wheel layer); the demand returned here is always >= 0.
    fn throttle_demand(&self, state: &VehicleState) -> f32 {
        let base = match state.direction {
            Direction::Forward | Direction::Neutral => state.input.throttle.max(0.0),
            Direction::Reverse => state.input.brake.max((-state.input.throttle).max(0.0)),
        };
        if !state.engine_running
            || self.gearbox.changing_gear()
            || self.engine.rev_limited(state.engine_rpm_raw)
        {
            0.0
        } else {
            base
        }
    }

    /// Advance engine, clutch and gearbox one fixed tick.
    ///
    /// `wheel_omega_avg` is the average absolute angular rate of the powered
    /// wheels (rad/s), read from last tick's wheel integration.
    pub fn update(&mut self, state: &mut VehicleState, wheel_omega_avg: f32, dt: f32) {
        let demand = self.throttle_demand(state);

        let ratio = self.current_ratio(state).abs();
        let wheel_rpm =
            wheel_omega_avg.abs() * RADS_TO_RPM * ratio * self.gearbox.settings.final_drive;

        let clutch =
            self.auto_clutch
                .update(state, wheel_rpm, self.first_gear_target_rpm(), dt);

        self.engine.update_rpm(state, wheel_rpm, clutch, demand, dt);
        self.gearbox.update(state, dt);

        state.clutch = clutch;
        state.effective_throttle = demand;

        // Fuel burn follows demand with an idle floor; the engine dies the
        // moment the tank runs dry.
        if state.engine_running {
            let load = (state.engine_rpm_raw / self.engine.settings.max_rpm.max(1.0)).max(0.25);
            state.fuel = (state.fuel - self.fuel_consumption * load * (0.2 + demand) * dt).max(0.0);
            if state.fuel <= 0.0 {
                state.engine_running = false;
            }
        }
    }

    /// Motor torque for one powered wheel this tick (N*m, signed by travel
    /// direction), before the wheel's own power multiplier. Zero when the
    /// engine is off, the clutch is open, or a speed cap is exceeded.
    pub fn wheel_motor_torque(&self, state: &VehicleState, boost_gain: f32) -> f32 {
        if !state.engine_running || state.direction == Direction::Neutral {
            return 0.0;
        }
        if state.speed.abs() >= self.max_speed {
            return 0.0;
        }
        if state.direction == Direction::Forward
            && state.speed >= self.gearbox.table.gear(state.current_gear).max_speed
        {
            return 0.0;
        }

        let boost = 1.0 + state.input.boost * boost_gain;
        state.direction.sign()
            * (1.0 - state.clutch)
            * state.effective_throttle
            * boost
            * self.engine.torque_at(state.engine_rpm_raw)
            * self.current_ratio(state)
            * self.gearbox.settings.final_drive
            / state.powered_wheels()
    }
}
