//! Gear table and automatic shift state machine.
//!
//! Shifts are driven by explicit timers advanced with the fixed tick dt:
//! the box is either settled or inside a `Pending` window during which the
//! drivetrain cuts throttle. No background tasks, polled once per tick.

use log::warn;

use crate::error::ConfigError;
use crate::settings::{ReversePolicy, TransmissionSettings};
use crate::state::{Direction, VehicleState};

// ---------------------------------------------------------------------------
// Gear table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gear {
    pub ratio: f32,
    /// Speed cap while this gear is engaged (m/s).
    pub max_speed: f32,
    /// Speed at which the box wants to leave this gear upward.
    pub target_shift_speed: f32,
}

/// Fixed ratio ladder indexed by gear count (1..=8). Ratios strictly
/// decrease within each row.
const RATIO_TABLE: [&[f32]; 8] = [
    &[1.0],
    &[2.3, 1.0],
    &[2.66, 1.55, 1.0],
    &[3.2, 2.0, 1.35, 1.0],
    &[3.8, 2.35, 1.6, 1.2, 1.0],
    &[4.35, 2.7, 1.85, 1.4, 1.12, 0.92],
    &[4.7, 3.0, 2.1, 1.55, 1.25, 1.05, 0.9],
    &[5.0, 3.3, 2.3, 1.7, 1.35, 1.12, 0.96, 0.85],
];

/// Fraction of a gear's speed cap where the upshift target sits.
const SHIFT_TARGET_FRAC: f32 = 0.85;

#[derive(Debug, Clone, PartialEq)]
pub struct GearTable {
    gears: Vec<Gear>,
    max_speed: f32,
}

impl GearTable {
    /// Build from the fixed ratio table. A gear count outside 1..=8 is a
    /// configuration defect: it is reported and a sane default table is
    /// regenerated instead of failing.
    pub fn build(gear_count: usize, max_speed: f32) -> (Self, Option<ConfigError>) {
        let (count, defect) = if (1..=8).contains(&gear_count) {
            (gear_count, None)
        } else {
            warn!("degenerate gear table ({gear_count} gears), rebuilding with 6");
            (6, Some(ConfigError::DegenerateGearTable(gear_count)))
        };

        let ratios = RATIO_TABLE[count - 1];
        // Per-gear speed caps scale with the inverse ratio so the engine sees
        // the same RPM at every gear's cap (top gear caps at max_speed).
        let top_ratio = *ratios.last().expect("ratio table rows are non-empty");
        let gears = ratios
            .iter()
            .map(|&ratio| {
                let max = max_speed * top_ratio / ratio;
                Gear {
                    ratio,
                    max_speed: max,
                    target_shift_speed: max * SHIFT_TARGET_FRAC,
                }
            })
            .collect();
        (Self { gears, max_speed }, defect)
    }

    /// Recompute the speed columns; called whenever maximum speed changes.
    pub fn rebuild_for_max_speed(&mut self, max_speed: f32) {
        if (max_speed - self.max_speed).abs() < f32::EPSILON {
            return;
        }
        let (rebuilt, _) = Self::build(self.gears.len(), max_speed);
        *self = rebuilt;
    }

    pub fn len(&self) -> usize {
        self.gears.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gears.is_empty()
    }

    /// Gear record with the index clamped into range.
    pub fn gear(&self, index: usize) -> &Gear {
        &self.gears[index.min(self.gears.len() - 1)]
    }

    pub fn ratio(&self, index: usize) -> f32 {
        self.gear(index).ratio
    }

    /// Invariant check: ratios strictly decrease with gear index.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gears.is_empty() {
            return Err(ConfigError::DegenerateGearTable(0));
        }
        for (i, pair) in self.gears.windows(2).enumerate() {
            if pair[1].ratio >= pair[0].ratio {
                return Err(ConfigError::NonDecreasingRatios {
                    index: i + 1,
                    ratio: pair[1].ratio,
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Shift state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShiftTarget {
    Gear(usize),
    Neutral,
    Reverse,
}

/// Timer state for the changing-gear window.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ShiftPhase {
    Idle,
    Pending { elapsed: f32, target: ShiftTarget },
}

#[derive(Debug, Clone)]
pub struct Gearbox {
    pub table: GearTable,
    pub settings: TransmissionSettings,
    phase: ShiftPhase,
    /// Time the brake has been held above the reverse threshold.
    reverse_hold: f32,
}

/// Brake must stay above the threshold this long before reverse engages.
const REVERSE_HOLD_TIME: f32 = 0.35;

impl Gearbox {
    pub fn new(settings: TransmissionSettings, max_speed: f32) -> (Self, Option<ConfigError>) {
        let (table, defect) = GearTable::build(settings.gear_count, max_speed);
        (
            Self {
                table,
                settings,
                phase: ShiftPhase::Idle,
                reverse_hold: 0.0,
            },
            defect,
        )
    }

    pub fn changing_gear(&self) -> bool {
        matches!(self.phase, ShiftPhase::Pending { .. })
    }

    fn begin_shift(&mut self, target: ShiftTarget) {
        self.phase = ShiftPhase::Pending {
            elapsed: 0.0,
            target,
        };
    }

    fn can_reverse(&self, state: &VehicleState) -> bool {
        match self.settings.reverse_policy {
            ReversePolicy::Always => true,
            ReversePolicy::SpeedGated => state.speed.abs() < self.settings.reverse_speed_gate,
        }
    }

    /// Advance the box one tick. Reads speed/RPM from `state`, commits gear
    /// and direction changes back into it.
    pub fn update(&mut self, state: &mut VehicleState, dt: f32) {
        // Re-establish the index invariant before anything reads the table.
        state.current_gear = state.current_gear.min(self.table.len() - 1);

        // Track sustained brake for the reverse gate.
        if state.input.brake >= self.settings.reverse_brake_threshold {
            self.reverse_hold += dt;
        } else {
            self.reverse_hold = 0.0;
        }

        match self.phase {
            ShiftPhase::Pending { elapsed, target } => {
                let elapsed = elapsed + dt;
                if elapsed >= self.settings.shift_delay {
                    self.commit(state, target);
                    self.phase = ShiftPhase::Idle;
                } else {
                    self.phase = ShiftPhase::Pending { elapsed, target };
                }
            }
            ShiftPhase::Idle => self.consider_shift(state),
        }
        state.changing_gear = self.changing_gear();
    }

    fn commit(&mut self, state: &mut VehicleState, target: ShiftTarget) {
        match target {
            ShiftTarget::Gear(g) => {
                state.current_gear = g.min(self.table.len() - 1);
                state.direction = Direction::Forward;
            }
            ShiftTarget::Neutral => {
                state.current_gear = 0;
                state.direction = Direction::Neutral;
            }
            ShiftTarget::Reverse => {
                state.current_gear = 0;
                state.direction = Direction::Reverse;
            }
        }
    }

    fn consider_shift(&mut self, state: &VehicleState) {
        let rpm = state.engine_rpm_raw;
        let speed = state.speed;
        let near_stop = speed.abs() < 0.5;

        let wants_reverse = self.reverse_hold >= REVERSE_HOLD_TIME
            && near_stop
            && self.can_reverse(state);

        match state.direction {
            Direction::Neutral => {
                if wants_reverse {
                    self.begin_shift(ShiftTarget::Reverse);
                } else if state.input.throttle > 0.05 && state.engine_running {
                    self.begin_shift(ShiftTarget::Gear(0));
                }
            }
            Direction::Reverse => {
                // Positive throttle at a stop pulls the box back into first.
                if state.input.throttle > 0.05 && near_stop {
                    self.begin_shift(ShiftTarget::Gear(0));
                }
            }
            Direction::Forward => {
                if wants_reverse {
                    self.begin_shift(ShiftTarget::Reverse);
                    return;
                }
                let gear = state.current_gear.min(self.table.len() - 1);
                let can_up = gear + 1 < self.table.len();
                if can_up
                    && speed >= self.table.gear(gear).target_shift_speed
                    && rpm >= self.settings.shift_up_rpm
                {
                    self.begin_shift(ShiftTarget::Gear(gear + 1));
                } else if gear > 0
                    && speed < self.table.gear(gear - 1).target_shift_speed
                    && rpm <= self.settings.shift_down_rpm
                {
                    self.begin_shift(ShiftTarget::Gear(gear - 1));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::DriverInput;

    fn state() -> VehicleState {
        let mut s = VehicleState::new(50.0, 2, 900.0);
        s.direction = Direction::Forward;
        s
    }

    fn gearbox() -> Gearbox {
        Gearbox::new(TransmissionSettings::default(), 55.0).0
    }

    #[test]
    fn table_ratios_strictly_decrease_for_all_gear_counts() {
        for count in 1..=8 {
            let (table, defect) = GearTable::build(count, 50.0);
            assert!(defect.is_none());
            assert_eq!(table.len(), count);
            table.validate().unwrap();
        }
    }

    #[test]
    fn degenerate_gear_count_regenerates_default_table() {
        let (table, defect) = GearTable::build(0, 50.0);
        assert!(matches!(defect, Some(ConfigError::DegenerateGearTable(0))));
        assert_eq!(table.len(), 6);
        table.validate().unwrap();

        let (table, defect) = GearTable::build(12, 50.0);
        assert!(defect.is_some());
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn rebuild_scales_speed_columns() {
        let (mut table, _) = GearTable::build(6, 50.0);
        let top_before = table.gear(5).max_speed;
        table.rebuild_for_max_speed(100.0);
        assert!((table.gear(5).max_speed - top_before * 2.0).abs() < 1e-3);
        table.validate().unwrap();
    }

    #[test]
    fn upshift_needs_speed_and_rpm_and_waits_out_the_window() {
        let mut gb = gearbox();
        let mut s = state();
        s.current_gear = 0;
        s.speed = gb.table.gear(0).target_shift_speed + 0.1;
        s.engine_rpm_raw = gb.settings.shift_up_rpm + 100.0;

        gb.update(&mut s, 0.02);
        assert!(s.changing_gear);
        assert_eq!(s.current_gear, 0); // not committed yet

        let ticks = (gb.settings.shift_delay / 0.02).ceil() as usize + 1;
        for _ in 0..ticks {
            gb.update(&mut s, 0.02);
        }
        assert_eq!(s.current_gear, 1);
        assert!(!s.changing_gear);
    }

    #[test]
    fn no_upshift_below_shift_rpm() {
        let mut gb = gearbox();
        let mut s = state();
        s.speed = gb.table.gear(0).target_shift_speed + 0.1;
        s.engine_rpm_raw = gb.settings.shift_up_rpm - 500.0;
        gb.update(&mut s, 0.02);
        assert!(!s.changing_gear);
    }

    #[test]
    fn downshift_when_slow_and_low_rpm() {
        let mut gb = gearbox();
        let mut s = state();
        s.current_gear = 2;
        s.speed = gb.table.gear(1).target_shift_speed - 1.0;
        s.engine_rpm_raw = gb.settings.shift_down_rpm - 200.0;
        gb.update(&mut s, 0.02);
        assert!(s.changing_gear);
        for _ in 0..30 {
            gb.update(&mut s, 0.02);
        }
        assert_eq!(s.current_gear, 1);
    }

    #[test]
    fn reverse_needs_sustained_brake_at_standstill() {
        let mut gb = gearbox();
        let mut s = state();
        s.direction = Direction::Neutral;
        s.speed = 0.0;
        s.input = DriverInput {
            brake: 1.0,
            ..DriverInput::default()
        };

        // One tick of brake is not "sustained".
        gb.update(&mut s, 0.02);
        assert!(!s.changing_gear);

        for _ in 0..60 {
            gb.update(&mut s, 0.02);
        }
        assert_eq!(s.direction, Direction::Reverse);
    }

    #[test]
    fn speed_gate_blocks_reverse_while_rolling() {
        let mut gb = gearbox();
        let mut s = state();
        s.direction = Direction::Forward;
        s.speed = 10.0;
        s.input = DriverInput {
            brake: 1.0,
            ..DriverInput::default()
        };
        for _ in 0..120 {
            gb.update(&mut s, 0.02);
        }
        assert_eq!(s.direction, Direction::Forward);
    }

    #[test]
    fn gear_index_always_in_table_range() {
        let mut gb = gearbox();
        let mut s = state();
        s.current_gear = 99; // corrupted externally
        s.speed = 60.0;
        s.engine_rpm_raw = 7000.0;
        for _ in 0..100 {
            gb.update(&mut s, 0.02);
            assert!(s.current_gear < gb.table.len());
        }
    }
}
