//! Automatic clutch.
//!
//! First gear slips the clutch against a launch accumulator (time-integrated
//! throttle) and the wheel RPM relative to the first-gear shift target;
//! higher gears run fully engaged outside the shift window.

use crate::state::{Direction, VehicleState};

#[derive(Debug, Clone, Default)]
pub struct AutoClutch {
    /// Time-integrated throttle while launching, 0..1.
    launch: f32,
}

impl AutoClutch {
    /// Returns the clutch position for this tick, 0 engaged .. 1 disengaged.
    ///
    /// `wheel_rpm` is engine-side wheel RPM; `first_gear_target_rpm` is the
    /// engine RPM implied by the first gear's shift target speed.
    pub fn update(
        &mut self,
        state: &VehicleState,
        wheel_rpm: f32,
        first_gear_target_rpm: f32,
        dt: f32,
    ) -> f32 {
        // Hard disengage cases first.
        if state.changing_gear || state.direction == Direction::Neutral {
            self.launch = 0.0;
            return 1.0;
        }

        let auto = if state.current_gear == 0 {
            // Launch accumulator: throttle time builds it, lifting decays it.
            let throttle = state.input.throttle.abs();
            if throttle > 0.1 {
                self.launch += throttle * dt * 2.0;
            } else {
                self.launch -= dt * 3.0;
            }
            self.launch = self.launch.clamp(0.0, 1.0);

            // Engagement follows the wheels spinning up toward the first-gear
            // shift target; the accumulator holds extra slip during launch.
            let wheel_ratio = (wheel_rpm / first_gear_target_rpm.max(1.0)).clamp(0.0, 1.0);
            ((1.0 - wheel_ratio) * (0.6 + 0.4 * self.launch)).clamp(0.0, 1.0)
        } else {
            self.launch = 0.0;
            0.0
        };

        // The driver's pedal can always demand more disengagement.
        auto.max(state.input.clutch)
    }
}
