//! Four-parameter friction curves and their per-tick moderation.
//!
//! A curve rises linearly to (extremum_slip, extremum_value), falls to
//! (asymptote_slip, asymptote_value) and stays flat past that. The working
//! copies stored on each wheel are re-derived every tick from the behavior
//! profile and ground material, then optionally relaxed by drift mode.

use crate::settings::{BehaviorProfile, DriftSettings, FrictionCurveParams, GroundMaterial};

/// Normalized grip (a friction coefficient) for a slip magnitude.
pub fn evaluate(params: &FrictionCurveParams, slip: f32) -> f32 {
    let s = slip.abs();
    let g = if s <= params.extremum_slip {
        params.extremum_value * s / params.extremum_slip.max(1e-4)
    } else if s <= params.asymptote_slip {
        let span = (params.asymptote_slip - params.extremum_slip).max(1e-4);
        let t = (s - params.extremum_slip) / span;
        params.extremum_value + (params.asymptote_value - params.extremum_value) * t
    } else {
        params.asymptote_value
    };
    g * params.stiffness
}

/// Working forward/sideways curve pair for one wheel this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelFriction {
    pub forward: FrictionCurveParams,
    pub sideways: FrictionCurveParams,
}

impl WheelFriction {
    pub fn from_profile(profile: &BehaviorProfile) -> Self {
        Self {
            forward: profile.forward_curve,
            sideways: profile.sideways_curve,
        }
    }

    /// Re-derive the working curves from profile defaults moderated by the
    /// current surface, handbrake state and the stability layer's
    /// traction-helped multiplier. Preserves any drift relaxation currently
    /// applied to the curve values (only stiffness columns are rewritten).
    pub fn moderate(
        &mut self,
        profile: &BehaviorProfile,
        ground: &GroundMaterial,
        handbrake: f32,
        traction_helped: f32,
    ) {
        self.forward.stiffness = profile.forward_curve.stiffness * ground.forward_stiffness;

        // Handbraking stiffens the sideways curve so the rear steps out
        // instead of washing away; the traction helper softens the front.
        let handbrake_mult = 1.0 + (profile.handbrake_sideways_mult - 1.0) * handbrake;
        self.sideways.stiffness = profile.sideways_curve.stiffness
            * ground.sideways_stiffness
            * handbrake_mult
            * traction_helped.clamp(0.1, 1.0);
    }

    /// Drift relaxation: while combined slip exceeds the threshold the curve
    /// values decay exponentially toward the reduced targets; grip recovers
    /// the same way once the slide ends.
    pub fn relax_for_drift(
        &mut self,
        profile: &BehaviorProfile,
        drift: &DriftSettings,
        combined_slip: f32,
        dt: f32,
    ) {
        if !drift.enabled {
            return;
        }
        let k = 1.0 - (-drift.relaxation_rate * dt).exp();
        let sliding = combined_slip > drift.slip_threshold;

        let (fwd_target, side_target) = if sliding {
            (drift.extremum_value_target, drift.asymptote_value_target)
        } else {
            (
                profile.forward_curve.extremum_value,
                profile.forward_curve.asymptote_value,
            )
        };
        self.forward.extremum_value += (fwd_target - self.forward.extremum_value) * k;
        self.forward.asymptote_value += (side_target - self.forward.asymptote_value) * k;

        let (ext_target, asy_target) = if sliding {
            (drift.extremum_value_target, drift.asymptote_value_target)
        } else {
            (
                profile.sideways_curve.extremum_value,
                profile.sideways_curve.asymptote_value,
            )
        };
        self.sideways.extremum_value += (ext_target - self.sideways.extremum_value) * k;
        self.sideways.asymptote_value += (asy_target - self.sideways.asymptote_value) * k;
    }

    /// True while drift relaxation is holding this wheel below profile grip.
    pub fn drift_relaxed(&self, profile: &BehaviorProfile) -> bool {
        self.sideways.extremum_value < profile.sideways_curve.extremum_value * 0.95
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> FrictionCurveParams {
        FrictionCurveParams {
            extremum_slip: 0.4,
            extremum_value: 1.0,
            asymptote_slip: 0.8,
            asymptote_value: 0.75,
            stiffness: 1.0,
        }
    }

    #[test]
    fn curve_shape() {
        let c = curve();
        assert_eq!(evaluate(&c, 0.0), 0.0);
        assert!((evaluate(&c, 0.2) - 0.5).abs() < 1e-4); // halfway up the rise
        assert!((evaluate(&c, 0.4) - 1.0).abs() < 1e-4); // extremum
        assert!((evaluate(&c, 0.6) - 0.875).abs() < 1e-4); // halfway down
        assert!((evaluate(&c, 5.0) - 0.75).abs() < 1e-4); // flat tail
        assert_eq!(evaluate(&c, -0.4), evaluate(&c, 0.4)); // magnitude only
    }

    #[test]
    fn stiffness_scales_output() {
        let mut c = curve();
        c.stiffness = 0.5;
        assert!((evaluate(&c, 0.4) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn handbrake_stiffens_sideways() {
        let profile = BehaviorProfile::default();
        let ground = GroundMaterial::default();
        let mut f = WheelFriction::from_profile(&profile);
        f.moderate(&profile, &ground, 0.0, 1.0);
        let base = f.sideways.stiffness;
        f.moderate(&profile, &ground, 1.0, 1.0);
        assert!(f.sideways.stiffness > base);
    }

    #[test]
    fn traction_help_softens_sideways() {
        let profile = BehaviorProfile::default();
        let ground = GroundMaterial::default();
        let mut f = WheelFriction::from_profile(&profile);
        f.moderate(&profile, &ground, 0.0, 0.5);
        assert!((f.sideways.stiffness - 0.5 * profile.sideways_curve.stiffness).abs() < 1e-4);
    }

    #[test]
    fn drift_relaxes_and_recovers() {
        let profile = BehaviorProfile::drift();
        let drift = profile.drift;
        let mut f = WheelFriction::from_profile(&profile);

        for _ in 0..100 {
            f.relax_for_drift(&profile, &drift, 1.0, 0.02);
        }
        assert!(f.drift_relaxed(&profile));
        assert!(
            (f.sideways.extremum_value - drift.extremum_value_target).abs() < 0.05,
            "relaxed toward target: {}",
            f.sideways.extremum_value
        );

        for _ in 0..200 {
            f.relax_for_drift(&profile, &drift, 0.0, 0.02);
        }
        assert!(!f.drift_relaxed(&profile));
    }

    #[test]
    fn drift_disabled_is_inert() {
        let profile = BehaviorProfile::default(); // drift.enabled = false
        let mut f = WheelFriction::from_profile(&profile);
        let before = f;
        f.relax_for_drift(&profile, &profile.drift, 10.0, 0.02);
        assert_eq!(f, before);
    }
}
