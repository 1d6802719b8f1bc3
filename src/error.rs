use thiserror::Error;

/// Top-level error type for the vehicle core.
///
/// Nothing here is fatal to a running simulation: every failure mode degrades
/// to "skip this feature for this tick/vehicle" and the error is surfaced for
/// logging or validation reports.
#[derive(Debug, Error)]
pub enum VehicleError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Damage error: {0}")]
    Damage(#[from] DamageError),
}

/// Configuration defects found by the validation pass.
///
/// Where possible the validator repairs the configuration (e.g. rebuilding a
/// degenerate gear table) and reports the defect as a warning instead of
/// returning it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Degenerate gear table: {0} gears (must be 1..=8)")]
    DegenerateGearTable(usize),

    #[error("Gear ratios must strictly decrease: ratio[{index}] = {ratio}")]
    NonDecreasingRatios { index: usize, ratio: f32 },

    #[error("Invalid RPM range: min {min} >= max {max}")]
    RpmRangeInvalid { min: f32, max: f32 },

    #[error("Vehicle has no wheels assigned")]
    MissingWheels,

    #[error("Vehicle has no powered wheels")]
    NoPoweredWheels,

    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

/// Deformation pipeline defects.
///
/// Copy where possible for cheap propagation from the damage hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DamageError {
    /// Aggregated diagnostic: N meshes were skipped because their vertex data
    /// is not readable. Reported once per damage pass, never per mesh.
    #[error("{0} mesh(es) skipped: vertex data not readable")]
    UnreadableMeshes(usize),

    #[error("Invalid mesh index {index} (mesh count {count})")]
    InvalidMeshIndex { index: usize, count: usize },

    #[error("Spatial index not initialized for mesh {0}")]
    OctreeUninitialized(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_into_vehicle_error() {
        let err = ConfigError::RpmRangeInvalid {
            min: 8000.0,
            max: 7000.0,
        };
        let top: VehicleError = err.into();
        assert!(matches!(top, VehicleError::Config(_)));
        assert!(top.to_string().contains("8000"));
    }

    #[test]
    fn damage_error_is_copy() {
        let err = DamageError::UnreadableMeshes(3);
        let err2 = err; // Copy
        assert_eq!(err, err2);
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            ConfigError::DegenerateGearTable(0).to_string(),
            "Degenerate gear table: 0 gears (must be 1..=8)"
        );
        assert_eq!(
            DamageError::InvalidMeshIndex { index: 4, count: 2 }.to_string(),
            "Invalid mesh index 4 (mesh count 2)"
        );
        assert_eq!(
            DamageError::UnreadableMeshes(2).to_string(),
            "2 mesh(es) skipped: vertex data not readable"
        );
    }
}
