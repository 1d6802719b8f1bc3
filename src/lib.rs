//! Real-time vehicle dynamics with collision deformation.
//!
//! The crate is split along the fixed intra-tick order:
//! - [`drivetrain`]: engine RPM model, torque curve, automatic gearbox and
//!   clutch
//! - [`wheel`]: steering geometry, friction curves and the per-wheel slip
//!   and force solve
//! - [`assist`]: ABS, traction control, stability control and the steering
//!   and traction helpers
//! - [`damage`]: mesh deformation, wheel/part/light damage and repair
//! - [`vehicle`]: the per-vehicle aggregate running one fixed tick
//! - [`bridge`]: the rapier3d world that supplies contacts and applies the
//!   resulting forces
//!
//! A host that brings its own rigid-body integration only needs
//! [`vehicle::Vehicle::step`] with a [`vehicle::BodyFrame`] snapshot and
//! per-wheel [`wheel::WheelContact`] probes.

pub mod assist;
pub mod bridge;
pub mod damage;
pub mod drivetrain;
pub mod error;
pub mod events;
pub mod input;
pub mod settings;
pub mod state;
pub mod vehicle;
pub mod wheel;

pub use bridge::VehicleWorld;
pub use error::{ConfigError, DamageError, VehicleError};
pub use events::{EventHub, LifecycleEvent, VehicleId};
pub use input::DriverInput;
pub use settings::{BehaviorProfile, GroundMaterialTable, SimSettings, VehicleSettings};
pub use state::{Direction, VehicleState};
pub use vehicle::{BodyFrame, TickCommands, TickContext, Vehicle};
