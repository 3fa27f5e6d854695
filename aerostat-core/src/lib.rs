// lib.rs
#![no_std]

pub mod blackboard;
pub mod config;
pub mod datacells;
pub mod drivers;
pub mod error;
pub mod health;
pub mod log;
pub mod radio_link;
pub mod radio_types;
pub mod sampler;
pub mod scheduler;
pub mod state_machine;
pub mod types;
pub mod utilization;

pub use blackboard::Blackboard;
pub use config::{FlightConfig, PowerLevel, RadioConfig};
pub use error::*;
pub use radio_link::RadioLink;
pub use radio_types::{CommandFlags, CommandPacket, TelemetryPacket};
pub use sampler::SensorSampler;
pub use scheduler::{Cadence, Clock, ManualClock, Scheduler, Task, TaskSpec, TaskStatus};
pub use state_machine::*;
pub use types::*;
