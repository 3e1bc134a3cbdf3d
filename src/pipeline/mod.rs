//! Battery configuration and execution.

pub mod battery;
pub mod config;

pub use battery::{
    run_battery, BatteryInputs, BatteryReport, FilterSummary, GroupNormality, TestOutcome,
    TestRun, TestState,
};
pub use config::{BatteryConfig, TestSpec};
