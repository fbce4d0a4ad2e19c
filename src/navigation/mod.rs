//! Navigation
//!
//! Geodesy helpers, closed-loop movement primitives and path generators.

pub mod engine;
pub mod geodesy;
pub mod patterns;

pub use engine::{
    approach_speed_factor, forward_speed, vertical_command, NavOutcome, NavParams,
    NavigationEngine, NavigationTarget, SweepLeg,
};
pub use patterns::{coverage_sweep, square_wave_path, SearchArea, SquareWave};
