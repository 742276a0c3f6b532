//! Runtime module: ties the lung, the adapter and the control field into a
//! breathing loop.

pub mod breath;

pub use breath::{BreathConfig, BreathLoop, BreathOutcome, BreathStats};
