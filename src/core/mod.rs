//! Core module — positional tables, bidirectional attention, and the lung.

pub mod attention;
pub mod lung;
pub mod positional;

pub use lung::{LungConfig, LungModel};
pub use positional::TimeOrientation;
