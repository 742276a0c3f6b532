//! Gradient-free adaptation.
//!
//! - **lora**: low-rank adapters updated by notch-steps
//! - **notch**: target-error vectors and exploration directions
//! - **compose**: folding an adapter's delta into the lung's weights

pub mod compose;
pub mod lora;
pub mod notch;

pub use compose::{compose_embeddings, compose_output_projection};
pub use lora::{AdapterConfig, LowRankAdapter};
pub use notch::build_target_error;
