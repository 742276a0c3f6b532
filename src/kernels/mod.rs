//! Numeric kernels shared by the lung and the adapter.
//!
//! Everything here is stateless; shape checks are the caller's job.

pub mod math;

pub use math::{
    argmax, axpy, dot, entropy, matvec, matvec_t, matvec_t_parallel, softmax_in_place,
    top_k_excluding,
};
