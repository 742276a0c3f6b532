//! Control-field DSL.
//!
//! A small script language that sets the field values the lung reads
//! (attention focus and spread) along with the rest of the control state.

pub mod interpreter;

pub use interpreter::FieldState;
