//! The middle-end: CFG construction, AASM lowering, SSA construction, SSCP,
//! tail-call-to-loop, and unused-result elimination.

pub mod aasm;
pub mod cfg;
pub mod sscp;
pub mod ssa;
pub mod tailrec;
pub mod unused;

pub use aasm::*;
pub use cfg::*;
