//! Instructions, labels and code layout
//!
//! ### Structure
//!
//! A method body is a sequence of [`Instruction`]s with labels placed in between. Each
//! instruction knows its effect on the frame (see [`Instruction::adjust`]) and how to encode
//! itself once its offset is known.
//!
//! [`Labels`] hold the frames recorded for jump targets: a label jumped to before it is placed
//! collects the join of the incoming frames, and a label that has been placed checks that later
//! jumps agree with it.
//!
//! ### Layout
//!
//! The length of a branch depends on its distance to its target, and the distances depend on the
//! lengths of every branch in between. [`resolve_layout`] settles this with a fixed-point
//! iteration (see [`jump_encoding`] for the details) and switches get their padding from the
//! final offsets.

mod instructions;
mod label;
mod opcodes;
mod switch;

pub mod jump_encoding;

pub use crate::jvm::verifier::LocalVar;
pub use instructions::*;
pub use jump_encoding::{resolve_layout, BranchForm, Layout, Sizing};
pub use label::*;
pub use opcodes::*;
pub use switch::*;
