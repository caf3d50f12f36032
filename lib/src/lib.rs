//! Core of a textual JVM assembler: simulating the type state of a method body while it is
//! assembled, then picking the smallest encoding of every instruction.
//!
//!   - [`jvm`] has the building blocks: descriptors, the verification type lattice, the local
//!     variable and operand stack trackers, the instruction model, and the branch layout
//!   - [`assemble`] drives those building blocks over a whole method (or a whole listing)

pub mod assemble;
pub mod jvm;
pub mod util;
