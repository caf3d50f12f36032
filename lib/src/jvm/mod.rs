//! JVM method bodies: types, names, descriptors and the assembler core
//!
//! ### Structure
//!
//! A method body is assembled one instruction at a time. Each instruction is checked against a
//! simulated frame (the types in the local variables and on the operand stack, see
//! [`verifier`]) and the frame is updated with its effect. Once every instruction is in, the
//! [`code`] layout pass picks the encoding of every branch and switch, and the bytes get written
//! out with [`Serialize`].
//!
//! Problems with the instructions themselves are _diagnostics_: they are collected, logged and
//! assembly carries on so that as many as possible get reported at once. Problems that make it
//! impossible to produce a code array at all (an undefined label, a method that is too long) are
//! [`Error`]s.
//!
//! ### Simple example
//!
//! ```
//! use jynx::jvm::code::{simulate, Instruction, LocalVar, Opcode};
//! use jynx::jvm::verifier::{FrameState, MethodContext};
//! use jynx::jvm::*;
//!
//! let method = MethodContext {
//!     class: BinaryName::from_str("me/alec/Point").unwrap(),
//!     name: UnqualifiedName::from_str("sum").unwrap(),
//!     descriptor: MethodDescriptor::parse("(II)I").unwrap(),
//!     access_flags: MethodAccessFlags::STATIC,
//! };
//! let mut diagnostics = Diagnostics::new();
//! let instructions = vec![
//!     Instruction::Local(Opcode::ILOAD, LocalVar::Index(0)),
//!     Instruction::Local(Opcode::ILOAD, LocalVar::Index(1)),
//!     Instruction::Plain(Opcode::IADD),
//! ];
//! let entry = FrameState::entry(&method, 10, false);
//! let state = simulate(instructions, entry, &method, &mut diagnostics);
//! assert!(diagnostics.is_empty());
//! assert_eq!(state.stack.max_stack(), 2);
//! ```

mod access_flags;
mod binary_format;
mod descriptors;
mod diagnostics;
mod errors;
mod names;
mod version;

pub mod code;
pub mod verifier;

pub use access_flags::*;
pub use binary_format::*;
pub use descriptors::*;
pub use diagnostics::*;
pub use errors::*;
pub use names::*;
pub use version::*;
