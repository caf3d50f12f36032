//! Frame simulation
//!
//! For any specific instruction inside a method body, the locals and the operand stack must have
//! the same structure no matter which control flow reached that instruction. Although the values
//! obviously differ, the types and order cannot. The assembler tracks this structure (the
//! _frame_) as instructions come in: each instruction checks that the frame holds what it
//! consumes, then replaces that with what it produces.
//!
//! The types used (see [`FrameElement`]) are slightly augmented to take into account
//! initialization, `null`, and values the assembler knows nothing about yet.
//!
//! Where control flow merges (at labels), frames are joined slot by slot with
//! [`FrameElement::combine`]. Locals can be joined freely, but operand stacks must agree exactly.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.10.1

mod frame;
mod locals;
mod stack;
mod types;

pub use frame::*;
pub use locals::*;
pub use stack::*;
pub use types::*;
