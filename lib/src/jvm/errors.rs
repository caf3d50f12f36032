use super::verifier::FrameElement;
use super::Version;
use crate::util::Offset;

/// Problems that stop a method from being assembled at all
#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// Maximum stack depth does not fit in the `max_stack` field
    MethodCodeMaxStackOverflow(Offset),

    /// Number of local slots does not fit in the `max_locals` field
    MethodCodeMaxLocalsOverflow(Offset),

    /// Code array is longer than the 65535 bytes a method may have
    MethodCodeOverflow(Offset),

    /// A label is jumped to (or covers an exception range) but is never placed
    UndefinedLabel(String),

    /// The same label is placed twice
    DuplicateLabel(String),

    /// A switch has so many cases that it cannot fit in any method
    SwitchTooLarge(usize),

    /// Operands of an instruction don't match the shape of its opcode
    InvalidInstruction(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

/// Problems found while simulating the method body
///
/// These are recoverable: they are reported (see `Diagnostics`) and assembly continues with the
/// type that was expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierErrorKind {
    /// Popping from an empty operand stack
    EmptyStack,

    /// Operand stack grows past what `max_stack` can describe
    StackOverflow(usize),

    /// A `dup`/`pop`/`swap` style instruction found a value of the wrong width
    InvalidWidth(usize),

    /// Local variable slot out of range
    InvalidIndex(usize),

    IncompatibleTypes {
        found: FrameElement,
        required: FrameElement,
    },

    /// Stacks (or locals, for a label that has already been placed) differ at a merge point
    IncompatibleFrames {
        label: String,
        found: Vec<FrameElement>,
        recorded: Vec<FrameElement>,
    },

    /// Return instruction does not agree with the method return type
    BadReturn,

    /// `ldc` of a two slot constant, `ldc2_w` of a one slot constant, and the like
    InvalidConstant,

    /// Array type with too few dimensions for `multianewarray`, or `new` of an array
    InvalidArrayType(String),

    /// `invokespecial <init>` on something which is not waiting to be initialized
    NotInitializable(FrameElement),

    InvalidLocalName(String),
    DuplicateLocalName(String),
    UnknownLocalName(String),

    /// Symbolic locals are used but not enabled
    SymbolicLocalsDisabled(String),

    /// Attempt to bind a name to (or overwrite) the receiver slot
    RedefinedReceiver,

    /// Code after an unconditional jump with no label in between
    UnreachableCode,

    /// Label is only reachable by a jump that hasn't been seen yet
    LabelWithoutFrame(String),

    /// Opcode is not allowed in the target class file version
    UnsupportedOpcode {
        mnemonic: &'static str,
        version: Version,
    },

    /// Exception range starts before its handler was registered
    CatchAfterStart(String),

    /// Execution can reach the end of the code array
    FallsOffEnd,

    /// Local declared (annotated) but never written
    NeverWritten(usize),

    /// Local written but never read
    NeverRead(usize),
}
