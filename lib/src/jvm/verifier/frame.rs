use super::{FrameElement, LocalFrame, LocalVars, OperandStack, StackFrame};
use crate::jvm::{BinaryName, MethodAccessFlags, MethodDescriptor, UnqualifiedName};

/// The method whose body is being simulated
#[derive(Clone, Debug)]
pub struct MethodContext {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
    pub access_flags: MethodAccessFlags,
}

impl MethodContext {
    /// Is this an instance initialization method?
    pub fn is_constructor(&self) -> bool {
        self.name == UnqualifiedName::INIT && self.access_flags.has_receiver()
    }

    /// Type of the receiver on entry (in slot 0), if there is one
    pub fn receiver(&self) -> Option<FrameElement> {
        if !self.access_flags.has_receiver() {
            None
        } else if self.is_constructor() {
            Some(FrameElement::UninitializedThis)
        } else {
            Some(FrameElement::This)
        }
    }

    /// Type a return instruction must return, `None` for `void`
    pub fn return_type(&self) -> Option<FrameElement> {
        self.descriptor
            .return_type
            .clone()
            .map(FrameElement::from)
    }
}

/// Types in the locals and on the operand stack at one point in a method body
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Frame {
    pub locals: LocalFrame,
    pub stack: StackFrame,
}

/// Locals and operand stack trackers at one point in a method body
#[derive(Clone, Debug)]
pub struct FrameState {
    pub locals: LocalVars,
    pub stack: OperandStack,
}

impl FrameState {
    /// State on entry to a method: receiver and parameters in the locals, empty stack
    ///
    /// `max_locals` limits which slots may be used.
    pub fn entry(method: &MethodContext, max_locals: usize, symbolic: bool) -> FrameState {
        FrameState {
            locals: LocalVars::for_method(
                method.receiver(),
                &method.descriptor.parameters,
                max_locals,
                symbolic,
            ),
            stack: OperandStack::new(),
        }
    }

    /// Snapshot of the types (without the method-wide bookkeeping)
    pub fn snapshot(&self) -> Frame {
        Frame {
            locals: self.locals.frame().clone(),
            stack: self.stack.frame().clone(),
        }
    }

    /// Continue from a snapshot
    pub fn restore(&mut self, frame: Frame) {
        self.locals.set_frame(frame.locals);
        self.stack.set_frame(frame.stack);
    }

    /// Replace a type everywhere in the frame (eg. once an object is initialized)
    pub fn replace_all(&mut self, from: &FrameElement, to: &FrameElement) {
        let update = |elem: &FrameElement| (elem == from).then(|| to.clone());
        self.locals.replace_where(update);
        self.stack.replace_where(update);
    }
}
