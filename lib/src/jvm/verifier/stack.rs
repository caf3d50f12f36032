use super::FrameElement;
use crate::jvm::{BinaryName, Diagnostics, MethodDescriptor, RefType, VerifierErrorKind};
use crate::util::OffsetVec;

/// Deepest the operand stack can get (`max_stack` is a `u16`)
pub const MAX_STACK: usize = u16::MAX as usize;

/// Operand stack types, in stack units (two-slot values count twice towards depth)
pub type StackFrame = OffsetVec<FrameElement>;

/// Tracks the operand stack while a method body is simulated
///
/// Every operation reports what goes wrong and keeps going: popping an empty stack produces
/// `Error`, popping the wrong type produces the type that was expected.
#[derive(Clone, Debug, Default)]
pub struct OperandStack {
    frame: StackFrame,
    max_stack: usize,
}

impl OperandStack {
    pub fn new() -> OperandStack {
        OperandStack::default()
    }

    pub fn frame(&self) -> &StackFrame {
        &self.frame
    }

    /// Replace the current stack (eg. when placing a label with a recorded frame)
    pub fn set_frame(&mut self, frame: StackFrame) {
        self.frame = frame;
        self.max_stack = self.max_stack.max(self.depth());
    }

    /// Current depth in stack units
    pub fn depth(&self) -> usize {
        self.frame.offset_len().0
    }

    /// Deepest the stack has been so far
    pub fn max_stack(&self) -> usize {
        self.max_stack
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    pub fn clear(&mut self) {
        self.frame.clear();
    }

    pub fn push(&mut self, value: FrameElement, diagnostics: &mut Diagnostics) {
        self.frame.push(value);
        let depth = self.depth();
        if depth > MAX_STACK && self.max_stack <= MAX_STACK {
            diagnostics.error(VerifierErrorKind::StackOverflow(depth));
        }
        self.max_stack = self.max_stack.max(depth);
    }

    pub fn pop(&mut self, diagnostics: &mut Diagnostics) -> FrameElement {
        match self.frame.pop() {
            Some(value) => value,
            None => {
                diagnostics.error(VerifierErrorKind::EmptyStack);
                FrameElement::Error
            }
        }
    }

    /// Pop a value that must match `required`
    pub fn pop_expecting(
        &mut self,
        required: &FrameElement,
        diagnostics: &mut Diagnostics,
    ) -> FrameElement {
        let found = self.pop(diagnostics);
        if found.match_stack(required) {
            found
        } else {
            diagnostics.error(VerifierErrorKind::IncompatibleTypes {
                found,
                required: required.clone(),
            });
            required.clone()
        }
    }

    /// Pop any reference, initialized or not
    pub fn pop_reference(&mut self, diagnostics: &mut Diagnostics) -> FrameElement {
        let found = self.pop(diagnostics);
        if found.is_reference() || found == FrameElement::Error {
            found
        } else {
            let required = FrameElement::Object(RefType::Object(BinaryName::OBJECT));
            diagnostics.error(VerifierErrorKind::IncompatibleTypes {
                found,
                required: required.clone(),
            });
            required
        }
    }

    /// Pop the arguments of a method call, last argument first
    pub fn pop_arguments(
        &mut self,
        descriptor: &MethodDescriptor<BinaryName>,
        diagnostics: &mut Diagnostics,
    ) {
        for parameter in descriptor.parameters.iter().rev() {
            self.pop_expecting(&FrameElement::from(parameter.clone()), diagnostics);
        }
    }

    /// Push the result of a method call, if it has one
    pub fn push_return(
        &mut self,
        descriptor: &MethodDescriptor<BinaryName>,
        diagnostics: &mut Diagnostics,
    ) {
        if let Some(return_type) = &descriptor.return_type {
            self.push(FrameElement::from(return_type.clone()), diagnostics);
        }
    }

    /// Stack effect of a call: pop arguments, then the receiver (if `receiver` gives the type
    /// expected), then push the return value
    pub fn adjust_operand(
        &mut self,
        descriptor: &MethodDescriptor<BinaryName>,
        receiver: Option<&FrameElement>,
        diagnostics: &mut Diagnostics,
    ) {
        self.pop_arguments(descriptor, diagnostics);
        if let Some(receiver) = receiver {
            self.pop_expecting(receiver, diagnostics);
        }
        self.push_return(descriptor, diagnostics);
    }

    /// Apply a type-agnostic stack shuffle (`dup2_x1`, `swap`, etc.)
    ///
    /// Each form looks like `"cba:bacba"`: the values popped, a colon, the values pushed, with
    /// the top of the stack on the right. Lowercase letters are one-slot values and uppercase
    /// letters two-slot values. The first form whose widths match the top of the stack is
    /// applied. If none match, the values are dropped and `Error`s are pushed in their place.
    pub fn adjust_stack_op(&mut self, forms: &[&str], diagnostics: &mut Diagnostics) {
        let forms: Vec<(&str, &str)> = forms.iter().filter_map(|f| f.split_once(':')).collect();

        for (pops, pushes) in &forms {
            if !self.top_matches(pops) {
                continue;
            }
            let mut popped: Vec<(char, FrameElement)> = vec![];
            for letter in pops.chars().rev() {
                if let Some(value) = self.frame.pop() {
                    popped.push((letter, value));
                }
            }
            for letter in pushes.chars() {
                let value = popped
                    .iter()
                    .find(|(popped_letter, _)| *popped_letter == letter)
                    .map_or(FrameElement::Error, |(_, value)| value.clone());
                self.push(value, diagnostics);
            }
            return;
        }

        let (pops, pushes) = match forms.first() {
            Some(form) => *form,
            None => return,
        };
        match self.frame.peek(0) {
            None => diagnostics.error(VerifierErrorKind::EmptyStack),
            Some(_) if self.frame.len() < forms.iter().map(|f| f.0.len()).min().unwrap_or(0) => {
                diagnostics.error(VerifierErrorKind::EmptyStack)
            }
            Some(top) => diagnostics.error(VerifierErrorKind::InvalidWidth(top.slots())),
        }
        for _ in pops.chars() {
            self.frame.pop();
        }
        for _ in pushes.chars() {
            self.push(FrameElement::Error, diagnostics);
        }
    }

    /// Do the values on top of the stack have the widths in `pops`?
    fn top_matches(&self, pops: &str) -> bool {
        pops.chars().rev().enumerate().all(|(depth, letter)| {
            let width = if letter.is_ascii_uppercase() { 2 } else { 1 };
            self.frame
                .peek(depth)
                .map_or(false, |value| value.slots() == width)
        })
    }

    pub fn replace_where(&mut self, update: impl Fn(&FrameElement) -> Option<FrameElement>) {
        self.frame.replace_where(update)
    }
}
