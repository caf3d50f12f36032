use super::FrameElement;
use crate::jvm::{
    BinaryName, Diagnostics, FieldType, Name, RefType, UnqualifiedName, VerifierErrorKind,
};
use bitflags::bitflags;
use std::collections::BTreeMap;

/// Most local variable slots a method can have (`max_locals` is a `u16`)
pub const MAX_LOCALS: usize = u16::MAX as usize;

/// Local variable operand of an instruction
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LocalVar {
    /// Explicit slot number
    Index(u16),

    /// Symbolic name, mapped to a slot number on first definition
    Name(String),
}

/// Types of the local variable slots at one point in the method
///
/// A two-slot value lives in its lower slot; the upper slot always holds `Top`. Slots past the
/// end of the vector are implicitly `Top`.
#[derive(Clone, Debug, Default)]
pub struct LocalFrame {
    slots: Vec<FrameElement>,
}

impl PartialEq for LocalFrame {
    fn eq(&self, other: &Self) -> bool {
        self.is_equivalent(other)
    }
}

impl Eq for LocalFrame {}

impl LocalFrame {
    pub fn new() -> LocalFrame {
        LocalFrame::default()
    }

    /// Frame with the given values laid out one after another (eg. method parameters)
    pub fn from_values(values: impl IntoIterator<Item = FrameElement>) -> LocalFrame {
        let mut frame = LocalFrame::new();
        let mut index = 0;
        for value in values {
            let width = value.slots();
            frame.set(index, value);
            index += width;
        }
        frame
    }

    /// Number of slots tracked (including upper halves)
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Type in a slot (`Top` past the end)
    pub fn get(&self, index: usize) -> &FrameElement {
        self.slots.get(index).unwrap_or(&FrameElement::Top)
    }

    pub fn slots(&self) -> &[FrameElement] {
        &self.slots
    }

    /// Overwrite a slot (and the next one, for a two-slot value)
    ///
    /// Writing into the upper half of a two-slot value invalidates its lower half.
    pub fn set(&mut self, index: usize, value: FrameElement) {
        let width = value.slots();
        if self.slots.len() < index + width {
            self.slots.resize(index + width, FrameElement::Top);
        }
        if index > 0 && self.slots[index - 1].is_two() {
            self.slots[index - 1] = FrameElement::Top;
        }
        self.slots[index] = value;
        if width == 2 {
            self.slots[index + 1] = FrameElement::Top;
        }
    }

    /// Slot-wise join, padding the shorter frame with `Top`
    pub fn combine(&self, other: &LocalFrame) -> LocalFrame {
        let len = self.slots.len().max(other.slots.len());
        let mut slots: Vec<FrameElement> = (0..len)
            .map(|index| self.get(index).combine(other.get(index)))
            .collect();
        while slots.last() == Some(&FrameElement::Top) {
            slots.pop();
        }
        LocalFrame { slots }
    }

    /// Same types in every slot, ignoring trailing `Top` slots
    pub fn is_equivalent(&self, other: &LocalFrame) -> bool {
        let len = self.slots.len().max(other.slots.len());
        (0..len).all(|index| self.get(index) == other.get(index))
    }

    /// Would joining `incoming` into this frame leave it unchanged?
    pub fn accepts(&self, incoming: &LocalFrame) -> bool {
        self.is_equivalent(&self.combine(incoming))
    }

    pub fn replace_where(&mut self, update: impl Fn(&FrameElement) -> Option<FrameElement>) {
        for slot in &mut self.slots {
            if let Some(updated) = update(slot) {
                *slot = updated;
            }
        }
    }
}

/// Can `name` be bound to a local? (an unqualified name not starting with a digit)
fn is_local_name(name: &str) -> bool {
    let starts_with_digit = name.chars().next().map_or(false, |c| c.is_ascii_digit());
    !starts_with_digit && UnqualifiedName::check_valid(name).is_ok()
}

bitflags! {
    /// What has happened to a local variable slot over the whole method
    pub struct SlotUsage: u8 {
        const WRITTEN = 0x01;
        const READ = 0x02;
        const ANNOTATED = 0x04;
        const PARAMETER = 0x08;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Binding {
    slot: u16,
    width: usize,
}

/// Tracks local variables while a method body is simulated
///
/// Besides the current `LocalFrame` (which gets swapped out at labels), this keeps what is true
/// for the whole method: the `max_locals` high-water mark, symbolic names, and slot usage.
#[derive(Clone, Debug)]
pub struct LocalVars {
    frame: LocalFrame,
    max_locals: usize,
    limit: usize,
    symbolic: bool,
    names: BTreeMap<String, Binding>,
    next_free: usize,
    usage: Vec<SlotUsage>,
}

impl LocalVars {
    /// Tracker with no locals in scope
    ///
    /// `limit` is the number of slots available. With `symbolic`, locals may also be referred
    /// to by name.
    pub fn new(limit: usize, symbolic: bool) -> LocalVars {
        LocalVars {
            frame: LocalFrame::new(),
            max_locals: 0,
            limit: limit.min(MAX_LOCALS),
            symbolic,
            names: BTreeMap::new(),
            next_free: 0,
            usage: vec![],
        }
    }

    /// Tracker for the entry of a method: the receiver (if any) in slot 0, then parameters
    pub fn for_method(
        receiver: Option<FrameElement>,
        parameters: &[FieldType<BinaryName>],
        limit: usize,
        symbolic: bool,
    ) -> LocalVars {
        let mut locals = LocalVars::new(limit, symbolic);
        let has_receiver = receiver.is_some();
        let values = receiver
            .into_iter()
            .chain(parameters.iter().cloned().map(FrameElement::from));

        let mut index = 0;
        for value in values {
            let width = value.slots();
            locals.frame.set(index, value);
            locals.mark(index, SlotUsage::WRITTEN | SlotUsage::PARAMETER);
            index += width;
        }
        locals.max_locals = index;
        locals.next_free = index;

        if has_receiver {
            let this = Binding { slot: 0, width: 1 };
            locals.names.insert(UnqualifiedName::THIS.as_str().to_owned(), this);
        }
        locals
    }

    pub fn frame(&self) -> &LocalFrame {
        &self.frame
    }

    /// Replace the current frame (eg. when placing a label with a recorded frame)
    pub fn set_frame(&mut self, frame: LocalFrame) {
        self.frame = frame;
    }

    pub fn max_locals(&self) -> usize {
        self.max_locals
    }

    /// Slot number for a local variable operand
    ///
    /// A name seen for the first time is bound to the next free slot when `defining` (a store),
    /// and reported otherwise. `width` is the number of slots the instruction accesses.
    pub fn resolve(
        &mut self,
        var: &LocalVar,
        width: usize,
        defining: bool,
        diagnostics: &mut Diagnostics,
    ) -> u16 {
        let name = match var {
            LocalVar::Index(index) => return *index,
            LocalVar::Name(name) => name,
        };

        if !self.symbolic {
            diagnostics.error(VerifierErrorKind::SymbolicLocalsDisabled(name.clone()));
        }

        if let Some(binding) = self.names.get(name).copied() {
            if defining && name == UnqualifiedName::THIS.as_str() {
                diagnostics.error(VerifierErrorKind::RedefinedReceiver);
            } else if binding.width != width {
                diagnostics.error(VerifierErrorKind::InvalidWidth(width));
            }
            return binding.slot;
        }

        if !defining {
            diagnostics.error(VerifierErrorKind::UnknownLocalName(name.clone()));
        } else if !is_local_name(name) {
            diagnostics.error(VerifierErrorKind::InvalidLocalName(name.clone()));
        }
        self.bind(name, width)
    }

    /// Declare a symbolic name, returning the slot it is bound to
    pub fn declare(
        &mut self,
        name: &str,
        width: usize,
        diagnostics: &mut Diagnostics,
    ) -> Option<u16> {
        if !self.symbolic {
            diagnostics.error(VerifierErrorKind::SymbolicLocalsDisabled(name.to_owned()));
        }
        if name == UnqualifiedName::THIS.as_str() {
            diagnostics.error(VerifierErrorKind::RedefinedReceiver);
            return None;
        }
        if !is_local_name(name) {
            diagnostics.error(VerifierErrorKind::InvalidLocalName(name.to_owned()));
            return None;
        }
        if self.names.contains_key(name) {
            diagnostics.error(VerifierErrorKind::DuplicateLocalName(name.to_owned()));
            return None;
        }
        Some(self.bind(name, width))
    }

    fn bind(&mut self, name: &str, width: usize) -> u16 {
        let slot = self.next_free.max(self.max_locals);
        self.next_free = slot + width;
        let slot = u16::try_from(slot).unwrap_or(u16::MAX);
        log::trace!("binding local '{}' to slot {}", name, slot);
        self.names.insert(name.to_owned(), Binding { slot, width });
        slot
    }

    /// Read a local, checking it has the required type
    ///
    /// Returns the type found (or `required`, after reporting, if it did not match). A declared
    /// but unwritten local is initialized to `required`.
    pub fn load(
        &mut self,
        index: u16,
        required: &FrameElement,
        diagnostics: &mut Diagnostics,
    ) -> FrameElement {
        let index = index as usize;
        if !self.in_range(index, required.slots(), diagnostics) {
            return required.clone();
        }
        self.mark(index, SlotUsage::READ);

        let found = self.frame.get(index).clone();
        if found == FrameElement::Unused {
            self.frame.set(index, required.clone());
            required.clone()
        } else if found.match_local(required) {
            found
        } else {
            diagnostics.error(VerifierErrorKind::IncompatibleTypes {
                found,
                required: required.clone(),
            });
            required.clone()
        }
    }

    /// Read a local holding any reference (`aload`), including uninitialized ones
    pub fn load_reference(&mut self, index: u16, diagnostics: &mut Diagnostics) -> FrameElement {
        let any_object = FrameElement::Object(RefType::Object(BinaryName::OBJECT));
        let found = self.frame.get(index as usize).clone();
        if found.is_reference() {
            self.mark(index as usize, SlotUsage::READ);
            found
        } else {
            self.load(index, &any_object, diagnostics)
        }
    }

    /// Write a local, invalidating whatever the write overlaps
    pub fn store(&mut self, index: u16, value: FrameElement, diagnostics: &mut Diagnostics) {
        let index = index as usize;
        let width = value.slots();
        if !self.in_range(index, width, diagnostics) {
            return;
        }
        self.frame.set(index, value);
        self.max_locals = self.max_locals.max(index + width);
        self.mark(index, SlotUsage::WRITTEN);
    }

    /// Record a declaration for a slot (eg. from a local variable table entry)
    ///
    /// A slot that holds nothing usable becomes `Unused`, so the first read initializes it.
    pub fn annotate(&mut self, index: u16, declared: &FrameElement, diagnostics: &mut Diagnostics) {
        let index = index as usize;
        let width = declared.slots();
        if !self.in_range(index, width, diagnostics) {
            return;
        }
        if *self.frame.get(index) == FrameElement::Top {
            self.frame.set(index, FrameElement::Unused);
        }
        self.max_locals = self.max_locals.max(index + width);
        self.mark(index, SlotUsage::ANNOTATED);
    }

    pub fn replace_where(&mut self, update: impl Fn(&FrameElement) -> Option<FrameElement>) {
        self.frame.replace_where(update)
    }

    /// Usage flags for a slot
    pub fn usage(&self, index: usize) -> SlotUsage {
        self.usage.get(index).copied().unwrap_or_else(SlotUsage::empty)
    }

    /// Report locals that were declared but never written and, if asked for, locals written but
    /// never read
    pub fn report_usage(&self, warn_unread: bool, diagnostics: &mut Diagnostics) {
        for (index, usage) in self.usage.iter().enumerate() {
            if usage.contains(SlotUsage::ANNOTATED) && !usage.contains(SlotUsage::WRITTEN) {
                diagnostics.warning(VerifierErrorKind::NeverWritten(index));
            }
            let unread = usage.contains(SlotUsage::WRITTEN)
                && !usage.intersects(SlotUsage::READ | SlotUsage::PARAMETER);
            if warn_unread && unread {
                diagnostics.warning(VerifierErrorKind::NeverRead(index));
            }
        }
    }

    fn in_range(&self, index: usize, width: usize, diagnostics: &mut Diagnostics) -> bool {
        if index + width > self.limit {
            diagnostics.error(VerifierErrorKind::InvalidIndex(index));
            false
        } else {
            true
        }
    }

    fn mark(&mut self, index: usize, usage: SlotUsage) {
        if self.usage.len() <= index {
            self.usage.resize(index + 1, SlotUsage::empty());
        }
        self.usage[index] |= usage;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::Severity;
    use FrameElement::*;

    fn kinds(diagnostics: Diagnostics) -> Vec<VerifierErrorKind> {
        diagnostics.into_vec().into_iter().map(|d| d.kind).collect()
    }

    #[test]
    fn two_slot_values() {
        let mut frame = LocalFrame::from_values([Integer, Long, Float]);
        assert_eq!(frame.slots(), &[Integer, Long, Top, Float]);

        // Writing the upper half kills the lower half
        frame.set(2, Integer);
        assert_eq!(frame.slots(), &[Integer, Top, Integer, Float]);

        // Writing a two slot value over two one slot values
        frame.set(2, Double);
        assert_eq!(frame.slots(), &[Integer, Top, Double, Top]);
    }

    #[test]
    fn combine_frames() {
        let a = LocalFrame::from_values([Integer, Long]);
        let b = LocalFrame::from_values([Integer, Integer, Integer]);
        let joined = a.combine(&b);
        assert_eq!(joined.slots(), &[Integer]);
        assert_eq!(joined, b.combine(&a));
        assert!(a.combine(&a).is_equivalent(&a));
        assert!(joined.accepts(&a));
        assert!(!a.accepts(&b));
    }

    #[test]
    fn load_and_store() {
        let mut diagnostics = Diagnostics::new();
        let mut locals = LocalVars::for_method(Some(This), &[FieldType::int()], 10, false);
        assert_eq!(locals.max_locals(), 2);

        assert_eq!(locals.load(1, &Integer, &mut diagnostics), Integer);
        locals.store(2, Long, &mut diagnostics);
        assert_eq!(locals.max_locals(), 4);
        assert_eq!(locals.load(2, &Long, &mut diagnostics), Long);
        assert!(diagnostics.is_empty());

        // Upper half of a long isn't readable, and recovery uses the required type
        assert_eq!(locals.load(3, &Integer, &mut diagnostics), Integer);
        assert_eq!(
            kinds(diagnostics),
            vec![VerifierErrorKind::IncompatibleTypes {
                found: Top,
                required: Integer
            }]
        );
    }

    #[test]
    fn out_of_range() {
        let mut diagnostics = Diagnostics::new();
        let mut locals = LocalVars::new(2, false);
        locals.store(1, Double, &mut diagnostics);
        assert_eq!(locals.max_locals(), 0);
        assert_eq!(kinds(diagnostics), vec![VerifierErrorKind::InvalidIndex(1)]);
    }

    #[test]
    fn annotated_locals_initialize_on_read() {
        let mut diagnostics = Diagnostics::new();
        let mut locals = LocalVars::new(10, false);
        locals.annotate(0, &Float, &mut diagnostics);
        assert_eq!(locals.frame().get(0), &Unused);
        assert_eq!(locals.load(0, &Float, &mut diagnostics), Float);
        assert_eq!(locals.frame().get(0), &Float);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn symbolic_names() {
        let mut diagnostics = Diagnostics::new();
        let mut locals = LocalVars::for_method(Some(This), &[FieldType::long()], 10, true);

        let this = LocalVar::Name(String::from("this"));
        assert_eq!(locals.resolve(&this, 1, false, &mut diagnostics), 0);

        // Names are bound after the parameters, respecting width
        let total = LocalVar::Name(String::from("total"));
        assert_eq!(locals.resolve(&total, 2, true, &mut diagnostics), 3);
        assert_eq!(locals.declare("count", 1, &mut diagnostics), Some(5));
        assert!(diagnostics.is_empty());

        assert_eq!(locals.declare("this", 1, &mut diagnostics), None);
        assert_eq!(locals.declare("count", 1, &mut diagnostics), None);
        assert_eq!(locals.declare("2x", 1, &mut diagnostics), None);
        assert_eq!(locals.declare("a/b", 1, &mut diagnostics), None);
        assert_eq!(
            kinds(diagnostics),
            vec![
                VerifierErrorKind::RedefinedReceiver,
                VerifierErrorKind::DuplicateLocalName(String::from("count")),
                VerifierErrorKind::InvalidLocalName(String::from("2x")),
                VerifierErrorKind::InvalidLocalName(String::from("a/b")),
            ]
        );
    }

    #[test]
    fn unknown_names_are_reported() {
        let mut diagnostics = Diagnostics::new();
        let mut locals = LocalVars::new(10, true);
        let missing = LocalVar::Name(String::from("missing"));
        assert_eq!(locals.resolve(&missing, 1, false, &mut diagnostics), 0);
        assert_eq!(
            kinds(diagnostics),
            vec![VerifierErrorKind::UnknownLocalName(String::from("missing"))]
        );
    }

    #[test]
    fn usage_report() {
        let mut diagnostics = Diagnostics::new();
        let mut locals = LocalVars::for_method(None, &[FieldType::int()], 10, false);
        locals.store(1, Integer, &mut diagnostics);
        locals.annotate(2, &Integer, &mut diagnostics);

        let mut report = Diagnostics::new();
        locals.report_usage(true, &mut report);
        let report = report.into_vec();
        assert!(report.iter().all(|d| d.severity == Severity::Warning));
        assert_eq!(
            report.into_iter().map(|d| d.kind).collect::<Vec<_>>(),
            vec![
                VerifierErrorKind::NeverRead(1),
                VerifierErrorKind::NeverWritten(2),
            ]
        );
    }
}
