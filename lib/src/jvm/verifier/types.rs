use crate::jvm::{BaseType, BinaryName, FieldType, RefType, RenderDescriptor};
use crate::util::Width;
use std::fmt;

/// Type of a single value in a local variable slot or on the operand stack
///
/// These are mostly the types from [this hierarchy][0], plus a few markers the assembler needs
/// while simulating a method body:
///
///   - `Top` is an unusable slot (never written, the upper half of a two-slot value, or the
///     result of merging incompatible types)
///   - `This` is the initialized receiver of an instance method
///   - `Unused` is a local that has been declared but not yet written
///   - `Error` is what analysis continues with after a reported problem, so that one mistake
///     doesn't cascade into many
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1.2
#[derive(Clone, Hash, Eq, PartialEq)]
pub enum FrameElement {
    Top,
    Integer,
    Float,
    Long,
    Double,

    /// Initialized object or array
    Object(RefType<BinaryName>),

    Null,

    /// State of an object after `new` has been called but `<init>` has not
    Uninitialized(UninitializedRefType),

    /// In a constructor, the receiver starts with this type then turns into `This` once the
    /// super (or another `this`) constructor has been called
    UninitializedThis,

    /// Pushed by `jsr`, consumed by `astore` and `ret`
    ReturnAddress,

    This,
    Unused,
    Error,
}

/// Type of the object created by a `new` instruction, along with the position of that
/// instruction in the method (two `new` of the same class are different values until
/// initialized)
#[derive(Clone, Hash, Eq, PartialEq, Debug)]
pub struct UninitializedRefType {
    /// Once the type is initialized, what will it be?
    pub class: BinaryName,

    /// Index of the `new` instruction in the method body
    pub site: usize,
}

impl FrameElement {
    /// Number of local variable slots (or stack units) the value occupies
    pub fn slots(&self) -> usize {
        match self {
            FrameElement::Long | FrameElement::Double => 2,
            _ => 1,
        }
    }

    /// Does the value occupy two slots?
    pub fn is_two(&self) -> bool {
        self.slots() == 2
    }

    /// Is this a reference (initialized or not)?
    ///
    /// This is what `aload` requires of a local variable.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            FrameElement::Object(_)
                | FrameElement::Null
                | FrameElement::This
                | FrameElement::Uninitialized(_)
                | FrameElement::UninitializedThis
        )
    }

    /// Is this an object that has been through its constructor?
    pub fn is_initialized_reference(&self) -> bool {
        matches!(
            self,
            FrameElement::Object(_) | FrameElement::Null | FrameElement::This
        )
    }

    /// Can this value be found where `required` is expected on the operand stack?
    ///
    /// There is no class hierarchy available, so any initialized reference is accepted where an
    /// object type is required. `Error` on either side always matches, since it was already
    /// reported.
    pub fn match_stack(&self, required: &FrameElement) -> bool {
        match (self, required) {
            (FrameElement::Error, _) | (_, FrameElement::Error) => true,
            (found, FrameElement::Object(_)) => found.is_initialized_reference(),
            (found, required) => found == required,
        }
    }

    /// Can this value be read from a local variable where `required` is expected?
    ///
    /// Same as `match_stack`, except that an `Unused` (declared but unwritten) local matches
    /// anything: the caller is expected to initialize the slot to `required`.
    pub fn match_local(&self, required: &FrameElement) -> bool {
        matches!(self, FrameElement::Unused) || self.match_stack(required)
    }

    /// Join of two types at a control flow merge
    ///
    /// Identical types join to themselves. Distinct references join to `java/lang/Object`
    /// (`null` is absorbed by the other reference). Anything else degrades to `Top`, so the slot
    /// must be written again before it is read. `Error` is sticky.
    pub fn combine(&self, other: &FrameElement) -> FrameElement {
        use FrameElement::*;

        if self == other {
            return self.clone();
        }
        match (self, other) {
            (Error, _) | (_, Error) => Error,
            (Null, Object(typ)) | (Object(typ), Null) => Object(typ.clone()),
            (Null, This) | (This, Null) => This,
            (Object(_) | This, Object(_) | This) => Object(RefType::Object(BinaryName::OBJECT)),
            _ => Top,
        }
    }

    /// Type of an instruction's type prefix (`i` in `iload`, `a` in `areturn`, etc.)
    ///
    /// `a` produces the most general object type.
    pub fn from_type_code(code: char) -> Option<FrameElement> {
        let elem = match code {
            'i' => FrameElement::Integer,
            'l' => FrameElement::Long,
            'f' => FrameElement::Float,
            'd' => FrameElement::Double,
            'a' => FrameElement::Object(RefType::Object(BinaryName::OBJECT)),
            _ => return None,
        };
        Some(elem)
    }

    /// Instruction type prefix that would operate on this type, if there is one
    pub fn type_code(&self) -> Option<char> {
        match self {
            FrameElement::Integer => Some('i'),
            FrameElement::Long => Some('l'),
            FrameElement::Float => Some('f'),
            FrameElement::Double => Some('d'),
            FrameElement::Object(_)
            | FrameElement::Null
            | FrameElement::This
            | FrameElement::Uninitialized(_)
            | FrameElement::UninitializedThis
            | FrameElement::ReturnAddress => Some('a'),
            FrameElement::Top | FrameElement::Unused | FrameElement::Error => None,
        }
    }

    /// Type of the first character of a field descriptor (references become the most general
    /// object type)
    pub fn from_descriptor_char(c: char) -> Option<FrameElement> {
        let elem = match c {
            'Z' | 'B' | 'C' | 'S' | 'I' => FrameElement::Integer,
            'J' => FrameElement::Long,
            'F' => FrameElement::Float,
            'D' => FrameElement::Double,
            'L' | '[' => FrameElement::Object(RefType::Object(BinaryName::OBJECT)),
            _ => return None,
        };
        Some(elem)
    }
}

impl From<FieldType<BinaryName>> for FrameElement {
    fn from(field_type: FieldType<BinaryName>) -> Self {
        match field_type {
            FieldType::Base(BaseType::Int)
            | FieldType::Base(BaseType::Char)
            | FieldType::Base(BaseType::Short)
            | FieldType::Base(BaseType::Byte)
            | FieldType::Base(BaseType::Boolean) => FrameElement::Integer,
            FieldType::Base(BaseType::Float) => FrameElement::Float,
            FieldType::Base(BaseType::Long) => FrameElement::Long,
            FieldType::Base(BaseType::Double) => FrameElement::Double,
            FieldType::Ref(ref_type) => FrameElement::Object(ref_type),
        }
    }
}

impl Width for FrameElement {
    fn width(&self) -> usize {
        self.slots()
    }
}

impl fmt::Debug for FrameElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameElement::Top => f.write_str("top"),
            FrameElement::Integer => f.write_str("int"),
            FrameElement::Float => f.write_str("float"),
            FrameElement::Long => f.write_str("long"),
            FrameElement::Double => f.write_str("double"),
            FrameElement::Object(ref_type) => f.write_str(&ref_type.render()),
            FrameElement::Null => f.write_str("null"),
            FrameElement::Uninitialized(uninit) => {
                write!(f, "uninitialized({:?} @ {})", uninit.class, uninit.site)
            }
            FrameElement::UninitializedThis => f.write_str("uninitializedThis"),
            FrameElement::ReturnAddress => f.write_str("returnAddress"),
            FrameElement::This => f.write_str("this"),
            FrameElement::Unused => f.write_str("unused"),
            FrameElement::Error => f.write_str("error"),
        }
    }
}
