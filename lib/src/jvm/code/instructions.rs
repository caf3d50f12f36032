//! Instructions as the assembler sees them
//!
//! The representation is slightly different from the encoded bytecode, to make the layout pass
//! free to pick encodings:
//!
//!   - `wide`, `ldc_w`, `goto_w`, `jsr_w` and `iload_0`-style opcodes don't show up: loads,
//!     stores, constants and branches carry their operand and the shortest encoding that fits is
//!     chosen when the method is laid out
//!
//!   - constant pool operands carry both their index (for encoding) and their type (for
//!     simulating the frame)
//!

use super::jump_encoding::{switch_padding, Sizing};
use super::{Effect, LabelId, Opcode, Shape};
use crate::jvm::verifier::{
    FrameElement, FrameState, LocalVar, LocalVars, MethodContext, UninitializedRefType,
};
use crate::jvm::{
    BaseType, BinaryName, Diagnostics, FieldType, MethodDescriptor, RefType, Serialize,
    UnqualifiedName, VerifierErrorKind, Version,
};
use byteorder::WriteBytesExt;
use std::io::{Error as IoError, ErrorKind, Result};

/// Value of a loadable constant pool entry
#[derive(Clone, Debug, PartialEq)]
pub enum ConstantValue {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(RefType<BinaryName>),
    MethodType(MethodDescriptor<BinaryName>),

    /// Method handle, described by its kind and reference (`invokestatic Foo.bar()V`)
    MethodHandle(String),

    /// Dynamically-computed constant of the given type
    Dynamic(FieldType<BinaryName>),
}

impl ConstantValue {
    /// Type of the value pushed when loading the constant
    pub fn frame_element(&self) -> FrameElement {
        match self {
            ConstantValue::Integer(_) => FrameElement::Integer,
            ConstantValue::Float(_) => FrameElement::Float,
            ConstantValue::Long(_) => FrameElement::Long,
            ConstantValue::Double(_) => FrameElement::Double,
            ConstantValue::String(_) => FrameElement::Object(RefType::Object(BinaryName::STRING)),
            ConstantValue::Class(_) => FrameElement::Object(RefType::Object(BinaryName::CLASS)),
            ConstantValue::MethodType(_) => {
                FrameElement::Object(RefType::Object(BinaryName::METHODTYPE))
            }
            ConstantValue::MethodHandle(_) => {
                FrameElement::Object(RefType::Object(BinaryName::METHODHANDLE))
            }
            ConstantValue::Dynamic(field_type) => FrameElement::from(field_type.clone()),
        }
    }

    /// First class file version where the constant may be loaded
    pub fn since(&self) -> Version {
        match self {
            ConstantValue::Class(_) => Version::new(49),
            ConstantValue::MethodType(_) | ConstantValue::MethodHandle(_) => Version::JAVA7,
            ConstantValue::Dynamic(_) => Version::JAVA11,
            _ => Version::JAVA1,
        }
    }
}

/// Loadable constant pool entry
#[derive(Clone, Debug, PartialEq)]
pub struct Constant {
    pub index: u16,
    pub value: ConstantValue,
}

/// Class (or array type) constant pool entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassRef {
    pub index: u16,
    pub class: RefType<BinaryName>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldRef {
    pub index: u16,
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodRef {
    pub index: u16,
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,

    /// Does the reference point to an interface method?
    pub interface: bool,
}

/// Call site of an `invokedynamic`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DynamicRef {
    pub index: u16,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    /// Instruction without operands
    Plain(Opcode),

    /// Local variable load or store, or `ret`
    Local(Opcode, LocalVar),

    /// `iinc`
    Increment(LocalVar, i16),

    /// `bipush` or `sipush`
    Immediate(Opcode, i32),

    NewArray(BaseType),

    /// `ldc` (also standing for `ldc_w`) or `ldc2_w`
    Constant(Opcode, Constant),

    /// `new`, `anewarray`, `checkcast`, or `instanceof`
    Class(Opcode, ClassRef),

    MultiANewArray(ClassRef, u8),
    Field(Opcode, FieldRef),
    Invoke(Opcode, MethodRef),
    InvokeDynamic(DynamicRef),

    /// Conditional branch, `goto`, or `jsr`
    Branch(Opcode, LabelId),

    TableSwitch {
        low: i32,
        default: LabelId,
        targets: Vec<LabelId>,
    },

    LookupSwitch {
        default: LabelId,

        /// Sorted by key
        pairs: Vec<(i32, LabelId)>,
    },
}

/// Type read or written by a local variable instruction (`None` for `aload`/`astore`)
fn local_type(opcode: Opcode) -> Option<FrameElement> {
    match opcode {
        Opcode::ILOAD | Opcode::ISTORE => Some(FrameElement::Integer),
        Opcode::LLOAD | Opcode::LSTORE => Some(FrameElement::Long),
        Opcode::FLOAD | Opcode::FSTORE => Some(FrameElement::Float),
        Opcode::DLOAD | Opcode::DSTORE => Some(FrameElement::Double),
        Opcode::RET => Some(FrameElement::ReturnAddress),
        _ => None,
    }
}

fn is_store(opcode: Opcode) -> bool {
    matches!(opcode.0, 0x36..=0x3a)
}

fn any_object() -> FrameElement {
    FrameElement::Object(RefType::Object(BinaryName::OBJECT))
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Plain(op)
            | Instruction::Local(op, _)
            | Instruction::Immediate(op, _)
            | Instruction::Constant(op, _)
            | Instruction::Class(op, _)
            | Instruction::Field(op, _)
            | Instruction::Invoke(op, _)
            | Instruction::Branch(op, _) => *op,
            Instruction::Increment(_, _) => Opcode::IINC,
            Instruction::NewArray(_) => Opcode::NEWARRAY,
            Instruction::MultiANewArray(_, _) => Opcode::MULTIANEWARRAY,
            Instruction::InvokeDynamic(_) => Opcode::INVOKEDYNAMIC,
            Instruction::TableSwitch { .. } => Opcode::TABLESWITCH,
            Instruction::LookupSwitch { .. } => Opcode::LOOKUPSWITCH,
        }
    }

    /// Swap explicitly wide opcodes (`goto_w`, `jsr_w`, `ldc_w`) for their short forms
    ///
    /// Which form gets encoded is decided by the layout, not by the opcode pushed.
    pub fn canonicalize(&mut self) {
        if let Instruction::Branch(opcode, _) | Instruction::Constant(opcode, _) = self {
            *opcode = opcode.canonical();
        }
    }

    /// First class file version the instruction may appear in
    pub fn since(&self) -> Version {
        match self {
            Instruction::Constant(_, constant) => constant.value.since().max(self.opcode().since()),
            other => other.opcode().since(),
        }
    }

    /// Labels the instruction may jump to
    pub fn targets(&self) -> Vec<LabelId> {
        match self {
            Instruction::Branch(_, target) => vec![*target],
            Instruction::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default).chain(targets.iter().copied()).collect(),
            Instruction::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, target)| *target))
                .collect(),
            _ => vec![],
        }
    }

    /// Replace symbolic local variable names with slot numbers
    pub fn resolve_locals(&mut self, locals: &mut LocalVars, diagnostics: &mut Diagnostics) {
        match self {
            Instruction::Local(opcode, var @ LocalVar::Name(_)) => {
                let width = local_type(*opcode).map_or(1, |typ| typ.slots());
                let index = locals.resolve(var, width, is_store(*opcode), diagnostics);
                *var = LocalVar::Index(index);
            }
            Instruction::Increment(var @ LocalVar::Name(_), _) => {
                let index = locals.resolve(var, 1, false, diagnostics);
                *var = LocalVar::Index(index);
            }
            _ => (),
        }
    }

    /// Check the instruction against the frame, then update the frame with its effect
    ///
    /// `position` is the index of the instruction in the method body (it distinguishes the
    /// objects created by different `new` instructions).
    pub fn adjust(
        &self,
        state: &mut FrameState,
        method: &MethodContext,
        position: usize,
        diagnostics: &mut Diagnostics,
    ) {
        let stack = &mut state.stack;
        match self {
            Instruction::Plain(opcode) => match opcode.info().map(|info| info.effect) {
                Some(Effect::Typed(pops, pushes)) => {
                    adjust_typed(state, pops, pushes, diagnostics)
                }
                Some(Effect::Shuffle(forms)) => stack.adjust_stack_op(forms, diagnostics),
                _ => adjust_plain(*opcode, state, method, diagnostics),
            },

            Instruction::Local(opcode, var) => {
                let index = state.locals.resolve(var, 1, is_store(*opcode), diagnostics);
                match (*opcode, local_type(*opcode)) {
                    (Opcode::RET, _) => {
                        state
                            .locals
                            .load(index, &FrameElement::ReturnAddress, diagnostics);
                    }
                    (Opcode::ALOAD, _) => {
                        let value = state.locals.load_reference(index, diagnostics);
                        state.stack.push(value, diagnostics);
                    }
                    (Opcode::ASTORE, _) => {
                        let value = state.stack.pop(diagnostics);
                        let value = match value {
                            value if value.is_reference() => value,
                            other @ (FrameElement::ReturnAddress | FrameElement::Error) => other,
                            found => {
                                diagnostics.error(VerifierErrorKind::IncompatibleTypes {
                                    found,
                                    required: any_object(),
                                });
                                any_object()
                            }
                        };
                        state.locals.store(index, value, diagnostics);
                    }
                    (opcode, Some(typ)) if is_store(opcode) => {
                        let value = state.stack.pop_expecting(&typ, diagnostics);
                        state.locals.store(index, value, diagnostics);
                    }
                    (_, Some(typ)) => {
                        let value = state.locals.load(index, &typ, diagnostics);
                        state.stack.push(value, diagnostics);
                    }
                    (_, None) => (),
                }
            }

            Instruction::Increment(var, _) => {
                let index = state.locals.resolve(var, 1, false, diagnostics);
                state.locals.load(index, &FrameElement::Integer, diagnostics);
                state
                    .locals
                    .store(index, FrameElement::Integer, diagnostics);
            }

            Instruction::Immediate(_, _) => stack.push(FrameElement::Integer, diagnostics),

            Instruction::NewArray(element_type) => {
                stack.pop_expecting(&FrameElement::Integer, diagnostics);
                let array = RefType::array(FieldType::Base(*element_type));
                stack.push(FrameElement::Object(array), diagnostics);
            }

            Instruction::Constant(opcode, constant) => {
                let value = constant.value.frame_element();
                if (*opcode == Opcode::LDC2_W) != value.is_two() {
                    diagnostics.error(VerifierErrorKind::InvalidConstant);
                }
                stack.push(value, diagnostics);
            }

            Instruction::Class(opcode, class_ref) => {
                adjust_class(*opcode, &class_ref.class, state, position, diagnostics)
            }

            Instruction::MultiANewArray(class_ref, dimensions) => {
                let dimensions = *dimensions as usize;
                if dimensions == 0 || class_ref.class.dimensions() < dimensions {
                    let rendered = format!("{:?}", class_ref.class);
                    diagnostics.error(VerifierErrorKind::InvalidArrayType(rendered));
                }
                for _ in 0..dimensions {
                    stack.pop_expecting(&FrameElement::Integer, diagnostics);
                }
                stack.push(FrameElement::Object(class_ref.class.clone()), diagnostics);
            }

            Instruction::Field(opcode, field) => adjust_field(*opcode, field, state, method, diagnostics),

            Instruction::Invoke(opcode, invoked) => adjust_invoke(*opcode, invoked, state, diagnostics),

            Instruction::InvokeDynamic(call_site) => {
                stack.adjust_operand(&call_site.descriptor, None, diagnostics)
            }

            Instruction::Branch(opcode, _) => {
                if let Some(Effect::Typed(pops, pushes)) = opcode.info().map(|i| i.effect) {
                    adjust_typed(state, pops, pushes, diagnostics);
                }
            }

            Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => {
                stack.pop_expecting(&FrameElement::Integer, diagnostics);
            }
        }
    }

    /// Same as `adjust`, taking the frame before the instruction and returning the frame after
    pub fn apply(
        &self,
        mut state: FrameState,
        method: &MethodContext,
        position: usize,
        diagnostics: &mut Diagnostics,
    ) -> FrameState {
        self.adjust(&mut state, method, position, diagnostics);
        state
    }

    /// How the length of the instruction depends on the layout
    ///
    /// `label_positions` maps every label to the index of the instruction it is placed before.
    pub fn sizing(&self, label_positions: &[usize]) -> Sizing {
        match self {
            Instruction::Branch(opcode, target) => Sizing::Branch {
                target: label_positions[target.index()],
                short: 3,
                wide: if opcode.is_conditional() { 8 } else { 5 },
            },
            Instruction::TableSwitch { targets, .. } => Sizing::Switch {
                payload: 12 + 4 * targets.len(),
            },
            Instruction::LookupSwitch { pairs, .. } => Sizing::Switch {
                payload: 8 + 8 * pairs.len(),
            },
            other => Sizing::Fixed(other.fixed_length()),
        }
    }

    /// Shortest the instruction can be, wherever it ends up
    pub fn min_length(&self) -> usize {
        match self {
            Instruction::Branch(_, _) => 3,
            other => other.fixed_length(),
        }
    }

    /// Longest the instruction can be, wherever it ends up
    pub fn max_length(&self) -> usize {
        match self {
            Instruction::Branch(opcode, _) if opcode.is_conditional() => 8,
            Instruction::Branch(_, _) => 5,
            Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => {
                self.fixed_length() + 3
            }
            other => other.fixed_length(),
        }
    }

    /// Length in bytes, not counting switch padding or branch widening
    fn fixed_length(&self) -> usize {
        match self {
            Instruction::Plain(_) => 1,
            Instruction::Local(opcode, LocalVar::Index(index)) => {
                if opcode.with_implicit_local(*index).is_some() {
                    1
                } else if *index <= u8::MAX as u16 {
                    2
                } else {
                    4
                }
            }
            Instruction::Local(_, LocalVar::Name(_)) => 4,
            Instruction::Increment(LocalVar::Index(index), delta) => {
                if *index <= u8::MAX as u16 && i8::try_from(*delta).is_ok() {
                    3
                } else {
                    6
                }
            }
            Instruction::Increment(LocalVar::Name(_), _) => 6,
            Instruction::Immediate(Opcode::BIPUSH, _) => 2,
            Instruction::Immediate(_, _) => 3,
            Instruction::NewArray(_) => 2,
            Instruction::Constant(Opcode::LDC, constant) if constant.index <= u8::MAX as u16 => 2,
            Instruction::Constant(_, _) => 3,
            Instruction::Class(_, _) | Instruction::Field(_, _) => 3,
            Instruction::MultiANewArray(_, _) => 4,
            Instruction::Invoke(Opcode::INVOKEINTERFACE, _) => 5,
            Instruction::Invoke(_, _) => 3,
            Instruction::InvokeDynamic(_) => 5,
            Instruction::Branch(_, _) => 3,
            Instruction::TableSwitch { targets, .. } => 1 + 12 + 4 * targets.len(),
            Instruction::LookupSwitch { pairs, .. } => 1 + 8 + 8 * pairs.len(),
        }
    }

    /// Write out the instruction
    ///
    /// `offset` is where the instruction starts in the code array, `wide` is the form picked for
    /// a branch, and `label_offsets` maps every label to its offset.
    pub fn serialize_at<W: WriteBytesExt>(
        &self,
        writer: &mut W,
        offset: usize,
        wide: bool,
        label_offsets: &[usize],
    ) -> Result<()> {
        let target_offset = |label: &LabelId| -> Result<usize> {
            label_offsets
                .get(label.index())
                .copied()
                .ok_or_else(|| IoError::new(ErrorKind::InvalidInput, "label without offset"))
        };

        match self {
            Instruction::Plain(opcode) => opcode.0.serialize(writer)?,

            Instruction::Local(opcode, var) => {
                let index = local_index(var)?;
                if let Some(short) = opcode.with_implicit_local(index) {
                    short.0.serialize(writer)?;
                } else if let Ok(index) = u8::try_from(index) {
                    opcode.0.serialize(writer)?;
                    index.serialize(writer)?;
                } else {
                    Opcode::WIDE.0.serialize(writer)?;
                    opcode.0.serialize(writer)?;
                    index.serialize(writer)?;
                }
            }

            Instruction::Increment(var, delta) => {
                let index = local_index(var)?;
                match (u8::try_from(index), i8::try_from(*delta)) {
                    (Ok(index), Ok(delta)) => {
                        Opcode::IINC.0.serialize(writer)?;
                        index.serialize(writer)?;
                        delta.serialize(writer)?;
                    }
                    _ => {
                        Opcode::WIDE.0.serialize(writer)?;
                        Opcode::IINC.0.serialize(writer)?;
                        index.serialize(writer)?;
                        delta.serialize(writer)?;
                    }
                }
            }

            Instruction::Immediate(opcode, value) => {
                opcode.0.serialize(writer)?;
                if *opcode == Opcode::BIPUSH {
                    narrow::<i8>(*value)?.serialize(writer)?;
                } else {
                    narrow::<i16>(*value)?.serialize(writer)?;
                }
            }

            Instruction::NewArray(element_type) => {
                Opcode::NEWARRAY.0.serialize(writer)?;
                element_type.array_type_code().serialize(writer)?;
            }

            Instruction::Constant(opcode, constant) => match u8::try_from(constant.index) {
                Ok(index) if *opcode == Opcode::LDC => {
                    Opcode::LDC.0.serialize(writer)?;
                    index.serialize(writer)?;
                }
                _ => {
                    let opcode = if *opcode == Opcode::LDC {
                        Opcode::LDC_W
                    } else {
                        *opcode
                    };
                    opcode.0.serialize(writer)?;
                    constant.index.serialize(writer)?;
                }
            },

            Instruction::Class(opcode, ClassRef { index, .. })
            | Instruction::Field(opcode, FieldRef { index, .. }) => {
                opcode.0.serialize(writer)?;
                index.serialize(writer)?;
            }

            Instruction::MultiANewArray(class_ref, dimensions) => {
                Opcode::MULTIANEWARRAY.0.serialize(writer)?;
                class_ref.index.serialize(writer)?;
                dimensions.serialize(writer)?;
            }

            Instruction::Invoke(opcode, method) => {
                opcode.0.serialize(writer)?;
                method.index.serialize(writer)?;
                if *opcode == Opcode::INVOKEINTERFACE {
                    let count = narrow::<u8>(method.descriptor.parameter_length(true) as i32)?;
                    count.serialize(writer)?;
                    0u8.serialize(writer)?;
                }
            }

            Instruction::InvokeDynamic(call_site) => {
                Opcode::INVOKEDYNAMIC.0.serialize(writer)?;
                call_site.index.serialize(writer)?;
                0u16.serialize(writer)?;
            }

            Instruction::Branch(opcode, target) => {
                let target = target_offset(target)?;
                match (wide, opcode.wide_branch(), opcode.invert()) {
                    (false, _, _) => {
                        opcode.0.serialize(writer)?;
                        relative::<i16>(offset, target)?.serialize(writer)?;
                    }
                    (true, Some(wide_opcode), _) => {
                        wide_opcode.0.serialize(writer)?;
                        relative::<i32>(offset, target)?.serialize(writer)?;
                    }
                    (true, None, Some(inverted)) => {
                        inverted.0.serialize(writer)?;
                        8i16.serialize(writer)?;
                        Opcode::GOTO_W.0.serialize(writer)?;
                        relative::<i32>(offset + 3, target)?.serialize(writer)?;
                    }
                    (true, None, None) => {
                        let msg = format!("{:?} has no wide form", opcode);
                        return Err(IoError::new(ErrorKind::InvalidInput, msg));
                    }
                }
            }

            Instruction::TableSwitch {
                low,
                default,
                targets,
            } => {
                Opcode::TABLESWITCH.0.serialize(writer)?;
                for _ in 0..switch_padding(offset) {
                    0u8.serialize(writer)?;
                }
                relative::<i32>(offset, target_offset(default)?)?.serialize(writer)?;
                low.serialize(writer)?;
                let high = *low as i64 + targets.len() as i64 - 1;
                narrow::<i32>(high)?.serialize(writer)?;
                for target in targets {
                    relative::<i32>(offset, target_offset(target)?)?.serialize(writer)?;
                }
            }

            Instruction::LookupSwitch { default, pairs } => {
                Opcode::LOOKUPSWITCH.0.serialize(writer)?;
                for _ in 0..switch_padding(offset) {
                    0u8.serialize(writer)?;
                }
                relative::<i32>(offset, target_offset(default)?)?.serialize(writer)?;
                narrow::<i32>(pairs.len() as i64)?.serialize(writer)?;
                for (key, target) in pairs {
                    key.serialize(writer)?;
                    relative::<i32>(offset, target_offset(target)?)?.serialize(writer)?;
                }
            }
        }
        Ok(())
    }

    /// Does the instruction take one of the shapes its opcode allows?
    pub fn has_valid_shape(&self) -> bool {
        let shape = match self.opcode().info() {
            Some(info) => info.shape,
            None => return false,
        };
        matches!(
            (self, shape),
            (Instruction::Plain(_), Shape::None)
                | (Instruction::Local(_, _), Shape::Local)
                | (Instruction::Increment(_, _), Shape::Increment)
                | (Instruction::Immediate(_, _), Shape::Byte | Shape::Short)
                | (Instruction::NewArray(_), Shape::NewArray)
                | (Instruction::Constant(_, _), Shape::Constant)
                | (Instruction::Class(_, _), Shape::Class)
                | (Instruction::MultiANewArray(_, _), Shape::MultiANewArray)
                | (Instruction::Field(_, _), Shape::Field)
                | (Instruction::Invoke(_, _), Shape::Method)
                | (Instruction::InvokeDynamic(_), Shape::InvokeDynamic)
                | (Instruction::Branch(_, _), Shape::Branch)
                | (Instruction::TableSwitch { .. }, Shape::TableSwitch)
                | (Instruction::LookupSwitch { .. }, Shape::LookupSwitch)
        )
    }
}

/// Simulate a straight-line run of instructions, starting from `entry`
///
/// Symbolic locals are resolved along the way. Positions count from 0.
pub fn simulate(
    instructions: impl IntoIterator<Item = Instruction>,
    entry: FrameState,
    method: &MethodContext,
    diagnostics: &mut Diagnostics,
) -> FrameState {
    instructions
        .into_iter()
        .enumerate()
        .fold(entry, |mut state, (position, mut instruction)| {
            diagnostics.set_position(Some(position));
            instruction.resolve_locals(&mut state.locals, diagnostics);
            instruction.apply(state, method, position, diagnostics)
        })
}

fn local_index(var: &LocalVar) -> Result<u16> {
    match var {
        LocalVar::Index(index) => Ok(*index),
        LocalVar::Name(name) => {
            let msg = format!("local '{}' was never resolved to a slot", name);
            Err(IoError::new(ErrorKind::InvalidInput, msg))
        }
    }
}

fn narrow<T: TryFrom<i64>>(value: impl Into<i64>) -> Result<T> {
    let value = value.into();
    T::try_from(value).map_err(|_| {
        let msg = format!("operand {} out of range", value);
        IoError::new(ErrorKind::InvalidData, msg)
    })
}

fn relative<T: TryFrom<i64>>(from: usize, to: usize) -> Result<T> {
    narrow(to as i64 - from as i64)
}

/// Pop then push values given as type codes
fn adjust_typed(state: &mut FrameState, pops: &str, pushes: &str, diagnostics: &mut Diagnostics) {
    for code in pops.chars().rev() {
        if let Some(required) = FrameElement::from_type_code(code) {
            state.stack.pop_expecting(&required, diagnostics);
        }
    }
    for code in pushes.chars() {
        if let Some(value) = FrameElement::from_type_code(code) {
            state.stack.push(value, diagnostics);
        }
    }
}

/// Operand-less instructions whose effect depends on the frame
fn adjust_plain(
    opcode: Opcode,
    state: &mut FrameState,
    method: &MethodContext,
    diagnostics: &mut Diagnostics,
) {
    let stack = &mut state.stack;
    match opcode {
        Opcode::ACONST_NULL => stack.push(FrameElement::Null, diagnostics),

        Opcode::AALOAD => {
            stack.pop_expecting(&FrameElement::Integer, diagnostics);
            let element = match stack.pop_expecting(&any_object(), diagnostics) {
                FrameElement::Object(array) if array.dimensions() > 0 => {
                    match array.element_type() {
                        Some(element @ FieldType::Ref(_)) => FrameElement::from(element),
                        _ => {
                            let rendered = format!("{:?}", array);
                            diagnostics.error(VerifierErrorKind::InvalidArrayType(rendered));
                            any_object()
                        }
                    }
                }
                FrameElement::Null => FrameElement::Null,
                _ => any_object(),
            };
            stack.push(element, diagnostics);
        }

        Opcode::ATHROW => {
            let throwable = FrameElement::Object(RefType::Object(BinaryName::THROWABLE));
            stack.pop_expecting(&throwable, diagnostics);
        }

        Opcode::IRETURN
        | Opcode::LRETURN
        | Opcode::FRETURN
        | Opcode::DRETURN
        | Opcode::ARETURN
        | Opcode::RETURN => adjust_return(opcode, state, method, diagnostics),

        _ => log::warn!("{:?} has no frame effect", opcode),
    }
}

fn adjust_return(
    opcode: Opcode,
    state: &mut FrameState,
    method: &MethodContext,
    diagnostics: &mut Diagnostics,
) {
    let returned = match opcode {
        Opcode::IRETURN => Some(FrameElement::Integer),
        Opcode::LRETURN => Some(FrameElement::Long),
        Opcode::FRETURN => Some(FrameElement::Float),
        Opcode::DRETURN => Some(FrameElement::Double),
        Opcode::ARETURN => Some(any_object()),
        _ => None,
    };

    match (returned, method.return_type()) {
        (None, None) => (),
        (Some(FrameElement::Object(_)), Some(expected @ FrameElement::Object(_))) => {
            state.stack.pop_expecting(&expected, diagnostics);
        }
        (Some(returned), Some(expected)) if returned == expected => {
            state.stack.pop_expecting(&expected, diagnostics);
        }
        (Some(returned), _) => {
            diagnostics.error(VerifierErrorKind::BadReturn);
            state.stack.pop_expecting(&returned, diagnostics);
        }
        (None, Some(_)) => diagnostics.error(VerifierErrorKind::BadReturn),
    }

    if method.is_constructor() && *state.locals.frame().get(0) == FrameElement::UninitializedThis
    {
        diagnostics.error(VerifierErrorKind::NotInitializable(FrameElement::UninitializedThis));
    }
}

fn adjust_class(
    opcode: Opcode,
    class: &RefType<BinaryName>,
    state: &mut FrameState,
    position: usize,
    diagnostics: &mut Diagnostics,
) {
    let stack = &mut state.stack;
    match opcode {
        Opcode::NEW => match class {
            RefType::Object(class) => {
                let uninit = UninitializedRefType {
                    class: class.clone(),
                    site: position,
                };
                stack.push(FrameElement::Uninitialized(uninit), diagnostics);
            }
            array => {
                let rendered = format!("{:?}", array);
                diagnostics.error(VerifierErrorKind::InvalidArrayType(rendered));
                stack.push(FrameElement::Object(array.clone()), diagnostics);
            }
        },
        Opcode::ANEWARRAY => {
            stack.pop_expecting(&FrameElement::Integer, diagnostics);
            let array = RefType::array(FieldType::Ref(class.clone()));
            stack.push(FrameElement::Object(array), diagnostics);
        }
        Opcode::CHECKCAST => {
            stack.pop_expecting(&any_object(), diagnostics);
            stack.push(FrameElement::Object(class.clone()), diagnostics);
        }
        _ => {
            stack.pop_expecting(&any_object(), diagnostics);
            stack.push(FrameElement::Integer, diagnostics);
        }
    }
}

fn adjust_field(
    opcode: Opcode,
    field: &FieldRef,
    state: &mut FrameState,
    method: &MethodContext,
    diagnostics: &mut Diagnostics,
) {
    let stack = &mut state.stack;
    let value = FrameElement::from(field.descriptor.clone());
    let owner = FrameElement::Object(RefType::Object(field.class.clone()));
    match opcode {
        Opcode::GETSTATIC => stack.push(value, diagnostics),
        Opcode::PUTSTATIC => {
            stack.pop_expecting(&value, diagnostics);
        }
        Opcode::GETFIELD => {
            stack.pop_expecting(&owner, diagnostics);
            stack.push(value, diagnostics);
        }
        _ => {
            stack.pop_expecting(&value, diagnostics);

            // Constructors may set their own fields before calling the super constructor
            let receiver = stack.pop(diagnostics);
            let own_field = method.is_constructor() && field.class == method.class;
            if !(own_field && receiver == FrameElement::UninitializedThis)
                && !receiver.match_stack(&owner)
            {
                diagnostics.error(VerifierErrorKind::IncompatibleTypes {
                    found: receiver,
                    required: owner,
                });
            }
        }
    }
}

fn adjust_invoke(
    opcode: Opcode,
    invoked: &MethodRef,
    state: &mut FrameState,
    diagnostics: &mut Diagnostics,
) {
    let owner = FrameElement::Object(RefType::Object(invoked.class.clone()));
    match opcode {
        Opcode::INVOKESTATIC => {
            state
                .stack
                .adjust_operand(&invoked.descriptor, None, diagnostics)
        }
        Opcode::INVOKESPECIAL if invoked.name == UnqualifiedName::INIT => {
            state.stack.pop_arguments(&invoked.descriptor, diagnostics);
            let receiver = state.stack.pop_reference(diagnostics);
            let initialized = match &receiver {
                FrameElement::Uninitialized(uninit) => {
                    if uninit.class != invoked.class {
                        diagnostics.error(VerifierErrorKind::NotInitializable(receiver.clone()));
                    }
                    FrameElement::Object(RefType::Object(uninit.class.clone()))
                }
                FrameElement::UninitializedThis => FrameElement::This,
                FrameElement::Error => return,
                other => {
                    diagnostics.error(VerifierErrorKind::NotInitializable(other.clone()));
                    return;
                }
            };
            state.replace_all(&receiver, &initialized);
        }
        _ => {
            state
                .stack
                .adjust_operand(&invoked.descriptor, Some(&owner), diagnostics)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{MethodAccessFlags, Name, ParseDescriptor};

    fn method(name: &str, descriptor: &str, access_flags: MethodAccessFlags) -> MethodContext {
        MethodContext {
            class: BinaryName::from_str("me/alec/Point").unwrap(),
            name: UnqualifiedName::from_str(name).unwrap(),
            descriptor: MethodDescriptor::parse(descriptor).unwrap(),
            access_flags,
        }
    }

    fn run(
        method: &MethodContext,
        instructions: &[Instruction],
    ) -> (FrameState, Vec<VerifierErrorKind>) {
        let mut diagnostics = Diagnostics::new();
        let state = simulate(
            instructions.to_vec(),
            FrameState::entry(method, 100, true),
            method,
            &mut diagnostics,
        );
        let kinds = diagnostics.into_vec().into_iter().map(|d| d.kind).collect();
        (state, kinds)
    }

    fn stack(state: &FrameState) -> Vec<FrameElement> {
        state.stack.frame().iter().map(|(_, _, e)| e.clone()).collect()
    }

    fn encode(instruction: &Instruction, offset: usize, wide: bool, labels: &[usize]) -> Vec<u8> {
        let mut bytes = vec![];
        instruction
            .serialize_at(&mut bytes, offset, wide, labels)
            .unwrap();
        bytes
    }

    fn object_init(class: &str) -> MethodRef {
        MethodRef {
            index: 7,
            class: BinaryName::from_str(class).unwrap(),
            name: UnqualifiedName::INIT,
            descriptor: MethodDescriptor::parse("()V").unwrap(),
            interface: false,
        }
    }

    #[test]
    fn arithmetic() {
        let method = method("add", "(IJ)J", MethodAccessFlags::STATIC);
        let (state, errors) = run(
            &method,
            &[
                Instruction::Local(Opcode::ILOAD, LocalVar::Index(0)),
                Instruction::Plain(Opcode::I2L),
                Instruction::Local(Opcode::LLOAD, LocalVar::Index(1)),
                Instruction::Plain(Opcode::LADD),
                Instruction::Plain(Opcode::LRETURN),
            ],
        );
        assert_eq!(errors, vec![]);
        assert!(state.stack.is_empty());
        assert_eq!(state.stack.max_stack(), 4);
    }

    #[test]
    fn type_mismatches() {
        let method = method("bad", "(F)V", MethodAccessFlags::STATIC);
        let (state, errors) = run(
            &method,
            &[
                Instruction::Local(Opcode::ILOAD, LocalVar::Index(0)),
                Instruction::Plain(Opcode::FNEG),
            ],
        );
        assert_eq!(
            errors,
            vec![
                VerifierErrorKind::IncompatibleTypes {
                    found: FrameElement::Float,
                    required: FrameElement::Integer,
                },
                VerifierErrorKind::IncompatibleTypes {
                    found: FrameElement::Integer,
                    required: FrameElement::Float,
                },
            ]
        );
        assert_eq!(stack(&state), vec![FrameElement::Float]);
    }

    #[test]
    fn object_initialization() {
        let method = method("make", "()Ljava/lang/Object;", MethodAccessFlags::STATIC);
        let list = RefType::Object(BinaryName::from_str("java/util/ArrayList").unwrap());
        let (state, errors) = run(
            &method,
            &[
                Instruction::Class(
                    Opcode::NEW,
                    ClassRef {
                        index: 3,
                        class: list.clone(),
                    },
                ),
                Instruction::Plain(Opcode::DUP),
                Instruction::Local(Opcode::ASTORE, LocalVar::Name(String::from("copy"))),
                Instruction::Invoke(Opcode::INVOKESPECIAL, object_init("java/util/ArrayList")),
                Instruction::Local(Opcode::ALOAD, LocalVar::Name(String::from("copy"))),
            ],
        );
        assert_eq!(errors, vec![]);
        assert_eq!(stack(&state), vec![FrameElement::Object(list.clone())]);
        assert_eq!(state.locals.frame().get(0), &FrameElement::Object(list));
    }

    #[test]
    fn constructor_of_another_class() {
        let method = method("make", "()V", MethodAccessFlags::STATIC);
        let list = RefType::Object(BinaryName::from_str("java/util/ArrayList").unwrap());
        let (state, errors) = run(
            &method,
            &[
                Instruction::Class(
                    Opcode::NEW,
                    ClassRef {
                        index: 3,
                        class: list.clone(),
                    },
                ),
                Instruction::Invoke(Opcode::INVOKESPECIAL, object_init("java/util/HashMap")),
            ],
        );
        let uninit = FrameElement::Uninitialized(UninitializedRefType {
            class: BinaryName::from_str("java/util/ArrayList").unwrap(),
            site: 0,
        });
        assert_eq!(errors, vec![VerifierErrorKind::NotInitializable(uninit)]);
        assert!(state.stack.is_empty());
    }

    #[test]
    fn wide_opcodes_canonicalize() {
        let mut labels = crate::jvm::code::Labels::new();
        let label = labels.get_or_create("target");
        let mut goto = Instruction::Branch(Opcode::GOTO_W, label);
        goto.canonicalize();
        assert_eq!(goto, Instruction::Branch(Opcode::GOTO, label));
        assert_eq!(encode(&goto, 0, false, &[3]), vec![0xa7, 0, 3]);
        assert_eq!(encode(&goto, 0, true, &[5]), vec![0xc8, 0, 0, 0, 5]);

        let mut jsr = Instruction::Branch(Opcode::JSR_W, label);
        jsr.canonicalize();
        assert_eq!(jsr.opcode(), Opcode::JSR);

        let mut ldc = Instruction::Constant(
            Opcode::LDC_W,
            Constant {
                index: 2,
                value: ConstantValue::Integer(7),
            },
        );
        ldc.canonicalize();
        assert_eq!(ldc.opcode(), Opcode::LDC);
        assert_eq!(encode(&ldc, 0, false, &[]), vec![0x12, 2]);
    }

    #[test]
    fn constructor_receiver() {
        let method = method("<init>", "(I)V", MethodAccessFlags::PUBLIC);
        let field = FieldRef {
            index: 4,
            class: method.class.clone(),
            name: UnqualifiedName::from_str("x").unwrap(),
            descriptor: FieldType::int(),
        };
        let (state, errors) = run(
            &method,
            &[
                Instruction::Local(Opcode::ALOAD, LocalVar::Index(0)),
                Instruction::Local(Opcode::ILOAD, LocalVar::Index(1)),
                Instruction::Field(Opcode::PUTFIELD, field),
                Instruction::Local(Opcode::ALOAD, LocalVar::Name(String::from("this"))),
                Instruction::Invoke(Opcode::INVOKESPECIAL, object_init("java/lang/Object")),
                Instruction::Plain(Opcode::RETURN),
            ],
        );
        assert_eq!(errors, vec![]);
        assert_eq!(state.locals.frame().get(0), &FrameElement::This);
    }

    #[test]
    fn return_before_super_constructor() {
        let method = method("<init>", "()V", MethodAccessFlags::PUBLIC);
        let (_, errors) = run(&method, &[Instruction::Plain(Opcode::RETURN)]);
        assert_eq!(
            errors,
            vec![VerifierErrorKind::NotInitializable(FrameElement::UninitializedThis)]
        );
    }

    #[test]
    fn bad_returns() {
        let method = method("get", "()I", MethodAccessFlags::STATIC);
        let (_, errors) = run(
            &method,
            &[Instruction::Plain(Opcode::FCONST_0), Instruction::Plain(Opcode::FRETURN)],
        );
        assert_eq!(errors, vec![VerifierErrorKind::BadReturn]);

        let (_, errors) = run(&method, &[Instruction::Plain(Opcode::RETURN)]);
        assert_eq!(errors, vec![VerifierErrorKind::BadReturn]);
    }

    #[test]
    fn constants() {
        let method = method("get", "()V", MethodAccessFlags::STATIC);
        let long = Constant {
            index: 9,
            value: ConstantValue::Long(1),
        };
        let (state, errors) = run(
            &method,
            &[
                Instruction::Constant(Opcode::LDC2_W, long.clone()),
                Instruction::Constant(Opcode::LDC, long),
            ],
        );
        assert_eq!(errors, vec![VerifierErrorKind::InvalidConstant]);
        assert_eq!(stack(&state), vec![FrameElement::Long, FrameElement::Long]);
    }

    #[test]
    fn array_elements() {
        let method = method("first", "([[Ljava/lang/String;)V", MethodAccessFlags::STATIC);
        let (state, errors) = run(
            &method,
            &[
                Instruction::Local(Opcode::ALOAD, LocalVar::Index(0)),
                Instruction::Plain(Opcode::ICONST_0),
                Instruction::Plain(Opcode::AALOAD),
                Instruction::Plain(Opcode::ICONST_0),
                Instruction::Plain(Opcode::AALOAD),
            ],
        );
        assert_eq!(errors, vec![]);
        assert_eq!(
            stack(&state),
            vec![FrameElement::Object(RefType::Object(BinaryName::STRING))]
        );
    }

    #[test]
    fn local_encodings() {
        let iload = |index| Instruction::Local(Opcode::ILOAD, LocalVar::Index(index));
        assert_eq!(encode(&iload(2), 0, false, &[]), vec![0x1c]);
        assert_eq!(encode(&iload(200), 0, false, &[]), vec![0x15, 200]);
        assert_eq!(encode(&iload(300), 0, false, &[]), vec![0xc4, 0x15, 0x01, 0x2c]);
        assert_eq!(iload(2).sizing(&[]), Sizing::Fixed(1));
        assert_eq!(iload(300).sizing(&[]), Sizing::Fixed(4));

        let ret = Instruction::Local(Opcode::RET, LocalVar::Index(1));
        assert_eq!(encode(&ret, 0, false, &[]), vec![0xa9, 1]);

        let iinc = Instruction::Increment(LocalVar::Index(1), -1);
        assert_eq!(encode(&iinc, 0, false, &[]), vec![0x84, 1, 0xff]);
        let iinc = Instruction::Increment(LocalVar::Index(1), 1000);
        assert_eq!(encode(&iinc, 0, false, &[]), vec![0xc4, 0x84, 0, 1, 0x03, 0xe8]);
        assert_eq!(iinc.sizing(&[]), Sizing::Fixed(6));
    }

    #[test]
    fn branch_encodings() {
        let mut labels = crate::jvm::code::Labels::new();
        let target = labels.get_or_create("target");

        let goto = Instruction::Branch(Opcode::GOTO, target);
        assert_eq!(encode(&goto, 10, false, &[4]), vec![0xa7, 0xff, 0xfa]);
        assert_eq!(encode(&goto, 10, true, &[4]), vec![0xc8, 0xff, 0xff, 0xff, 0xfa]);

        let ifeq = Instruction::Branch(Opcode::IFEQ, target);
        assert_eq!(
            encode(&ifeq, 0, true, &[40_000]),
            vec![0x9a, 0x00, 0x08, 0xc8, 0x00, 0x00, 0x9c, 0x3d]
        );
        assert_eq!(
            ifeq.sizing(&[7]),
            Sizing::Branch {
                target: 7,
                short: 3,
                wide: 8
            }
        );
    }

    #[test]
    fn switch_encodings() {
        let mut labels = crate::jvm::code::Labels::new();
        let default = labels.get_or_create("default");
        let case = labels.get_or_create("case");

        let table = Instruction::TableSwitch {
            low: 1,
            default,
            targets: vec![case, case],
        };
        let bytes = encode(&table, 1, false, &[30, 20]);
        assert_eq!(bytes.len(), 1 + 2 + 12 + 8);
        assert_eq!(&bytes[..3], &[0xaa, 0, 0]);
        assert_eq!(&bytes[3..7], &29i32.to_be_bytes());
        assert_eq!(&bytes[7..11], &1i32.to_be_bytes());
        assert_eq!(&bytes[11..15], &2i32.to_be_bytes());

        let lookup = Instruction::LookupSwitch {
            default,
            pairs: vec![(-5, case)],
        };
        let bytes = encode(&lookup, 3, false, &[3, 19]);
        assert_eq!(bytes.len(), 1 + 0 + 8 + 8);
        assert_eq!(&bytes[9..13], &(-5i32).to_be_bytes());
        assert_eq!(&bytes[13..17], &16i32.to_be_bytes());
    }

    #[test]
    fn length_bounds() {
        let mut labels = crate::jvm::code::Labels::new();
        let target = labels.get_or_create("target");
        let branches = [
            (Instruction::Branch(Opcode::GOTO, target), 3, 5),
            (Instruction::Branch(Opcode::IFNULL, target), 3, 8),
            (
                Instruction::LookupSwitch {
                    default: target,
                    pairs: vec![(1, target)],
                },
                17,
                20,
            ),
            (Instruction::Plain(Opcode::NOP), 1, 1),
        ];
        for (instruction, min, max) in branches {
            assert_eq!(instruction.min_length(), min, "{:?}", instruction);
            assert_eq!(instruction.max_length(), max, "{:?}", instruction);
        }
    }

    #[test]
    fn shapes() {
        assert!(Instruction::Plain(Opcode::IADD).has_valid_shape());
        assert!(!Instruction::Plain(Opcode::ILOAD).has_valid_shape());
        assert!(!Instruction::Plain(Opcode::WIDE).has_valid_shape());
        assert!(Instruction::Immediate(Opcode::SIPUSH, 1000).has_valid_shape());
    }
}
