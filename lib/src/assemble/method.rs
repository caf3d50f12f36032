use super::{Error, Settings};
use crate::jvm::code::{resolve_layout, Instruction, LabelId, Labels, LocalVar, Opcode, Sizing};
use crate::jvm::verifier::{Frame, FrameElement, FrameState, LocalFrame, MethodContext};
use crate::jvm::{
    self, BinaryName, Diagnostic, Diagnostics, FieldType, MethodAccessFlags, MethodDescriptor,
    Name, RefType, RenderDescriptor, UnqualifiedName, VerifierErrorKind,
};
use crate::util::Offset;

/// Entry in the exception table of an assembled method
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,

    /// Class of exceptions caught (`None` catches everything)
    pub catch_type: Option<BinaryName>,
}

/// Output of assembling one method body
#[derive(Debug)]
pub struct AssembledMethod {
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
    pub code: Vec<u8>,
    pub max_stack: u16,
    pub max_locals: u16,

    /// Byte offset of every placed label, in the order labels were first mentioned
    pub label_offsets: Vec<(String, usize)>,

    pub exception_table: Vec<ExceptionHandler>,

    /// Everything reported while assembling (check for errors before using the code)
    pub diagnostics: Vec<Diagnostic>,
}

impl AssembledMethod {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|diagnostic| diagnostic.severity == jvm::Severity::Error)
    }

    pub fn label_offset(&self, name: &str) -> Option<usize> {
        self.label_offsets
            .iter()
            .find(|(label, _)| label == name)
            .map(|(_, offset)| *offset)
    }
}

#[derive(Debug)]
struct Catch {
    start: LabelId,
    end: LabelId,
    handler: LabelId,
    class: Option<BinaryName>,

    /// Between `start` and `end`
    active: bool,
}

/// Assembles one method body, simulating the frame as instructions and labels come in
///
/// Instructions are checked against the frame as they are pushed, so a label reached only by a
/// backwards jump must have its frame fixed by the time it is placed (the frame at the placing
/// point, or the frame of the jumps recorded before it).
pub struct MethodAssembler<'a> {
    settings: &'a Settings,
    method: MethodContext,
    state: FrameState,

    /// Can control reach the next instruction?
    reachable: bool,

    /// Locals at the last unconditional transfer of control, used when nothing better is known
    fallback_locals: LocalFrame,

    /// Label placed where no frame was known (reported if code follows it)
    frameless: Option<LabelId>,

    instructions: Vec<Instruction>,
    labels: Labels,
    catches: Vec<Catch>,
    diagnostics: Diagnostics,
}

impl<'a> MethodAssembler<'a> {
    pub fn new(
        class: BinaryName,
        name: UnqualifiedName,
        descriptor: MethodDescriptor<BinaryName>,
        access_flags: MethodAccessFlags,
        settings: &'a Settings,
    ) -> MethodAssembler<'a> {
        let method = MethodContext {
            class,
            name,
            descriptor,
            access_flags,
        };
        let state = FrameState::entry(&method, settings.locals_limit(), settings.symbolic_locals);
        let fallback_locals = state.locals.frame().clone();
        log::debug!(
            "assembling {}.{}",
            method.class.as_str(),
            method.name.as_str()
        );
        MethodAssembler {
            settings,
            method,
            state,
            reachable: true,
            fallback_locals,
            frameless: None,
            instructions: vec![],
            labels: Labels::new(),
            catches: vec![],
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn method(&self) -> &MethodContext {
        &self.method
    }

    /// Current frame trackers
    pub fn state(&self) -> &FrameState {
        &self.state
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Label with the given name (created on first mention)
    pub fn label(&mut self, name: &str) -> LabelId {
        self.labels.get_or_create(name)
    }

    /// Check an instruction against the current frame, then append it
    pub fn push_instruction(&mut self, mut instruction: Instruction) -> Result<(), Error> {
        let position = self.instructions.len();
        self.diagnostics.set_position(Some(position));

        instruction.canonicalize();
        if !instruction.has_valid_shape() {
            let msg = format!("{:?} at instruction {}", instruction, position);
            return Err(Error::Jvm(jvm::Error::InvalidInstruction(msg)));
        }

        let opcode = instruction.opcode();
        let version = self.settings.version;
        if instruction.since() > version || !opcode.available_in(version) {
            self.diagnostics.error(VerifierErrorKind::UnsupportedOpcode {
                mnemonic: opcode.mnemonic(),
                version,
            });
        }

        if let Some(label) = self.frameless.take() {
            let name = self.labels.name(label).to_owned();
            self.diagnostics
                .warning(VerifierErrorKind::LabelWithoutFrame(name));
        }
        if !self.reachable {
            self.diagnostics.error(VerifierErrorKind::UnreachableCode);
            let fallback = self.fallback_frame();
            self.state.restore(fallback);
            self.reachable = true;
        }

        self.record_catch_edges();
        instruction.resolve_locals(&mut self.state.locals, &mut self.diagnostics);
        instruction.adjust(&mut self.state, &self.method, position, &mut self.diagnostics);
        if matches!(
            instruction,
            Instruction::Local(_, _) | Instruction::Increment(_, _)
        ) {
            self.record_catch_edges();
        }

        let mut after = self.state.snapshot();
        if opcode == Opcode::JSR {
            after.stack.push(FrameElement::ReturnAddress);
        }
        for target in instruction.targets() {
            self.labels
                .record_branch(target, &after, &mut self.diagnostics);
        }

        if opcode.ends_flow() {
            self.reachable = false;
            self.fallback_locals = after.locals;
        }
        log::trace!("{:?} -> {:?}", instruction, self.state.stack.frame());
        self.instructions.push(instruction);
        Ok(())
    }

    /// Place a label before the next instruction
    pub fn place_label(&mut self, name: &str) -> Result<LabelId, Error> {
        let id = self.labels.get_or_create(name);
        let position = self.instructions.len();
        self.diagnostics.set_position(Some(position));

        let incoming = if self.reachable {
            Some(self.state.snapshot())
        } else {
            None
        };
        let frame = match self
            .labels
            .place(id, position, incoming, &mut self.diagnostics)?
        {
            Some(frame) => {
                self.frameless = None;
                frame
            }
            None => {
                let frame = self.fallback_frame();
                self.labels.set_frame(id, frame.clone());
                self.frameless = Some(id);
                frame
            }
        };
        self.state.restore(frame);
        self.reachable = true;

        for catch in &mut self.catches {
            if catch.start == id {
                catch.active = true;
            } else if catch.end == id {
                catch.active = false;
            }
        }
        Ok(id)
    }

    /// Protect the instructions between `start` and `end` with a handler at `handler`
    ///
    /// Must come before `start` is placed, so that every protected instruction is seen.
    pub fn add_catch(
        &mut self,
        start: &str,
        end: &str,
        handler: &str,
        class: Option<BinaryName>,
    ) {
        let start = self.labels.get_or_create(start);
        let end = self.labels.get_or_create(end);
        let handler = self.labels.get_or_create(handler);
        if self.labels.position(start).is_some() {
            let name = self.labels.name(start).to_owned();
            self.diagnostics.error(VerifierErrorKind::CatchAfterStart(name));
        }
        self.catches.push(Catch {
            start,
            end,
            handler,
            class,
            active: false,
        });
    }

    /// Declare the type of a local (by slot or by name)
    ///
    /// A name must not have been used before.
    pub fn annotate_local(&mut self, var: LocalVar, declared: FieldType<BinaryName>) {
        self.diagnostics.set_position(Some(self.instructions.len()));
        let declared = FrameElement::from(declared);
        let index = match &var {
            LocalVar::Index(index) => *index,
            LocalVar::Name(name) => {
                let slots = declared.slots();
                match self.state.locals.declare(name, slots, &mut self.diagnostics) {
                    Some(index) => index,
                    None => return,
                }
            }
        };
        self.state
            .locals
            .annotate(index, &declared, &mut self.diagnostics);
    }

    /// Lay out and encode the method
    pub fn finish(mut self) -> Result<AssembledMethod, Error> {
        self.diagnostics.set_position(None);
        if self.reachable && self.frameless.is_none() {
            self.diagnostics.error(VerifierErrorKind::FallsOffEnd);
        }
        if let Some(name) = self.labels.undefined().next() {
            return Err(Error::Jvm(jvm::Error::UndefinedLabel(name.to_owned())));
        }
        self.state
            .locals
            .report_usage(self.settings.warn_unused, &mut self.diagnostics);

        let label_positions: Vec<usize> = self
            .labels
            .positions()
            .map(|(_, _, position)| position.unwrap_or(0))
            .collect();
        let sizings: Vec<Sizing> = self
            .instructions
            .iter()
            .map(|instruction| instruction.sizing(&label_positions))
            .collect();
        let layout = resolve_layout(&sizings)?;

        let max_stack = self.state.stack.max_stack();
        let max_stack = u16::try_from(max_stack)
            .map_err(|_| jvm::Error::MethodCodeMaxStackOverflow(Offset(max_stack)))?;
        let max_locals = self.state.locals.max_locals();
        let max_locals = u16::try_from(max_locals)
            .map_err(|_| jvm::Error::MethodCodeMaxLocalsOverflow(Offset(max_locals)))?;

        let label_offsets: Vec<usize> = label_positions
            .iter()
            .map(|position| layout.offsets[*position])
            .collect();
        let mut code = Vec::with_capacity(layout.code_length());
        for (index, instruction) in self.instructions.iter().enumerate() {
            instruction.serialize_at(
                &mut code,
                layout.offsets[index],
                layout.is_wide(index),
                &label_offsets,
            )?;
        }
        log::debug!(
            "{}{}: {} bytes, max_stack {}, max_locals {}",
            self.method.name.as_str(),
            self.method.descriptor.render(),
            code.len(),
            max_stack,
            max_locals
        );

        // Offsets all fit in `u16`, since the code array does
        let pc = |label: LabelId| label_offsets[label.index()] as u16;
        let exception_table = self
            .catches
            .iter()
            .map(|catch| ExceptionHandler {
                start_pc: pc(catch.start),
                end_pc: pc(catch.end),
                handler_pc: pc(catch.handler),
                catch_type: catch.class.clone(),
            })
            .collect();

        let named_offsets = self
            .labels
            .positions()
            .map(|(id, name, _)| (name.to_owned(), label_offsets[id.index()]))
            .collect();

        Ok(AssembledMethod {
            name: self.method.name,
            descriptor: self.method.descriptor,
            code,
            max_stack,
            max_locals,
            label_offsets: named_offsets,
            exception_table,
            diagnostics: self.diagnostics.into_vec(),
        })
    }

    /// Frame to continue with when control arrives from nowhere known
    fn fallback_frame(&self) -> Frame {
        Frame {
            locals: self.fallback_locals.clone(),
            stack: Default::default(),
        }
    }

    /// Merge the current locals into the handlers of every active catch
    fn record_catch_edges(&mut self) {
        for catch in self.catches.iter().filter(|catch| catch.active) {
            let class = catch.class.clone().unwrap_or(BinaryName::THROWABLE);
            let frame = Frame {
                locals: self.state.locals.frame().clone(),
                stack: std::iter::once(FrameElement::Object(RefType::Object(class))).collect(),
            };
            self.labels
                .record_branch(catch.handler, &frame, &mut self.diagnostics);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{ParseDescriptor, Severity};

    fn assembler<'a>(descriptor: &str, settings: &'a Settings) -> MethodAssembler<'a> {
        MethodAssembler::new(
            BinaryName::from_str("me/alec/Test").unwrap(),
            UnqualifiedName::from_str("run").unwrap(),
            MethodDescriptor::parse(descriptor).unwrap(),
            MethodAccessFlags::STATIC,
            settings,
        )
    }

    fn kinds(method: &AssembledMethod) -> Vec<VerifierErrorKind> {
        method
            .diagnostics
            .iter()
            .map(|diagnostic| diagnostic.kind.clone())
            .collect()
    }

    #[test]
    fn straight_line() {
        let settings = Settings::new();
        let mut asm = assembler("(I)I", &settings);
        asm.push_instruction(Instruction::Local(Opcode::ILOAD, LocalVar::Index(0)))
            .unwrap();
        asm.push_instruction(Instruction::Immediate(Opcode::BIPUSH, 3))
            .unwrap();
        asm.push_instruction(Instruction::Plain(Opcode::IMUL)).unwrap();
        asm.push_instruction(Instruction::Plain(Opcode::IRETURN))
            .unwrap();

        let method = asm.finish().unwrap();
        assert_eq!(method.code, vec![0x1a, 0x10, 3, 0x68, 0xac]);
        assert_eq!(method.max_stack, 2);
        assert_eq!(method.max_locals, 1);
        assert!(method.diagnostics.is_empty());
    }

    #[test]
    fn falls_off_end() {
        let settings = Settings::new();
        let mut asm = assembler("()V", &settings);
        asm.push_instruction(Instruction::Plain(Opcode::NOP)).unwrap();
        let method = asm.finish().unwrap();
        assert_eq!(kinds(&method), vec![VerifierErrorKind::FallsOffEnd]);
        assert!(method.has_errors());
    }

    #[test]
    fn unreachable_code() {
        let settings = Settings::new();
        let mut asm = assembler("()V", &settings);
        asm.push_instruction(Instruction::Plain(Opcode::RETURN))
            .unwrap();
        asm.push_instruction(Instruction::Plain(Opcode::RETURN))
            .unwrap();
        let method = asm.finish().unwrap();
        assert_eq!(method.diagnostics.len(), 1);
        assert_eq!(method.diagnostics[0].position, Some(1));
        assert_eq!(method.diagnostics[0].kind, VerifierErrorKind::UnreachableCode);
    }

    #[test]
    fn label_without_frame() {
        let settings = Settings::new();
        let mut asm = assembler("()V", &settings);
        asm.push_instruction(Instruction::Plain(Opcode::RETURN))
            .unwrap();
        asm.place_label("orphan").unwrap();
        asm.push_instruction(Instruction::Plain(Opcode::RETURN))
            .unwrap();
        asm.place_label("end").unwrap();

        let method = asm.finish().unwrap();
        let diagnostics: Vec<(Severity, VerifierErrorKind)> = method
            .diagnostics
            .iter()
            .map(|diagnostic| (diagnostic.severity, diagnostic.kind.clone()))
            .collect();
        assert_eq!(
            diagnostics,
            vec![(
                Severity::Warning,
                VerifierErrorKind::LabelWithoutFrame("orphan".to_owned())
            )]
        );
        assert_eq!(method.label_offset("orphan"), Some(1));
        assert_eq!(method.label_offset("end"), Some(2));
    }

    #[test]
    fn undefined_and_duplicate_labels() {
        let settings = Settings::new();
        let mut asm = assembler("()V", &settings);
        let target = asm.label("nowhere");
        asm.push_instruction(Instruction::Branch(Opcode::GOTO, target))
            .unwrap();
        assert!(matches!(
            asm.finish(),
            Err(Error::Jvm(jvm::Error::UndefinedLabel(name))) if name == "nowhere"
        ));

        let mut asm = assembler("()V", &settings);
        asm.place_label("twice").unwrap();
        assert!(matches!(
            asm.place_label("twice"),
            Err(Error::Jvm(jvm::Error::DuplicateLabel(_)))
        ));
    }

    #[test]
    fn version_checks() {
        let mut settings = Settings::new();
        settings.version = jvm::Version::JAVA6;
        let mut asm = assembler("()V", &settings);
        let target = asm.label("sub");
        asm.push_instruction(Instruction::Branch(Opcode::JSR, target))
            .unwrap();
        asm.push_instruction(Instruction::Plain(Opcode::RETURN))
            .unwrap();
        asm.place_label("sub").unwrap();
        asm.push_instruction(Instruction::Local(Opcode::ASTORE, LocalVar::Index(0)))
            .unwrap();
        asm.push_instruction(Instruction::Local(Opcode::RET, LocalVar::Index(0)))
            .unwrap();
        let method = asm.finish().unwrap();
        assert!(method.diagnostics.is_empty(), "{:?}", method.diagnostics);

        settings.version = jvm::Version::JAVA8;
        let mut asm = assembler("()V", &settings);
        let target = asm.label("sub");
        asm.push_instruction(Instruction::Branch(Opcode::JSR, target))
            .unwrap();
        asm.push_instruction(Instruction::Plain(Opcode::RETURN))
            .unwrap();
        asm.place_label("sub").unwrap();
        asm.push_instruction(Instruction::Local(Opcode::ASTORE, LocalVar::Index(0)))
            .unwrap();
        asm.push_instruction(Instruction::Local(Opcode::RET, LocalVar::Index(0)))
            .unwrap();
        let method = asm.finish().unwrap();
        assert!(kinds(&method).contains(&VerifierErrorKind::UnsupportedOpcode {
            mnemonic: "jsr",
            version: jvm::Version::JAVA8,
        }));
    }

    #[test]
    fn explicit_wide_branches() {
        let settings = Settings::new();
        let mut asm = assembler("()V", &settings);
        let target = asm.label("end");
        asm.push_instruction(Instruction::Branch(Opcode::GOTO_W, target))
            .unwrap();
        asm.place_label("end").unwrap();
        asm.push_instruction(Instruction::Plain(Opcode::RETURN))
            .unwrap();
        let method = asm.finish().unwrap();
        assert!(method.diagnostics.is_empty(), "{:?}", method.diagnostics);
        assert_eq!(method.code, vec![0xa7, 0, 3, 0xb1]);

        let mut settings = Settings::new();
        settings.version = jvm::Version::JAVA6;
        let mut asm = assembler("()V", &settings);
        let target = asm.label("sub");
        asm.push_instruction(Instruction::Branch(Opcode::JSR_W, target))
            .unwrap();
        asm.push_instruction(Instruction::Plain(Opcode::RETURN))
            .unwrap();
        asm.place_label("sub").unwrap();
        asm.push_instruction(Instruction::Local(Opcode::ASTORE, LocalVar::Index(0)))
            .unwrap();
        asm.push_instruction(Instruction::Local(Opcode::RET, LocalVar::Index(0)))
            .unwrap();
        let method = asm.finish().unwrap();
        assert!(method.diagnostics.is_empty(), "{:?}", method.diagnostics);
        assert_eq!(method.code, vec![0xa8, 0, 4, 0xb1, 0x4b, 0xa9, 0]);
    }

    #[test]
    fn bad_shape_is_fatal() {
        let settings = Settings::new();
        let mut asm = assembler("()V", &settings);
        assert!(matches!(
            asm.push_instruction(Instruction::Plain(Opcode::ILOAD)),
            Err(Error::Jvm(jvm::Error::InvalidInstruction(_)))
        ));
    }

    #[test]
    fn local_names_are_checked() {
        let mut settings = Settings::new();
        settings.symbolic_locals = true;
        let mut asm = assembler("()V", &settings);
        let name = |name: &str| LocalVar::Name(name.to_owned());
        asm.annotate_local(name("x"), FieldType::int());
        asm.annotate_local(name("x"), FieldType::int());
        for bad in ["2x", "a/b"] {
            asm.push_instruction(Instruction::Plain(Opcode::ICONST_0))
                .unwrap();
            asm.push_instruction(Instruction::Local(Opcode::ISTORE, name(bad)))
                .unwrap();
        }
        asm.push_instruction(Instruction::Plain(Opcode::RETURN))
            .unwrap();

        let method = asm.finish().unwrap();
        let errors: Vec<VerifierErrorKind> = method
            .diagnostics
            .iter()
            .filter(|diagnostic| diagnostic.severity == Severity::Error)
            .map(|diagnostic| diagnostic.kind.clone())
            .collect();
        assert_eq!(
            errors,
            vec![
                VerifierErrorKind::DuplicateLocalName("x".to_owned()),
                VerifierErrorKind::InvalidLocalName("2x".to_owned()),
                VerifierErrorKind::InvalidLocalName("a/b".to_owned()),
            ]
        );
        assert_eq!(method.max_locals, 3);
    }

    #[test]
    fn annotations() {
        let mut settings = Settings::new();
        settings.symbolic_locals = true;
        let mut asm = assembler("()V", &settings);
        asm.annotate_local(LocalVar::Name("total".to_owned()), FieldType::long());
        asm.annotate_local(LocalVar::Index(5), FieldType::int());
        asm.push_instruction(Instruction::Plain(Opcode::LCONST_0))
            .unwrap();
        asm.push_instruction(Instruction::Local(
            Opcode::LSTORE,
            LocalVar::Name("total".to_owned()),
        ))
        .unwrap();
        asm.push_instruction(Instruction::Plain(Opcode::RETURN))
            .unwrap();

        let method = asm.finish().unwrap();
        assert_eq!(method.max_locals, 6);
        assert_eq!(kinds(&method), vec![VerifierErrorKind::NeverWritten(5)]);
    }
}
