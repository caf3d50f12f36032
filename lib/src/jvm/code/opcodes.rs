use crate::jvm::Version;
use std::fmt;
use Effect::{Shuffle, Special, Typed};

/// Raw JVM opcode
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(pub u8);

/// What operands follow an opcode in the source (and, mostly, in the code array)
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Shape {
    None,

    /// `iload_0` and friends: the local is part of the opcode
    ImplicitLocal,

    /// Local variable (`iload`, `astore`, `ret`)
    Local,

    /// Local variable and signed increment (`iinc`)
    Increment,

    /// Signed byte (`bipush`)
    Byte,

    /// Signed short (`sipush`)
    Short,

    /// Primitive element type (`newarray`)
    NewArray,

    /// Constant pool loadable constant (`ldc`)
    Constant,

    /// Class or array type (`new`, `checkcast`)
    Class,

    /// Array type and number of dimensions
    MultiANewArray,

    Field,
    Method,
    InvokeDynamic,

    /// Label (`goto`, `ifeq`)
    Branch,

    TableSwitch,
    LookupSwitch,
}

/// Effect of an instruction on the frame
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Effect {
    /// Pops and pushes given as type codes (`i`, `l`, `f`, `d`, `a`), top of the stack last
    Typed(&'static str, &'static str),

    /// Type-agnostic stack shuffle (see `OperandStack::adjust_stack_op`)
    Shuffle(&'static [&'static str]),

    /// Depends on the operands or on the rest of the frame
    Special,
}

/// Static information about an opcode
#[derive(Copy, Clone, Debug)]
pub struct OpcodeInfo {
    pub opcode: Opcode,
    pub mnemonic: &'static str,
    pub shape: Shape,
    pub effect: Effect,
}

macro_rules! opcodes {
    ($($name:ident = $code:literal $mnemonic:literal $shape:ident $effect:expr;)*) => {
        impl Opcode {
            $(pub const $name: Opcode = Opcode($code);)*
        }

        /// Every opcode except `wide` (which is chosen automatically), in numeric order
        pub static OPCODES: &[OpcodeInfo] = &[
            $(OpcodeInfo {
                opcode: Opcode($code),
                mnemonic: $mnemonic,
                shape: Shape::$shape,
                effect: $effect,
            },)*
        ];
    };
}

opcodes! {
    NOP = 0x00 "nop" None Typed("", "");
    ACONST_NULL = 0x01 "aconst_null" None Special;
    ICONST_M1 = 0x02 "iconst_m1" None Typed("", "i");
    ICONST_0 = 0x03 "iconst_0" None Typed("", "i");
    ICONST_1 = 0x04 "iconst_1" None Typed("", "i");
    ICONST_2 = 0x05 "iconst_2" None Typed("", "i");
    ICONST_3 = 0x06 "iconst_3" None Typed("", "i");
    ICONST_4 = 0x07 "iconst_4" None Typed("", "i");
    ICONST_5 = 0x08 "iconst_5" None Typed("", "i");
    LCONST_0 = 0x09 "lconst_0" None Typed("", "l");
    LCONST_1 = 0x0a "lconst_1" None Typed("", "l");
    FCONST_0 = 0x0b "fconst_0" None Typed("", "f");
    FCONST_1 = 0x0c "fconst_1" None Typed("", "f");
    FCONST_2 = 0x0d "fconst_2" None Typed("", "f");
    DCONST_0 = 0x0e "dconst_0" None Typed("", "d");
    DCONST_1 = 0x0f "dconst_1" None Typed("", "d");
    BIPUSH = 0x10 "bipush" Byte Typed("", "i");
    SIPUSH = 0x11 "sipush" Short Typed("", "i");
    LDC = 0x12 "ldc" Constant Special;
    LDC_W = 0x13 "ldc_w" Constant Special;
    LDC2_W = 0x14 "ldc2_w" Constant Special;
    ILOAD = 0x15 "iload" Local Special;
    LLOAD = 0x16 "lload" Local Special;
    FLOAD = 0x17 "fload" Local Special;
    DLOAD = 0x18 "dload" Local Special;
    ALOAD = 0x19 "aload" Local Special;
    ILOAD_0 = 0x1a "iload_0" ImplicitLocal Special;
    ILOAD_1 = 0x1b "iload_1" ImplicitLocal Special;
    ILOAD_2 = 0x1c "iload_2" ImplicitLocal Special;
    ILOAD_3 = 0x1d "iload_3" ImplicitLocal Special;
    LLOAD_0 = 0x1e "lload_0" ImplicitLocal Special;
    LLOAD_1 = 0x1f "lload_1" ImplicitLocal Special;
    LLOAD_2 = 0x20 "lload_2" ImplicitLocal Special;
    LLOAD_3 = 0x21 "lload_3" ImplicitLocal Special;
    FLOAD_0 = 0x22 "fload_0" ImplicitLocal Special;
    FLOAD_1 = 0x23 "fload_1" ImplicitLocal Special;
    FLOAD_2 = 0x24 "fload_2" ImplicitLocal Special;
    FLOAD_3 = 0x25 "fload_3" ImplicitLocal Special;
    DLOAD_0 = 0x26 "dload_0" ImplicitLocal Special;
    DLOAD_1 = 0x27 "dload_1" ImplicitLocal Special;
    DLOAD_2 = 0x28 "dload_2" ImplicitLocal Special;
    DLOAD_3 = 0x29 "dload_3" ImplicitLocal Special;
    ALOAD_0 = 0x2a "aload_0" ImplicitLocal Special;
    ALOAD_1 = 0x2b "aload_1" ImplicitLocal Special;
    ALOAD_2 = 0x2c "aload_2" ImplicitLocal Special;
    ALOAD_3 = 0x2d "aload_3" ImplicitLocal Special;
    IALOAD = 0x2e "iaload" None Typed("ai", "i");
    LALOAD = 0x2f "laload" None Typed("ai", "l");
    FALOAD = 0x30 "faload" None Typed("ai", "f");
    DALOAD = 0x31 "daload" None Typed("ai", "d");
    AALOAD = 0x32 "aaload" None Special;
    BALOAD = 0x33 "baload" None Typed("ai", "i");
    CALOAD = 0x34 "caload" None Typed("ai", "i");
    SALOAD = 0x35 "saload" None Typed("ai", "i");
    ISTORE = 0x36 "istore" Local Special;
    LSTORE = 0x37 "lstore" Local Special;
    FSTORE = 0x38 "fstore" Local Special;
    DSTORE = 0x39 "dstore" Local Special;
    ASTORE = 0x3a "astore" Local Special;
    ISTORE_0 = 0x3b "istore_0" ImplicitLocal Special;
    ISTORE_1 = 0x3c "istore_1" ImplicitLocal Special;
    ISTORE_2 = 0x3d "istore_2" ImplicitLocal Special;
    ISTORE_3 = 0x3e "istore_3" ImplicitLocal Special;
    LSTORE_0 = 0x3f "lstore_0" ImplicitLocal Special;
    LSTORE_1 = 0x40 "lstore_1" ImplicitLocal Special;
    LSTORE_2 = 0x41 "lstore_2" ImplicitLocal Special;
    LSTORE_3 = 0x42 "lstore_3" ImplicitLocal Special;
    FSTORE_0 = 0x43 "fstore_0" ImplicitLocal Special;
    FSTORE_1 = 0x44 "fstore_1" ImplicitLocal Special;
    FSTORE_2 = 0x45 "fstore_2" ImplicitLocal Special;
    FSTORE_3 = 0x46 "fstore_3" ImplicitLocal Special;
    DSTORE_0 = 0x47 "dstore_0" ImplicitLocal Special;
    DSTORE_1 = 0x48 "dstore_1" ImplicitLocal Special;
    DSTORE_2 = 0x49 "dstore_2" ImplicitLocal Special;
    DSTORE_3 = 0x4a "dstore_3" ImplicitLocal Special;
    ASTORE_0 = 0x4b "astore_0" ImplicitLocal Special;
    ASTORE_1 = 0x4c "astore_1" ImplicitLocal Special;
    ASTORE_2 = 0x4d "astore_2" ImplicitLocal Special;
    ASTORE_3 = 0x4e "astore_3" ImplicitLocal Special;
    IASTORE = 0x4f "iastore" None Typed("aii", "");
    LASTORE = 0x50 "lastore" None Typed("ail", "");
    FASTORE = 0x51 "fastore" None Typed("aif", "");
    DASTORE = 0x52 "dastore" None Typed("aid", "");
    AASTORE = 0x53 "aastore" None Typed("aia", "");
    BASTORE = 0x54 "bastore" None Typed("aii", "");
    CASTORE = 0x55 "castore" None Typed("aii", "");
    SASTORE = 0x56 "sastore" None Typed("aii", "");
    POP = 0x57 "pop" None Shuffle(&["a:"]);
    POP2 = 0x58 "pop2" None Shuffle(&["ba:", "A:"]);
    DUP = 0x59 "dup" None Shuffle(&["a:aa"]);
    DUP_X1 = 0x5a "dup_x1" None Shuffle(&["ba:aba"]);
    DUP_X2 = 0x5b "dup_x2" None Shuffle(&["cba:acba", "Ba:aBa"]);
    DUP2 = 0x5c "dup2" None Shuffle(&["ba:baba", "A:AA"]);
    DUP2_X1 = 0x5d "dup2_x1" None Shuffle(&["cba:bacba", "bA:AbA"]);
    DUP2_X2 = 0x5e "dup2_x2" None Shuffle(&["dcba:badcba", "cbA:AcbA", "Cba:baCba", "BA:ABA"]);
    SWAP = 0x5f "swap" None Shuffle(&["ba:ab"]);
    IADD = 0x60 "iadd" None Typed("ii", "i");
    LADD = 0x61 "ladd" None Typed("ll", "l");
    FADD = 0x62 "fadd" None Typed("ff", "f");
    DADD = 0x63 "dadd" None Typed("dd", "d");
    ISUB = 0x64 "isub" None Typed("ii", "i");
    LSUB = 0x65 "lsub" None Typed("ll", "l");
    FSUB = 0x66 "fsub" None Typed("ff", "f");
    DSUB = 0x67 "dsub" None Typed("dd", "d");
    IMUL = 0x68 "imul" None Typed("ii", "i");
    LMUL = 0x69 "lmul" None Typed("ll", "l");
    FMUL = 0x6a "fmul" None Typed("ff", "f");
    DMUL = 0x6b "dmul" None Typed("dd", "d");
    IDIV = 0x6c "idiv" None Typed("ii", "i");
    LDIV = 0x6d "ldiv" None Typed("ll", "l");
    FDIV = 0x6e "fdiv" None Typed("ff", "f");
    DDIV = 0x6f "ddiv" None Typed("dd", "d");
    IREM = 0x70 "irem" None Typed("ii", "i");
    LREM = 0x71 "lrem" None Typed("ll", "l");
    FREM = 0x72 "frem" None Typed("ff", "f");
    DREM = 0x73 "drem" None Typed("dd", "d");
    INEG = 0x74 "ineg" None Typed("i", "i");
    LNEG = 0x75 "lneg" None Typed("l", "l");
    FNEG = 0x76 "fneg" None Typed("f", "f");
    DNEG = 0x77 "dneg" None Typed("d", "d");
    ISHL = 0x78 "ishl" None Typed("ii", "i");
    LSHL = 0x79 "lshl" None Typed("li", "l");
    ISHR = 0x7a "ishr" None Typed("ii", "i");
    LSHR = 0x7b "lshr" None Typed("li", "l");
    IUSHR = 0x7c "iushr" None Typed("ii", "i");
    LUSHR = 0x7d "lushr" None Typed("li", "l");
    IAND = 0x7e "iand" None Typed("ii", "i");
    LAND = 0x7f "land" None Typed("ll", "l");
    IOR = 0x80 "ior" None Typed("ii", "i");
    LOR = 0x81 "lor" None Typed("ll", "l");
    IXOR = 0x82 "ixor" None Typed("ii", "i");
    LXOR = 0x83 "lxor" None Typed("ll", "l");
    IINC = 0x84 "iinc" Increment Special;
    I2L = 0x85 "i2l" None Typed("i", "l");
    I2F = 0x86 "i2f" None Typed("i", "f");
    I2D = 0x87 "i2d" None Typed("i", "d");
    L2I = 0x88 "l2i" None Typed("l", "i");
    L2F = 0x89 "l2f" None Typed("l", "f");
    L2D = 0x8a "l2d" None Typed("l", "d");
    F2I = 0x8b "f2i" None Typed("f", "i");
    F2L = 0x8c "f2l" None Typed("f", "l");
    F2D = 0x8d "f2d" None Typed("f", "d");
    D2I = 0x8e "d2i" None Typed("d", "i");
    D2L = 0x8f "d2l" None Typed("d", "l");
    D2F = 0x90 "d2f" None Typed("d", "f");
    I2B = 0x91 "i2b" None Typed("i", "i");
    I2C = 0x92 "i2c" None Typed("i", "i");
    I2S = 0x93 "i2s" None Typed("i", "i");
    LCMP = 0x94 "lcmp" None Typed("ll", "i");
    FCMPL = 0x95 "fcmpl" None Typed("ff", "i");
    FCMPG = 0x96 "fcmpg" None Typed("ff", "i");
    DCMPL = 0x97 "dcmpl" None Typed("dd", "i");
    DCMPG = 0x98 "dcmpg" None Typed("dd", "i");
    IFEQ = 0x99 "ifeq" Branch Typed("i", "");
    IFNE = 0x9a "ifne" Branch Typed("i", "");
    IFLT = 0x9b "iflt" Branch Typed("i", "");
    IFGE = 0x9c "ifge" Branch Typed("i", "");
    IFGT = 0x9d "ifgt" Branch Typed("i", "");
    IFLE = 0x9e "ifle" Branch Typed("i", "");
    IF_ICMPEQ = 0x9f "if_icmpeq" Branch Typed("ii", "");
    IF_ICMPNE = 0xa0 "if_icmpne" Branch Typed("ii", "");
    IF_ICMPLT = 0xa1 "if_icmplt" Branch Typed("ii", "");
    IF_ICMPGE = 0xa2 "if_icmpge" Branch Typed("ii", "");
    IF_ICMPGT = 0xa3 "if_icmpgt" Branch Typed("ii", "");
    IF_ICMPLE = 0xa4 "if_icmple" Branch Typed("ii", "");
    IF_ACMPEQ = 0xa5 "if_acmpeq" Branch Typed("aa", "");
    IF_ACMPNE = 0xa6 "if_acmpne" Branch Typed("aa", "");
    GOTO = 0xa7 "goto" Branch Typed("", "");
    JSR = 0xa8 "jsr" Branch Special;
    RET = 0xa9 "ret" Local Special;
    TABLESWITCH = 0xaa "tableswitch" TableSwitch Typed("i", "");
    LOOKUPSWITCH = 0xab "lookupswitch" LookupSwitch Typed("i", "");
    IRETURN = 0xac "ireturn" None Special;
    LRETURN = 0xad "lreturn" None Special;
    FRETURN = 0xae "freturn" None Special;
    DRETURN = 0xaf "dreturn" None Special;
    ARETURN = 0xb0 "areturn" None Special;
    RETURN = 0xb1 "return" None Special;
    GETSTATIC = 0xb2 "getstatic" Field Special;
    PUTSTATIC = 0xb3 "putstatic" Field Special;
    GETFIELD = 0xb4 "getfield" Field Special;
    PUTFIELD = 0xb5 "putfield" Field Special;
    INVOKEVIRTUAL = 0xb6 "invokevirtual" Method Special;
    INVOKESPECIAL = 0xb7 "invokespecial" Method Special;
    INVOKESTATIC = 0xb8 "invokestatic" Method Special;
    INVOKEINTERFACE = 0xb9 "invokeinterface" Method Special;
    INVOKEDYNAMIC = 0xba "invokedynamic" InvokeDynamic Special;
    NEW = 0xbb "new" Class Special;
    NEWARRAY = 0xbc "newarray" NewArray Special;
    ANEWARRAY = 0xbd "anewarray" Class Special;
    ARRAYLENGTH = 0xbe "arraylength" None Typed("a", "i");
    ATHROW = 0xbf "athrow" None Special;
    CHECKCAST = 0xc0 "checkcast" Class Special;
    INSTANCEOF = 0xc1 "instanceof" Class Typed("a", "i");
    MONITORENTER = 0xc2 "monitorenter" None Typed("a", "");
    MONITOREXIT = 0xc3 "monitorexit" None Typed("a", "");
    MULTIANEWARRAY = 0xc5 "multianewarray" MultiANewArray Special;
    IFNULL = 0xc6 "ifnull" Branch Typed("a", "");
    IFNONNULL = 0xc7 "ifnonnull" Branch Typed("a", "");
    GOTO_W = 0xc8 "goto_w" Branch Typed("", "");
    JSR_W = 0xc9 "jsr_w" Branch Special;
}

impl Opcode {
    /// Prefix for `wide` local variable instructions
    pub const WIDE: Opcode = Opcode(0xc4);

    /// Static information about the opcode (`None` for `wide` and unassigned opcodes)
    pub fn info(self) -> Option<&'static OpcodeInfo> {
        OPCODES
            .binary_search_by_key(&self, |info| info.opcode)
            .ok()
            .map(|idx| &OPCODES[idx])
    }

    pub fn mnemonic(self) -> &'static str {
        self.info().map_or("<unknown>", |info| info.mnemonic)
    }

    /// First class file version the opcode may appear in
    pub fn since(self) -> Version {
        match self {
            Opcode::INVOKEDYNAMIC => Version::JAVA7,
            _ => Version::JAVA1,
        }
    }

    /// Last class file version the opcode may appear in, if it was retired
    pub fn until(self) -> Option<Version> {
        match self {
            Opcode::JSR | Opcode::RET | Opcode::JSR_W => Some(Version::JAVA6),
            _ => None,
        }
    }

    pub fn available_in(self, version: Version) -> bool {
        version >= self.since() && self.until().map_or(true, |until| version <= until)
    }

    /// Opcode the assembler works with (the encoding picks the short or wide variant again)
    ///
    /// `ldc_w` is `ldc`, `goto_w` is `goto`, `jsr_w` is `jsr`, and `iload_2` is `iload`.
    pub fn canonical(self) -> Opcode {
        match self.0 {
            0x13 => Opcode::LDC,
            0xc8 => Opcode::GOTO,
            0xc9 => Opcode::JSR,
            op @ 0x1a..=0x2d => Opcode(0x15 + (op - 0x1a) / 4),
            op @ 0x3b..=0x4e => Opcode(0x36 + (op - 0x3b) / 4),
            _ => self,
        }
    }

    /// Local variable built into the opcode (`2` for `iload_2`)
    pub fn implicit_local(self) -> Option<u16> {
        match self.0 {
            op @ 0x1a..=0x2d => Some(((op - 0x1a) % 4) as u16),
            op @ 0x3b..=0x4e => Some(((op - 0x3b) % 4) as u16),
            _ => None,
        }
    }

    /// Short form with the local built in, for loads and stores of slots 0 to 3
    pub fn with_implicit_local(self, index: u16) -> Option<Opcode> {
        if index > 3 {
            return None;
        }
        let index = index as u8;
        match self.0 {
            op @ 0x15..=0x19 => Some(Opcode(0x1a + (op - 0x15) * 4 + index)),
            op @ 0x36..=0x3a => Some(Opcode(0x3b + (op - 0x36) * 4 + index)),
            _ => None,
        }
    }

    /// Does control never continue to the next instruction?
    pub fn ends_flow(self) -> bool {
        matches!(
            self,
            Opcode::GOTO
                | Opcode::GOTO_W
                | Opcode::RET
                | Opcode::TABLESWITCH
                | Opcode::LOOKUPSWITCH
                | Opcode::IRETURN
                | Opcode::LRETURN
                | Opcode::FRETURN
                | Opcode::DRETURN
                | Opcode::ARETURN
                | Opcode::RETURN
                | Opcode::ATHROW
        )
    }

    /// Conditional branch (as opposed to `goto` and `jsr`)
    pub fn is_conditional(self) -> bool {
        matches!(self.0, 0x99..=0xa6 | 0xc6 | 0xc7)
    }

    /// Conditional branch testing the opposite condition
    pub fn invert(self) -> Option<Opcode> {
        match self.0 {
            op @ 0x99..=0xa6 if (op - 0x99) % 2 == 0 => Some(Opcode(op + 1)),
            op @ 0x99..=0xa6 => Some(Opcode(op - 1)),
            0xc6 => Some(Opcode::IFNONNULL),
            0xc7 => Some(Opcode::IFNULL),
            _ => None,
        }
    }

    /// Long form of an unconditional branch
    pub fn wide_branch(self) -> Option<Opcode> {
        match self {
            Opcode::GOTO => Some(Opcode::GOTO_W),
            Opcode::JSR => Some(Opcode::JSR_W),
            _ => None,
        }
    }
}

/// Find an opcode by mnemonic
pub fn lookup(mnemonic: &str) -> Option<&'static OpcodeInfo> {
    OPCODES.iter().find(|info| info.mnemonic == mnemonic)
}

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_is_sorted() {
        for pair in OPCODES.windows(2) {
            assert!(pair[0].opcode < pair[1].opcode, "{:?}", pair[1].opcode);
        }
        assert_eq!(OPCODES.len(), 201);
        assert!(Opcode::WIDE.info().is_none());
    }

    #[test]
    fn lookups() {
        assert_eq!(lookup("dup2_x1").map(|info| info.opcode), Some(Opcode::DUP2_X1));
        assert_eq!(lookup("wide").map(|info| info.opcode), None);
        assert_eq!(Opcode::IF_ICMPLT.mnemonic(), "if_icmplt");
        assert_eq!(Opcode::TABLESWITCH.info().map(|info| info.shape), Some(Shape::TableSwitch));
    }

    #[test]
    fn aliases() {
        assert_eq!(Opcode::LDC_W.canonical(), Opcode::LDC);
        assert_eq!(Opcode::GOTO_W.canonical(), Opcode::GOTO);
        assert_eq!(Opcode::DLOAD_3.canonical(), Opcode::DLOAD);
        assert_eq!(Opcode::DLOAD_3.implicit_local(), Some(3));
        assert_eq!(Opcode::ASTORE_1.canonical(), Opcode::ASTORE);
        assert_eq!(Opcode::ASTORE_1.implicit_local(), Some(1));
        assert_eq!(Opcode::FSTORE.with_implicit_local(2), Some(Opcode::FSTORE_2));
        assert_eq!(Opcode::FSTORE.with_implicit_local(4), None);
        assert_eq!(Opcode::RET.with_implicit_local(0), None);
    }

    #[test]
    fn inversions() {
        assert_eq!(Opcode::IFEQ.invert(), Some(Opcode::IFNE));
        assert_eq!(Opcode::IFNE.invert(), Some(Opcode::IFEQ));
        assert_eq!(Opcode::IF_ICMPLT.invert(), Some(Opcode::IF_ICMPGE));
        assert_eq!(Opcode::IF_ACMPNE.invert(), Some(Opcode::IF_ACMPEQ));
        assert_eq!(Opcode::IFNULL.invert(), Some(Opcode::IFNONNULL));
        assert_eq!(Opcode::GOTO.invert(), None);
        for info in OPCODES.iter().filter(|info| info.opcode.is_conditional()) {
            assert_eq!(info.opcode.invert().and_then(Opcode::invert), Some(info.opcode));
        }
    }

    #[test]
    fn versions() {
        assert!(!Opcode::INVOKEDYNAMIC.available_in(Version::JAVA6));
        assert!(Opcode::INVOKEDYNAMIC.available_in(Version::JAVA8));
        assert!(Opcode::JSR.available_in(Version::JAVA6));
        assert!(!Opcode::JSR.available_in(Version::JAVA7));
        assert!(Opcode::IADD.available_in(Version::JAVA1));
    }
}
