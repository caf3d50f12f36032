//! Line-oriented method listings
//!
//! ```text,ignore,no_run
//! .class me/alec/Counter
//! .method public static count(I)I
//!     .catch java/lang/ArithmeticException from Try to Done using Handler
//!     iconst_0
//!     istore_1
//! Try:
//!     iload_1
//!     iload_0
//!     idiv
//!     istore_1
//! Done:
//!     iload_1
//!     ireturn
//! Handler:
//!     pop
//!     iconst_m1
//!     ireturn
//! .end method
//! ```
//!
//! Every line holds a directive, a label (`name:`, optionally followed by an instruction), or an
//! instruction. Comments start with a `;` at the start of a line or after whitespace (so that
//! descriptors like `Ljava/lang/String;` aren't cut short).
//!
//! Operands:
//!
//!   - locals are slot numbers, or names when symbolic locals are enabled
//!   - fields are `owner/Class.name descriptor`, methods are `owner/Class.name(params)ret`
//!   - `ldc` takes a quoted string, a number (`L` suffix for `long`, `F`/`D` for floating point),
//!     a class (`java/lang/String.class`), a method type (`(I)V`), or a method handle
//!     (`handle invokestatic java/lang/Math.abs(I)I`)
//!   - switches take `key:label` pairs and a `default:label`. `switch` picks whichever of
//!     `tableswitch` and `lookupswitch` is smaller
//!
//! Constant pool indices are handed out sequentially (starting at 1, with `long` and `double`
//! entries taking two), and equal entries share an index.

use super::{AssembledMethod, Error, MethodAssembler, Settings};
use crate::jvm::code::{
    choose_switch, lookup, ClassRef, Constant, ConstantValue, DynamicRef, FieldRef, Instruction,
    LabelId, LocalVar, MethodRef, Opcode, Shape,
};
use crate::jvm::{
    BaseType, BinaryName, FieldType, MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor,
    RefType, UnqualifiedName,
};
use std::collections::{BTreeMap, HashMap};

/// Assemble every method of a listing
pub fn assemble_listing(source: &str, settings: &Settings) -> Result<Vec<AssembledMethod>, Error> {
    let mut listing = Listing {
        settings,
        class: BinaryName::from_str("Main").map_err(|message| parse_error(0, message))?,
        pool: ConstantPool::new(),
        method: None,
        methods: vec![],
    };
    for (idx, line) in source.lines().enumerate() {
        listing.line(idx + 1, line)?;
    }
    if listing.method.is_some() {
        let line = source.lines().count();
        return Err(parse_error(line, "missing '.end method'"));
    }
    log::info!(
        "assembled {} methods ({} constant pool entries)",
        listing.methods.len(),
        listing.pool.entries.len()
    );
    Ok(listing.methods)
}

fn parse_error(line: usize, message: impl Into<String>) -> Error {
    Error::Parse {
        line,
        message: message.into(),
    }
}

/// Sequential constant pool index allocation
struct ConstantPool {
    entries: HashMap<String, u16>,
    next: u32,
}

impl ConstantPool {
    fn new() -> ConstantPool {
        ConstantPool {
            entries: HashMap::new(),
            next: 1,
        }
    }

    fn index(&mut self, key: String, slots: u32) -> Result<u16, String> {
        if let Some(index) = self.entries.get(&key) {
            return Ok(*index);
        }
        let index = u16::try_from(self.next)
            .ok()
            .filter(|index| *index < u16::MAX)
            .ok_or_else(|| String::from("constant pool is full"))?;
        self.next += slots;
        self.entries.insert(key, index);
        Ok(index)
    }
}

struct Listing<'a> {
    settings: &'a Settings,
    class: BinaryName,
    pool: ConstantPool,
    method: Option<MethodAssembler<'a>>,
    methods: Vec<AssembledMethod>,
}

impl<'a> Listing<'a> {
    fn line(&mut self, line: usize, text: &str) -> Result<(), Error> {
        let text = strip_comment(text).trim();
        if text.is_empty() {
            return Ok(());
        }

        if let Some(directive) = text.strip_prefix('.') {
            return self.directive(line, directive);
        }

        let (first, rest) = split_first(text);
        let (label, instruction) = match first.strip_suffix(':') {
            Some(label) => (Some(label), rest),
            None => (None, text),
        };
        let method = self
            .method
            .as_mut()
            .ok_or_else(|| parse_error(line, "code outside of a method"))?;
        if let Some(label) = label {
            method.place_label(label)?;
        }
        if instruction.is_empty() {
            return Ok(());
        }
        let instruction = parse_instruction(instruction, method, &mut self.pool)
            .map_err(|message| parse_error(line, message))?;
        method.push_instruction(instruction)
    }

    fn directive(&mut self, line: usize, directive: &str) -> Result<(), Error> {
        let (keyword, rest) = split_first(directive);
        let error = |message: String| parse_error(line, message);
        match keyword {
            "class" => {
                self.class = BinaryName::from_str(rest).map_err(error)?;
            }
            "method" => {
                if self.method.is_some() {
                    return Err(error(String::from("nested '.method'")));
                }
                let mut tokens: Vec<&str> = rest.split_whitespace().collect();
                let signature = tokens
                    .pop()
                    .ok_or_else(|| error(String::from("missing method name")))?;
                let mut access_flags = MethodAccessFlags::empty();
                for token in tokens {
                    access_flags |= MethodAccessFlags::from_keyword(token)
                        .ok_or_else(|| error(format!("unknown access flag '{}'", token)))?;
                }
                let paren = signature
                    .find('(')
                    .ok_or_else(|| error(format!("missing descriptor in '{}'", signature)))?;
                let name = UnqualifiedName::from_str(&signature[..paren]).map_err(error)?;
                let descriptor = MethodDescriptor::parse(&signature[paren..])
                    .map_err(|err| error(err.to_string()))?;
                self.method = Some(MethodAssembler::new(
                    self.class.clone(),
                    name,
                    descriptor,
                    access_flags,
                    self.settings,
                ));
            }
            "end" if rest == "method" => {
                let method = self
                    .method
                    .take()
                    .ok_or_else(|| error(String::from("'.end method' outside of a method")))?;
                self.methods.push(method.finish()?);
            }
            "catch" => {
                let method = self
                    .method
                    .as_mut()
                    .ok_or_else(|| error(String::from("'.catch' outside of a method")))?;
                match rest.split_whitespace().collect::<Vec<_>>()[..] {
                    [class, "from", start, "to", end, "using", handler] => {
                        let class = if class == "all" {
                            None
                        } else {
                            Some(BinaryName::from_str(class).map_err(error)?)
                        };
                        method.add_catch(start, end, handler, class);
                    }
                    _ => {
                        let msg = "expected '.catch <class> from <label> to <label> using <label>'";
                        return Err(error(String::from(msg)));
                    }
                }
            }
            "var" => {
                let method = self
                    .method
                    .as_mut()
                    .ok_or_else(|| error(String::from("'.var' outside of a method")))?;
                match rest.split_whitespace().collect::<Vec<_>>()[..] {
                    [var, descriptor] => {
                        let declared = FieldType::parse(descriptor)
                            .map_err(|err| error(err.to_string()))?;
                        method.annotate_local(local_var(var), declared);
                    }
                    _ => return Err(error(String::from("expected '.var <local> <descriptor>'"))),
                }
            }
            other => return Err(error(format!("unknown directive '.{}'", other))),
        }
        Ok(())
    }
}

/// Drop a trailing comment, if there is one
fn strip_comment(text: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    let mut previous = ' ';
    for (idx, c) in text.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            ';' if !in_string && previous.is_whitespace() => return &text[..idx],
            _ => (),
        }
        previous = c;
    }
    text
}

fn split_first(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim()),
        None => (text, ""),
    }
}

fn local_var(operand: &str) -> LocalVar {
    match operand.parse::<u16>() {
        Ok(index) => LocalVar::Index(index),
        Err(_) => LocalVar::Name(operand.to_owned()),
    }
}

fn parse_number<T: std::str::FromStr>(operand: &str) -> Result<T, String> {
    operand
        .parse::<T>()
        .map_err(|_| format!("invalid number '{}'", operand))
}

fn descriptor<T: ParseDescriptor>(source: &str) -> Result<T, String> {
    T::parse(source).map_err(|err| err.to_string())
}

/// Split `owner/Class.member` at the last `.`
fn member(operand: &str) -> Result<(BinaryName, UnqualifiedName), String> {
    let (class, name) = operand
        .rsplit_once('.')
        .ok_or_else(|| format!("expected 'Class.member', got '{}'", operand))?;
    Ok((BinaryName::from_str(class)?, UnqualifiedName::from_str(name)?))
}

/// Split `owner/Class.name(params)ret` into the member and its descriptor
fn method_member(
    operand: &str,
) -> Result<(BinaryName, UnqualifiedName, MethodDescriptor<BinaryName>), String> {
    let paren = operand
        .find('(')
        .ok_or_else(|| format!("missing descriptor in '{}'", operand))?;
    let (class, name) = member(&operand[..paren])?;
    Ok((class, name, descriptor(&operand[paren..])?))
}

fn parse_instruction(
    text: &str,
    method: &mut MethodAssembler,
    pool: &mut ConstantPool,
) -> Result<Instruction, String> {
    let (mnemonic, rest) = split_first(text);
    let operands: Vec<&str> = rest.split_whitespace().collect();

    if mnemonic == "switch" {
        let (cases, default) = switch_cases(&operands, method)?;
        return choose_switch(cases, default).map_err(|err| format!("{:?}", err));
    }

    let info = lookup(mnemonic).ok_or_else(|| format!("unknown instruction '{}'", mnemonic))?;
    let opcode = info.opcode.canonical();
    let arity = |count: usize| -> Result<(), String> {
        if operands.len() == count {
            Ok(())
        } else {
            let msg = format!("'{}' takes {} operands, got {}", mnemonic, count, operands.len());
            Err(msg)
        }
    };

    let instruction = match info.shape {
        Shape::None => {
            arity(0)?;
            Instruction::Plain(opcode)
        }
        Shape::ImplicitLocal => {
            arity(0)?;
            let index = info
                .opcode
                .implicit_local()
                .ok_or_else(|| format!("'{}' has no implicit local", mnemonic))?;
            Instruction::Local(opcode, LocalVar::Index(index))
        }
        Shape::Local => {
            arity(1)?;
            Instruction::Local(opcode, local_var(operands[0]))
        }
        Shape::Increment => {
            arity(2)?;
            Instruction::Increment(local_var(operands[0]), parse_number(operands[1])?)
        }
        Shape::Byte => {
            arity(1)?;
            Instruction::Immediate(opcode, parse_number::<i8>(operands[0])? as i32)
        }
        Shape::Short => {
            arity(1)?;
            Instruction::Immediate(opcode, parse_number::<i16>(operands[0])? as i32)
        }
        Shape::NewArray => {
            arity(1)?;
            let element = BaseType::from_keyword(operands[0])
                .ok_or_else(|| format!("unknown array element type '{}'", operands[0]))?;
            Instruction::NewArray(element)
        }
        Shape::Constant => {
            let value = constant_value(rest, opcode == Opcode::LDC2_W)?;
            let slots = if opcode == Opcode::LDC2_W { 2 } else { 1 };
            let index = pool.index(format!("{:?}", value), slots)?;
            Instruction::Constant(opcode, Constant { index, value })
        }
        Shape::Class => {
            arity(1)?;
            Instruction::Class(opcode, class_ref(operands[0], pool)?)
        }
        Shape::MultiANewArray => {
            arity(2)?;
            let class = class_ref(operands[0], pool)?;
            Instruction::MultiANewArray(class, parse_number(operands[1])?)
        }
        Shape::Field => {
            arity(2)?;
            let (class, name) = member(operands[0])?;
            let descriptor = descriptor(operands[1])?;
            let index = pool.index(format!("Field {} {}", operands[0], operands[1]), 1)?;
            Instruction::Field(
                opcode,
                FieldRef {
                    index,
                    class,
                    name,
                    descriptor,
                },
            )
        }
        Shape::Method => {
            arity(1)?;
            let (class, name, descriptor) = method_member(operands[0])?;
            let interface = opcode == Opcode::INVOKEINTERFACE;
            let index = pool.index(format!("Method {} {}", interface, operands[0]), 1)?;
            Instruction::Invoke(
                opcode,
                MethodRef {
                    index,
                    class,
                    name,
                    descriptor,
                    interface,
                },
            )
        }
        Shape::InvokeDynamic => {
            arity(1)?;
            let paren = operands[0]
                .find('(')
                .ok_or_else(|| format!("missing descriptor in '{}'", operands[0]))?;
            let name = UnqualifiedName::from_str(&operands[0][..paren])?;
            let descriptor = descriptor(&operands[0][paren..])?;
            let index = pool.index(format!("InvokeDynamic {}", operands[0]), 1)?;
            Instruction::InvokeDynamic(DynamicRef {
                index,
                name,
                descriptor,
            })
        }
        Shape::Branch => {
            arity(1)?;
            Instruction::Branch(opcode, method.label(operands[0]))
        }
        Shape::TableSwitch => {
            let (cases, default) = switch_cases(&operands, method)?;
            let (low, high) = match (cases.keys().next(), cases.keys().next_back()) {
                (Some(low), Some(high)) => (*low, *high),
                _ => return Err(String::from("'tableswitch' needs at least one case")),
            };
            if high as i64 - low as i64 + 1 != cases.len() as i64 {
                return Err(String::from("'tableswitch' keys must be contiguous"));
            }
            Instruction::TableSwitch {
                low,
                default,
                targets: cases.into_values().collect(),
            }
        }
        Shape::LookupSwitch => {
            let (cases, default) = switch_cases(&operands, method)?;
            Instruction::LookupSwitch {
                default,
                pairs: cases.into_iter().collect(),
            }
        }
    };
    Ok(instruction)
}

fn class_ref(operand: &str, pool: &mut ConstantPool) -> Result<ClassRef, String> {
    let class = RefType::parse_class_operand(operand).map_err(|err| err.to_string())?;
    let index = pool.index(format!("Class {}", operand), 1)?;
    Ok(ClassRef { index, class })
}

/// Cases (`key:label`) and default (`default:label`) of a switch
fn switch_cases(
    operands: &[&str],
    method: &mut MethodAssembler,
) -> Result<(BTreeMap<i32, LabelId>, LabelId), String> {
    let mut cases = BTreeMap::new();
    let mut default = None;
    for operand in operands {
        let (key, label) = operand
            .split_once(':')
            .ok_or_else(|| format!("expected 'key:label', got '{}'", operand))?;
        let label = method.label(label);
        if key == "default" {
            default = Some(label);
        } else if cases.insert(parse_number(key)?, label).is_some() {
            return Err(format!("duplicate switch key {}", key));
        }
    }
    let default = default.ok_or_else(|| String::from("switch without 'default:label'"))?;
    Ok((cases, default))
}

/// Parse the operand of `ldc` (`wide` for `ldc2_w`)
fn constant_value(operand: &str, wide: bool) -> Result<ConstantValue, String> {
    if let Some(quoted) = operand.strip_prefix('"') {
        let body = quoted
            .strip_suffix('"')
            .ok_or_else(|| format!("unterminated string {}", operand))?;
        return Ok(ConstantValue::String(unescape(body)?));
    }
    if let Some(class) = operand.strip_suffix(".class") {
        let class = RefType::parse_class_operand(class).map_err(|err| err.to_string())?;
        return Ok(ConstantValue::Class(class));
    }
    if operand.starts_with('(') {
        return Ok(ConstantValue::MethodType(descriptor(operand)?));
    }
    if let Some(handle) = operand.strip_prefix("handle ") {
        return Ok(ConstantValue::MethodHandle(handle.trim().to_owned()));
    }

    let number = operand.trim_end_matches(['L', 'l', 'F', 'f', 'D', 'd']);
    let suffix = operand[number.len()..].to_ascii_uppercase();
    let floating = number.contains(['.', 'e', 'E']) || number == "NaN" || number.ends_with("Infinity");
    let value = match (suffix.as_str(), floating, wide) {
        ("L", false, _) | ("", false, true) => ConstantValue::Long(parse_number(number)?),
        ("", false, false) => ConstantValue::Integer(parse_number(number)?),
        ("F", _, _) | ("", true, false) => ConstantValue::Float(parse_number(number)?),
        ("D", _, _) | ("", true, true) => ConstantValue::Double(parse_number(number)?),
        _ => return Err(format!("invalid constant '{}'", operand)),
    };
    Ok(value)
}

fn unescape(body: &str) -> Result<String, String> {
    let mut unescaped = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            unescaped.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => unescaped.push('\n'),
            Some('t') => unescaped.push('\t'),
            Some('r') => unescaped.push('\r'),
            Some(c @ ('"' | '\\' | '\'')) => unescaped.push(c),
            other => return Err(format!("invalid escape '\\{}'", other.unwrap_or(' '))),
        }
    }
    Ok(unescaped)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn comments() {
        assert_eq!(strip_comment("iconst_0 ; push zero"), "iconst_0 ");
        assert_eq!(strip_comment("; whole line"), "");
        assert_eq!(
            strip_comment("getfield A.b Ljava/lang/String;"),
            "getfield A.b Ljava/lang/String;"
        );
        assert_eq!(strip_comment("ldc \"a ; b\" ; c"), "ldc \"a ; b\" ");
    }

    #[test]
    fn constants() {
        assert_eq!(constant_value("12", false), Ok(ConstantValue::Integer(12)));
        assert_eq!(constant_value("12", true), Ok(ConstantValue::Long(12)));
        assert_eq!(constant_value("-3L", false), Ok(ConstantValue::Long(-3)));
        assert_eq!(constant_value("1.5", false), Ok(ConstantValue::Float(1.5)));
        assert_eq!(constant_value("1.5", true), Ok(ConstantValue::Double(1.5)));
        assert_eq!(constant_value("2d", false), Ok(ConstantValue::Double(2.0)));
        assert_eq!(
            constant_value("\"hi\\n\\\"there\\\"\"", false),
            Ok(ConstantValue::String(String::from("hi\n\"there\"")))
        );
        assert!(matches!(
            constant_value("java/lang/String.class", false),
            Ok(ConstantValue::Class(RefType::Object(_)))
        ));
        assert!(matches!(
            constant_value("(I)V", false),
            Ok(ConstantValue::MethodType(_))
        ));
        assert!(constant_value("twelve", false).is_err());
    }

    #[test]
    fn pool_indices() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.index(String::from("a"), 1), Ok(1));
        assert_eq!(pool.index(String::from("long"), 2), Ok(2));
        assert_eq!(pool.index(String::from("b"), 1), Ok(4));
        assert_eq!(pool.index(String::from("a"), 1), Ok(1));
    }

    #[test]
    fn whole_listing() {
        let source = "
            .class me/alec/Sign
            .method public static sign(I)I
                iload_0
                ifge Positive     ; negative
                iconst_m1
                ireturn
            Positive: iload_0
                ifeq Zero
                iconst_1
                ireturn
            Zero:
                iconst_0
                ireturn
            .end method
        ";
        let methods = assemble_listing(source, &Settings::new()).unwrap();
        assert_eq!(methods.len(), 1);
        let method = &methods[0];
        assert_eq!(method.name.as_str(), "sign");
        assert_eq!(
            method.code,
            vec![0x1a, 0x9c, 0, 5, 0x02, 0xac, 0x1a, 0x99, 0, 5, 0x04, 0xac, 0x03, 0xac]
        );
        assert_eq!(method.label_offset("Positive"), Some(6));
        assert_eq!(method.label_offset("Zero"), Some(12));
        assert_eq!((method.max_stack, method.max_locals), (1, 1));
        assert!(method.diagnostics.is_empty());
    }

    #[test]
    fn parse_errors() {
        let settings = Settings::new();
        let outside = assemble_listing("iconst_0", &settings);
        assert!(matches!(outside, Err(Error::Parse { line: 1, .. })));

        let unknown = assemble_listing(".method static f()V\n  frobnicate\n.end method", &settings);
        assert!(matches!(unknown, Err(Error::Parse { line: 2, .. })));

        let unfinished = assemble_listing(".method static f()V\n  return", &settings);
        assert!(matches!(unfinished, Err(Error::Parse { .. })));

        let gap = ".method static f(I)V\n iload_0\n tableswitch 0:A 2:A default:A\nA: return\n.end method";
        assert!(matches!(
            assemble_listing(gap, &settings),
            Err(Error::Parse { line: 3, .. })
        ));
    }
}
