//! Self-describing command encoding.
//!
//! Every command is one byte of command number followed by its arguments,
//! packed big-endian per the command's schema. Three schemas exist:
//!
//!   Fixed    number | field | field | ...
//!   List     number | count(1) | element * count
//!   String   number | field | ... | len(1) | bytes[len]
//!
//! Several encoded commands may be concatenated in one packet payload; GSE
//! padding bytes (0xFF) between or after them are skipped on decode.

use std::collections::{BTreeMap, HashMap};

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::wire::COMMAND_PAD_BYTE;

/// Keyword under which list commands carry their elements.
pub const LIST_ARGUMENT: &str = "list_argument";

/// Numbers 0..=254 are assignable; 255 is the pad byte.
pub const MAX_COMMANDS: usize = 255;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command {0:?}")]
    UnknownName(String),

    #[error("unknown command number {0}")]
    UnknownNumber(u8),

    #[error("command {command}: buffer carries number {received}, expected {expected}")]
    NumberMismatch {
        command: &'static str,
        expected: u8,
        received: u8,
    },

    #[error("command {command} does not take argument {argument:?}")]
    UnexpectedArgument { command: &'static str, argument: String },

    #[error("argument {argument:?} missing when encoding {command}")]
    MissingArgument { command: &'static str, argument: String },

    #[error("argument {argument:?} has the wrong type for {expected}")]
    WrongType { argument: String, expected: &'static str },

    #[error("argument {argument:?} value {value} does not fit in {ty}")]
    OutOfRange {
        argument: String,
        value: String,
        ty: &'static str,
    },

    #[error("command {command} needs {needed} bytes, {available} available")]
    Truncated {
        command: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("argument {argument:?} has {len} elements, at most 255 fit")]
    TooLong { argument: String, len: usize },

    #[error("registry already holds {MAX_COMMANDS} commands")]
    RegistryFull,

    #[error("command {0:?} registered twice")]
    DuplicateName(&'static str),
}

// ── Values ────────────────────────────────────────────────────────────────────

/// An argument value as carried by an [`Invocation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Int(i64),
    /// u64 arguments, which may exceed `i64::MAX`.
    Uint(u64),
    Float(f64),
    List(Vec<Value>),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Uint(v) => i64::try_from(*v).ok(),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Uint(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            Value::Float(v) if v.fract() == 0.0 && *v >= 0.0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Uint(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(","))
            }
            Value::Bytes(b) => write!(f, "{:?}", String::from_utf8_lossy(b)),
        }
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(v as i64)
            }
        })*
    };
}

value_from_int!(u8, i8, u16, i16, u32, i32, i64);

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Bytes(v.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Keyword arguments of one invocation.
pub type Args = BTreeMap<String, Value>;

// ── Primitive types ───────────────────────────────────────────────────────────

/// Binary primitive an argument or status field is packed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl ArgType {
    pub fn width(self) -> usize {
        match self {
            ArgType::U8 | ArgType::I8 => 1,
            ArgType::U16 | ArgType::I16 => 2,
            ArgType::U32 | ArgType::I32 | ArgType::F32 => 4,
            ArgType::U64 | ArgType::I64 | ArgType::F64 => 8,
        }
    }

    /// Struct-format letter, as shown in command listings.
    pub fn code(self) -> char {
        match self {
            ArgType::U8 => 'B',
            ArgType::I8 => 'b',
            ArgType::U16 => 'H',
            ArgType::I16 => 'h',
            ArgType::U32 => 'I',
            ArgType::I32 => 'i',
            ArgType::U64 => 'Q',
            ArgType::I64 => 'q',
            ArgType::F32 => 'f',
            ArgType::F64 => 'd',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ArgType::U8 => "u8",
            ArgType::I8 => "i8",
            ArgType::U16 => "u16",
            ArgType::I16 => "i16",
            ArgType::U32 => "u32",
            ArgType::I32 => "i32",
            ArgType::U64 => "u64",
            ArgType::I64 => "i64",
            ArgType::F32 => "f32",
            ArgType::F64 => "f64",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ArgType::F32 | ArgType::F64)
    }

    /// Inclusive range a `Value::Int` may take for this type. u64 values
    /// above `i64::MAX` travel as `Value::Uint`.
    pub fn int_range(self) -> Option<(i64, i64)> {
        match self {
            ArgType::U8 => Some((0, u8::MAX as i64)),
            ArgType::I8 => Some((i8::MIN as i64, i8::MAX as i64)),
            ArgType::U16 => Some((0, u16::MAX as i64)),
            ArgType::I16 => Some((i16::MIN as i64, i16::MAX as i64)),
            ArgType::U32 => Some((0, u32::MAX as i64)),
            ArgType::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
            ArgType::U64 => Some((0, i64::MAX)),
            ArgType::I64 => Some((i64::MIN, i64::MAX)),
            ArgType::F32 | ArgType::F64 => None,
        }
    }

    /// Write an integer already known to be in range.
    pub(crate) fn put_int(self, out: &mut BytesMut, v: i64) {
        match self {
            ArgType::U8 => out.put_u8(v as u8),
            ArgType::I8 => out.put_i8(v as i8),
            ArgType::U16 => out.put_u16(v as u16),
            ArgType::I16 => out.put_i16(v as i16),
            ArgType::U32 => out.put_u32(v as u32),
            ArgType::I32 => out.put_i32(v as i32),
            ArgType::U64 => out.put_u64(v as u64),
            ArgType::I64 => out.put_i64(v),
            ArgType::F32 => out.put_f32(v as f32),
            ArgType::F64 => out.put_f64(v as f64),
        }
    }

    pub(crate) fn put_float(self, out: &mut BytesMut, v: f64) {
        match self {
            ArgType::F32 => out.put_f32(v as f32),
            ArgType::F64 => out.put_f64(v),
            int => int.put_int(out, v as i64),
        }
    }

    /// Pack `value` for argument `name`.
    ///
    /// Integers outside the type's range are an error. Narrowing that loses
    /// information (a fractional float into an integer field, an f64 into
    /// f32) is logged and the narrowed value is sent.
    pub fn pack(self, name: &str, value: &Value, out: &mut BytesMut) -> Result<(), CommandError> {
        match (self.int_range(), value) {
            (Some(_), Value::Uint(v)) => {
                if self == ArgType::U64 {
                    out.put_u64(*v);
                } else {
                    let v = i64::try_from(*v).map_err(|_| self.out_of_range(name, v))?;
                    return self.pack(name, &Value::Int(v), out);
                }
            }
            (None, Value::Uint(v)) => self.put_float(out, *v as f64),
            (Some((min, max)), Value::Int(v)) => {
                if *v < min || *v > max {
                    return Err(self.out_of_range(name, v));
                }
                self.put_int(out, *v);
            }
            (Some((min, max)), Value::Float(v)) => {
                let truncated = v.trunc();
                if !truncated.is_finite() || truncated < min as f64 || truncated > max as f64 {
                    return Err(self.out_of_range(name, v));
                }
                if truncated != *v {
                    tracing::error!(
                        argument = name,
                        format = %self.code(),
                        original = v,
                        formatted = truncated,
                        "formatting argument loses information"
                    );
                }
                self.put_int(out, truncated as i64);
            }
            (None, Value::Int(v)) => self.put_float(out, *v as f64),
            (None, Value::Float(v)) => {
                if self == ArgType::F32 && !close(*v, (*v as f32) as f64) {
                    tracing::error!(
                        argument = name,
                        original = v,
                        formatted = (*v as f32) as f64,
                        "formatting argument as f32 loses information"
                    );
                }
                self.put_float(out, *v);
            }
            _ => {
                return Err(CommandError::WrongType {
                    argument: name.to_string(),
                    expected: self.name(),
                })
            }
        }
        Ok(())
    }

    /// Read one value from the front of `buf`, which must hold `width()` bytes.
    pub fn unpack(self, buf: &[u8]) -> Value {
        let mut raw = [0u8; 8];
        raw[..self.width()].copy_from_slice(&buf[..self.width()]);
        match self {
            ArgType::U8 => Value::Int(raw[0] as i64),
            ArgType::I8 => Value::Int(raw[0] as i8 as i64),
            ArgType::U16 => Value::Int(u16::from_be_bytes([raw[0], raw[1]]) as i64),
            ArgType::I16 => Value::Int(i16::from_be_bytes([raw[0], raw[1]]) as i64),
            ArgType::U32 => Value::Int(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64),
            ArgType::I32 => Value::Int(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64),
            ArgType::U64 => Value::Uint(u64::from_be_bytes(raw)),
            ArgType::I64 => Value::Int(i64::from_be_bytes(raw)),
            ArgType::F32 => Value::Float(f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64),
            ArgType::F64 => Value::Float(f64::from_be_bytes(raw)),
        }
    }

    /// Parse a textual argument the way the ground tool accepts it.
    pub fn parse(self, name: &str, text: &str) -> Result<Value, CommandError> {
        let wrong = || CommandError::WrongType {
            argument: name.to_string(),
            expected: self.name(),
        };
        if self.is_float() {
            text.trim().parse::<f64>().map(Value::Float).map_err(|_| wrong())
        } else if self == ArgType::U64 {
            text.trim().parse::<u64>().map(Value::Uint).map_err(|_| wrong())
        } else {
            text.trim().parse::<i64>().map(Value::Int).map_err(|_| wrong())
        }
    }

    fn out_of_range(self, name: &str, value: impl std::fmt::Display) -> CommandError {
        CommandError::OutOfRange {
            argument: name.to_string(),
            value: value.to_string(),
            ty: self.name(),
        }
    }
}

/// Relative/absolute closeness with the usual numeric tolerances.
fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-8 + 1e-5 * b.abs()
}

// ── Schemas ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub ty: ArgType,
}

impl Field {
    pub const fn new(name: &'static str, ty: ArgType) -> Self {
        Self { name, ty }
    }
}

/// How a command's arguments are laid out after its number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
    Fixed(Vec<Field>),
    List { element: ArgType },
    String { fields: Vec<Field>, string_name: &'static str },
}

impl Schema {
    pub fn fixed(fields: &[(&'static str, ArgType)]) -> Self {
        Schema::Fixed(to_fields(fields))
    }

    pub fn list(element: ArgType) -> Self {
        Schema::List { element }
    }

    pub fn string(fields: &[(&'static str, ArgType)], string_name: &'static str) -> Self {
        Schema::String {
            fields: to_fields(fields),
            string_name,
        }
    }

    fn leading_fields(&self) -> &[Field] {
        match self {
            Schema::Fixed(fields) | Schema::String { fields, .. } => fields,
            Schema::List { .. } => &[],
        }
    }

    /// Argument names in wire order.
    pub fn argument_names(&self) -> Vec<&'static str> {
        match self {
            Schema::Fixed(fields) => fields.iter().map(|f| f.name).collect(),
            Schema::List { .. } => vec![LIST_ARGUMENT],
            Schema::String { fields, string_name } => {
                fields.iter().map(|f| f.name).chain(std::iter::once(*string_name)).collect()
            }
        }
    }

    /// Bytes after the command number that are present regardless of values.
    fn fixed_size(&self) -> usize {
        let fields: usize = self.leading_fields().iter().map(|f| f.ty.width()).sum();
        match self {
            Schema::Fixed(_) => fields,
            Schema::List { .. } | Schema::String { .. } => fields + 1,
        }
    }
}

fn to_fields(fields: &[(&'static str, ArgType)]) -> Vec<Field> {
    fields.iter().map(|&(name, ty)| Field::new(name, ty)).collect()
}

// ── Commands ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Command {
    name: &'static str,
    number: u8,
    schema: Schema,
    doc: &'static str,
}

impl Command {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn doc(&self) -> &'static str {
        self.doc
    }

    /// Smallest possible encoding, command number included.
    pub fn encoded_min_size(&self) -> usize {
        1 + self.schema.fixed_size()
    }

    /// Signature line for listings, e.g. `set_focus(focus_step: u16)`.
    pub fn signature(&self) -> String {
        let args: Vec<String> = match &self.schema {
            Schema::Fixed(fields) => fields.iter().map(|f| format!("{}: {}", f.name, f.ty.name())).collect(),
            Schema::List { element } => vec![format!("{LIST_ARGUMENT}: [{}]", element.name())],
            Schema::String { fields, string_name } => fields
                .iter()
                .map(|f| format!("{}: {}", f.name, f.ty.name()))
                .chain(std::iter::once(format!("{string_name}: bytes")))
                .collect(),
        };
        format!("{}({})", self.name, args.join(", "))
    }

    pub fn encode(&self, args: &Args) -> Result<Bytes, CommandError> {
        let names = self.schema.argument_names();
        if let Some(extra) = args.keys().find(|k| !names.iter().any(|n| *n == k.as_str())) {
            return Err(CommandError::UnexpectedArgument {
                command: self.name,
                argument: extra.clone(),
            });
        }
        let arg = |name: &str| {
            args.get(name).ok_or_else(|| CommandError::MissingArgument {
                command: self.name,
                argument: name.to_string(),
            })
        };

        let mut out = BytesMut::with_capacity(self.encoded_min_size());
        out.put_u8(self.number);
        for field in self.schema.leading_fields() {
            field.ty.pack(field.name, arg(field.name)?, &mut out)?;
        }

        match &self.schema {
            Schema::Fixed(_) => {}
            Schema::List { element } => {
                let items = arg(LIST_ARGUMENT)?.as_list().ok_or(CommandError::WrongType {
                    argument: LIST_ARGUMENT.to_string(),
                    expected: "list",
                })?;
                out.put_u8(count_byte(LIST_ARGUMENT, items.len())?);
                for item in items {
                    element.pack(LIST_ARGUMENT, item, &mut out)?;
                }
            }
            Schema::String { string_name, .. } => {
                let bytes = arg(*string_name)?.as_bytes().ok_or(CommandError::WrongType {
                    argument: string_name.to_string(),
                    expected: "bytes",
                })?;
                out.put_u8(count_byte(*string_name, bytes.len())?);
                out.put_slice(bytes);
            }
        }
        Ok(out.freeze())
    }

    /// Decode this command from the front of `buf`, returning the rest.
    pub fn decode<'a>(&self, buf: &'a [u8]) -> Result<(Args, &'a [u8]), CommandError> {
        self.need(self.encoded_min_size(), buf)?;
        if buf[0] != self.number {
            return Err(CommandError::NumberMismatch {
                command: self.name,
                expected: self.number,
                received: buf[0],
            });
        }

        let mut args = Args::new();
        let mut cursor = 1;
        for field in self.schema.leading_fields() {
            args.insert(field.name.to_string(), field.ty.unpack(&buf[cursor..]));
            cursor += field.ty.width();
        }

        match &self.schema {
            Schema::Fixed(_) => {}
            Schema::List { element } => {
                let count = buf[cursor] as usize;
                cursor += 1;
                self.need(cursor + count * element.width(), buf)?;
                let items = (0..count)
                    .map(|i| element.unpack(&buf[cursor + i * element.width()..]))
                    .collect();
                cursor += count * element.width();
                args.insert(LIST_ARGUMENT.to_string(), Value::List(items));
            }
            Schema::String { string_name, .. } => {
                let len = buf[cursor] as usize;
                cursor += 1;
                self.need(cursor + len, buf)?;
                args.insert(string_name.to_string(), Value::Bytes(buf[cursor..cursor + len].to_vec()));
                cursor += len;
            }
        }
        Ok((args, &buf[cursor..]))
    }

    /// Build arguments from `key=value` text pairs.
    pub fn parse_args<'a>(&self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Args, CommandError> {
        let mut args = Args::new();
        for (key, text) in pairs {
            let value = match &self.schema {
                Schema::List { element } if key == LIST_ARGUMENT => Value::List(
                    text.split(',')
                        .filter(|s| !s.trim().is_empty())
                        .map(|s| element.parse(key, s))
                        .collect::<Result<_, _>>()?,
                ),
                Schema::String { string_name, .. } if key == *string_name => Value::from(text),
                schema => {
                    let field = schema.leading_fields().iter().find(|f| f.name == key).ok_or_else(|| {
                        CommandError::UnexpectedArgument {
                            command: self.name,
                            argument: key.to_string(),
                        }
                    })?;
                    field.ty.parse(key, text)?
                }
            };
            args.insert(key.to_string(), value);
        }
        Ok(args)
    }

    fn need(&self, needed: usize, buf: &[u8]) -> Result<(), CommandError> {
        if buf.len() < needed {
            return Err(CommandError::Truncated {
                command: self.name,
                needed,
                available: buf.len(),
            });
        }
        Ok(())
    }
}

fn count_byte(argument: &str, len: usize) -> Result<u8, CommandError> {
    u8::try_from(len).map_err(|_| CommandError::TooLong {
        argument: argument.to_string(),
        len,
    })
}

// ── Invocations ───────────────────────────────────────────────────────────────

/// A decoded command: name plus keyword arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub name: String,
    #[serde(default)]
    pub args: Args,
}

impl Invocation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Args::new(),
        }
    }

    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    pub fn int(&self, key: &str) -> Result<i64, CommandError> {
        self.value(key)?.as_i64().ok_or_else(|| self.wrong(key, "integer"))
    }

    pub fn float(&self, key: &str) -> Result<f64, CommandError> {
        self.value(key)?.as_f64().ok_or_else(|| self.wrong(key, "number"))
    }

    pub fn bytes(&self, key: &str) -> Result<&[u8], CommandError> {
        self.value(key)?.as_bytes().ok_or_else(|| self.wrong(key, "bytes"))
    }

    pub fn list(&self, key: &str) -> Result<&[Value], CommandError> {
        self.value(key)?.as_list().ok_or_else(|| self.wrong(key, "list"))
    }

    fn value(&self, key: &str) -> Result<&Value, CommandError> {
        self.args.get(key).ok_or_else(|| CommandError::MissingArgument {
            command: "invocation",
            argument: key.to_string(),
        })
    }

    fn wrong(&self, key: &str, expected: &'static str) -> CommandError {
        CommandError::WrongType {
            argument: key.to_string(),
            expected,
        }
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let args: Vec<String> = self.args.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}({})", self.name, args.join(", "))
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Name ↔ number bijection. Numbers are assigned in registration order.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: Vec<Command>,
    by_name: HashMap<&'static str, u8>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, schema: Schema, doc: &'static str) -> Result<u8, CommandError> {
        if self.commands.len() >= MAX_COMMANDS {
            return Err(CommandError::RegistryFull);
        }
        if self.by_name.contains_key(name) {
            return Err(CommandError::DuplicateName(name));
        }
        let number = self.commands.len() as u8;
        self.commands.push(Command { name, number, schema, doc });
        self.by_name.insert(name, number);
        Ok(number)
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.by_name.get(name).map(|n| &self.commands[*n as usize])
    }

    pub fn by_number(&self, number: u8) -> Option<&Command> {
        self.commands.get(number as usize)
    }

    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn encode(&self, name: &str, args: &Args) -> Result<Bytes, CommandError> {
        self.get(name)
            .ok_or_else(|| CommandError::UnknownName(name.to_string()))?
            .encode(args)
    }

    pub fn encode_invocation(&self, invocation: &Invocation) -> Result<Bytes, CommandError> {
        self.encode(&invocation.name, &invocation.args)
    }

    /// Decode one command from the front of `buf`.
    pub fn decode<'a>(&self, buf: &'a [u8]) -> Result<(Invocation, &'a [u8]), CommandError> {
        let Some(&number) = buf.first() else {
            return Err(CommandError::Truncated {
                command: "command number",
                needed: 1,
                available: 0,
            });
        };
        let command = self.by_number(number).ok_or(CommandError::UnknownNumber(number))?;
        let (args, rest) = command.decode(buf)?;
        Ok((
            Invocation {
                name: command.name.to_string(),
                args,
            },
            rest,
        ))
    }

    /// Decode every command in a packet payload, skipping pad bytes.
    pub fn decode_all(&self, payload: &[u8]) -> Result<Vec<Invocation>, CommandError> {
        let mut invocations = Vec::new();
        let mut rest = payload;
        while let Some(&first) = rest.first() {
            if first == COMMAND_PAD_BYTE {
                rest = &rest[1..];
                continue;
            }
            let (invocation, remainder) = self.decode(rest)?;
            invocations.push(invocation);
            rest = remainder;
        }
        Ok(invocations)
    }
}
