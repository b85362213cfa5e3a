//! Host-side representation of scripting-runtime values.
//!
//! [`Value`] is a closed tagged union over every kind the bridge can move
//! across the host/script boundary. Tables hold owned copies of their keys
//! and values (`BTreeMap<Value, Value>`), so a host-side `Value` can never
//! contain a reference cycle; cyclic structures built by a script are cut
//! off by the pull-side recursion budget instead (see [`crate::marshal`]).
//!
//! `Value` carries a strict total order so it can serve as an ordered-map
//! key: same-kind values compare by natural order, different-kind values by
//! a fixed kind rank.

use crate::engine::NativeRef;
use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Ordered mapping of values to values, the host rendering of an engine table.
pub type Table = BTreeMap<Value, Value>;

/// Ordered set of values, used as a pull-side ignore-set.
pub type ValueSet = BTreeSet<Value>;

/// The kind of value a [`Value`] or engine stack slot holds.
///
/// The declaration order fixes the cross-kind rank used by `Value`'s total
/// order: `Nil < Number < Text < Table < Function < Boolean`, with the
/// unsupported kinds ranked after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    Nil,
    Number,
    Text,
    Table,
    Function,
    Boolean,
    /// Reserved; never produced by this crate.
    UserData,
    /// Reserved; never produced by this crate.
    Thread,
    /// Reserved; never produced by this crate.
    WeakTable,
}

impl Kind {
    /// Lowercase kind name, used in diagnostics and type-mismatch errors.
    pub fn name(self) -> &'static str {
        match self {
            Kind::Nil => "nil",
            Kind::Number => "number",
            Kind::Text => "text",
            Kind::Table => "table",
            Kind::Function => "function",
            Kind::Boolean => "boolean",
            Kind::UserData => "userdata",
            Kind::Thread => "thread",
            Kind::WeakTable => "weak table",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// In-host representation of any scripting value.
///
/// A `Value` is exactly one variant at a time and is immutable after
/// construction except via [`Value::take`], which leaves the source nil.
/// Numbers are double-precision floats; "integer" is not a distinct kind but
/// a derived predicate on `Number` (see [`Value::is_integer`]).
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Number(f64),
    Text(String),
    Table(Table),
    Function(NativeRef),
    Boolean(bool),
    /// Forward-looking slot; not constructible through this crate's API and
    /// rejected by the marshaler.
    UserData,
    /// Forward-looking slot; not constructible through this crate's API and
    /// rejected by the marshaler.
    Thread,
    /// Forward-looking slot; not constructible through this crate's API and
    /// rejected by the marshaler.
    WeakTable,
}

impl Value {
    // Named constructors.

    pub fn nil() -> Value {
        Value::Nil
    }

    pub fn number(n: f64) -> Value {
        Value::Number(n)
    }

    /// A number constructed from an integer; stored as `f64` like any other.
    pub fn integer(i: i64) -> Value {
        Value::Number(i as f64)
    }

    pub fn text(s: impl Into<String>) -> Value {
        Value::Text(s.into())
    }

    pub fn table(t: Table) -> Value {
        Value::Table(t)
    }

    pub fn function(f: NativeRef) -> Value {
        Value::Function(f)
    }

    pub fn boolean(b: bool) -> Value {
        Value::Boolean(b)
    }

    /// The kind of this value.
    pub fn kind(&self) -> Kind {
        match self {
            Value::Nil => Kind::Nil,
            Value::Number(_) => Kind::Number,
            Value::Text(_) => Kind::Text,
            Value::Table(_) => Kind::Table,
            Value::Function(_) => Kind::Function,
            Value::Boolean(_) => Kind::Boolean,
            Value::UserData => Kind::UserData,
            Value::Thread => Kind::Thread,
            Value::WeakTable => Kind::WeakTable,
        }
    }

    // Predicates. These never fail.

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    /// True when the value is a finite number equal to its own truncation.
    pub fn is_integer(&self) -> bool {
        matches!(self, Value::Number(n) if n.is_finite() && *n == n.trunc())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Value::Text(_))
    }

    pub fn is_table(&self) -> bool {
        matches!(self, Value::Table(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Value::Boolean(_))
    }

    // Borrowing accessors returning `None` on a kind mismatch.

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&NativeRef> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    // Failing accessors, for callers that treat a kind mismatch as an error.

    pub fn get_number(&self) -> Result<f64> {
        self.as_number()
            .ok_or_else(|| Error::mismatch("number", self.kind().name()))
    }

    /// The value as an integer; fails if the stored number is non-finite or
    /// has a non-zero fractional part.
    pub fn get_integer(&self) -> Result<i64> {
        match self {
            Value::Number(n) if n.is_finite() && *n == n.trunc() => Ok(*n as i64),
            Value::Number(n) if !n.is_finite() => {
                Err(Error::mismatch("integer", "non-finite number"))
            }
            Value::Number(_) => Err(Error::mismatch("integer", "fractional number")),
            other => Err(Error::mismatch("integer", other.kind().name())),
        }
    }

    pub fn get_text(&self) -> Result<&str> {
        self.as_text()
            .ok_or_else(|| Error::mismatch("text", self.kind().name()))
    }

    pub fn get_table(&self) -> Result<&Table> {
        self.as_table()
            .ok_or_else(|| Error::mismatch("table", self.kind().name()))
    }

    pub fn get_function(&self) -> Result<&NativeRef> {
        self.as_function()
            .ok_or_else(|| Error::mismatch("function", self.kind().name()))
    }

    pub fn get_boolean(&self) -> Result<bool> {
        self.as_boolean()
            .ok_or_else(|| Error::mismatch("boolean", self.kind().name()))
    }

    /// Consuming accessor for tables, used where the pair map is moved on.
    pub fn into_table(self) -> Result<Table> {
        match self {
            Value::Table(t) => Ok(t),
            other => Err(Error::mismatch("table", other.kind().name())),
        }
    }

    /// Take the value out, leaving `Nil` behind.
    pub fn take(&mut self) -> Value {
        std::mem::take(self)
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
            Value::Boolean(b) => f.write_str(if *b { "true" } else { "false" }),
            Value::Function(_) => f.write_str("Function"),
            Value::Table(t) => {
                f.write_str("Table:\n")?;
                for (key, value) in t {
                    write!(f, "{:indent$}", "", indent = indent)?;
                    key.fmt_indented(f, indent + 2)?;
                    f.write_str(": ")?;
                    value.fmt_indented(f, indent + 2)?;
                    if !value.is_table() {
                        f.write_str("\n")?;
                    }
                }
                Ok(())
            }
            Value::UserData => f.write_str("userdata"),
            Value::Thread => f.write_str("thread"),
            Value::WeakTable => f.write_str("weak table"),
        }
    }
}

/// Renders nil as `nil`, numbers in default form, tables recursively with
/// increasing indentation, and functions as a placeholder token.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 2)
    }
}

// The total order: same-kind values by natural order, different-kind values
// by kind rank. Numbers use `total_cmp` so that the order is strict even in
// the presence of NaN; equality is kept consistent with it, which makes
// `Value` a well-behaved `BTreeMap` key.

impl Ord for Value {
    fn cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Nil, Value::Nil) => Ordering::Equal,
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Table(a), Value::Table(b)) => a.cmp(b),
            (Value::Function(a), Value::Function(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            _ => self.kind().cmp(&other.kind()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Value) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

// Build a Value from any directly representable host type.

impl From<f64> for Value {
    fn from(n: f64) -> Value {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Boolean(b)
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Value {
        Value::Table(t)
    }
}

impl From<NativeRef> for Value {
    fn from(f: NativeRef) -> Value {
        Value::Function(f)
    }
}
