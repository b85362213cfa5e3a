//! Conversion between host [`Value`]s and engine stack slots.
//!
//! Pushing grows the engine stack first and fails with
//! [`Error::StackOverflow`] when the engine refuses. Pulling is
//! depth-bounded: engine tables have reference identity and may be cyclic,
//! so recursive descent carries a budget decremented per level. The budget
//! is a heuristic guard against cycles, not true cycle detection.
//!
//! Two fixed policies are selected at build time:
//!
//! - `truncate-deep-tables`: an exhausted budget substitutes nil for the
//!   untraversed subtree instead of failing with [`Error::TableTooDeep`];
//! - `strict-foreign-kinds`: pulling an engine kind the bridge cannot
//!   represent (userdata, thread, script-defined functions) fails with
//!   [`Error::TypeMismatch`] instead of logging a diagnostic and yielding
//!   nil. The lenient default keeps whole-namespace dumps from aborting on
//!   the first opaque handle they meet.
//!
//! Table conversion is not a separate mechanism: it is `push_value` /
//! `pull_value` specialized to the `Table` variant, so the ignore-set and
//! depth budget apply uniformly whether a table is top-level or nested.

use crate::engine::{Engine, NativeRef};
use crate::error::{Error, Result};
use crate::value::{Kind, Table, Value, ValueSet};

/// Default recursion budget for nested-table pulls. Deliberately low to
/// catch circular references early; raise it if legitimate structures in
/// your scripts nest deeper.
pub const MAX_TABLE_DEPTH: usize = 8;

/// Push one value of any representable kind onto the engine stack.
///
/// Tables push a fresh engine table and then, per pair, two recursive
/// pushes and one `table_set`. The reserved kinds (`UserData`, `Thread`,
/// `WeakTable`) are not pushable and fail with `TypeMismatch`.
pub fn push_value(engine: &mut dyn Engine, value: &Value) -> Result<()> {
    if !engine.grow_stack(1) {
        return Err(Error::StackOverflow);
    }
    match value {
        Value::Nil => engine.push_nil(),
        Value::Number(n) => engine.push_number(*n),
        Value::Text(s) => engine.push_text(s),
        Value::Boolean(b) => engine.push_boolean(*b),
        Value::Function(f) => engine.push_function(f.clone()),
        Value::Table(table) => {
            engine.push_table();
            for (key, val) in table {
                push_value(engine, key)?;
                push_value(engine, val)?;
                engine.table_set(-3);
            }
        }
        other => {
            return Err(Error::mismatch(
                "pushable kind",
                other.kind().name(),
            ))
        }
    }
    Ok(())
}

/// Read the stack slot at `index` back into a [`Value`].
///
/// Scalar kinds convert directly. Tables iterate the engine's pair
/// protocol exactly once, pulling each key and value with `depth - 1` and
/// an empty ignore-set; any pair whose key or value equals a member of
/// `ignore` is discarded. The ignore-set thus applies to the level it was
/// given, which is what pruning self-referential globals (`_G` and
/// friends) out of a namespace dump needs.
pub fn pull_value(
    engine: &mut dyn Engine,
    index: isize,
    ignore: &ValueSet,
    depth: usize,
) -> Result<Value> {
    if depth == 0 {
        #[cfg(feature = "truncate-deep-tables")]
        return Ok(Value::Nil);
        #[cfg(not(feature = "truncate-deep-tables"))]
        return Err(Error::TableTooDeep);
    }

    let index = engine.absolute(index) as isize;
    let kind = engine.slot_kind(index);
    match kind {
        Kind::Nil => Ok(Value::Nil),
        Kind::Number => Ok(Value::Number(read(engine.read_number(index), kind)?)),
        Kind::Text => Ok(Value::Text(read(engine.read_text(index), kind)?)),
        Kind::Boolean => Ok(Value::Boolean(read(engine.read_boolean(index), kind)?)),
        Kind::Function => match engine.read_function(index) {
            Some(f) => Ok(Value::Function(f)),
            // A script-defined function has no host representation.
            None => unsupported(kind),
        },
        Kind::Table => {
            if !engine.grow_stack(2) {
                return Err(Error::StackOverflow);
            }
            let empty = ValueSet::new();
            let mut table = Table::new();
            engine.push_nil();
            while engine.table_next(index) {
                let key = pull_value(engine, -2, &empty, depth - 1)?;
                if ignore.contains(&key) {
                    engine.pop(1);
                    continue;
                }
                let value = pull_value(engine, -1, &empty, depth - 1)?;
                if ignore.contains(&value) {
                    engine.pop(1);
                    continue;
                }
                table.insert(key, value);
                engine.pop(1);
            }
            Ok(Value::Table(table))
        }
        Kind::UserData | Kind::Thread | Kind::WeakTable => unsupported(kind),
    }
}

fn read<T>(slot: Option<T>, kind: Kind) -> Result<T> {
    slot.ok_or_else(|| Error::mismatch(kind.name(), "unreadable slot"))
}

#[cfg(not(feature = "strict-foreign-kinds"))]
fn unsupported(kind: Kind) -> Result<Value> {
    tracing::warn!(kind = kind.name(), "pulled unsupported engine kind, substituting nil");
    Ok(Value::Nil)
}

#[cfg(feature = "strict-foreign-kinds")]
fn unsupported(kind: Kind) -> Result<Value> {
    Err(Error::mismatch("representable kind", kind.name()))
}

// ----------------------------------------------------------------------
// Typed scalar pulls
// ----------------------------------------------------------------------

fn expect_kind(engine: &dyn Engine, index: isize, expected: Kind) -> Result<()> {
    let actual = engine.slot_kind(index);
    if actual != expected {
        return Err(Error::mismatch(expected.name(), actual.name()));
    }
    Ok(())
}

pub fn pull_number(engine: &mut dyn Engine, index: isize) -> Result<f64> {
    expect_kind(engine, index, Kind::Number)?;
    read(engine.read_number(index), Kind::Number)
}

/// Pull a number and require it to be finite and integral.
pub fn pull_integer(engine: &mut dyn Engine, index: isize) -> Result<i64> {
    let n = pull_number(engine, index)?;
    if !n.is_finite() {
        return Err(Error::mismatch("integer", "non-finite number"));
    }
    if n != n.trunc() {
        return Err(Error::mismatch("integer", "fractional number"));
    }
    Ok(n as i64)
}

pub fn pull_text(engine: &mut dyn Engine, index: isize) -> Result<String> {
    expect_kind(engine, index, Kind::Text)?;
    read(engine.read_text(index), Kind::Text)
}

pub fn pull_boolean(engine: &mut dyn Engine, index: isize) -> Result<bool> {
    expect_kind(engine, index, Kind::Boolean)?;
    read(engine.read_boolean(index), Kind::Boolean)
}

pub fn pull_function(engine: &mut dyn Engine, index: isize) -> Result<NativeRef> {
    expect_kind(engine, index, Kind::Function)?;
    engine
        .read_function(index)
        .ok_or_else(|| Error::mismatch("native function", "script function"))
}

// ----------------------------------------------------------------------
// Adapter-facing conversion traits
// ----------------------------------------------------------------------

/// A host type a native-function argument can be unmarshaled into.
pub trait FromSlot: Sized {
    fn from_slot(engine: &mut dyn Engine, index: isize) -> Result<Self>;
}

impl FromSlot for f64 {
    fn from_slot(engine: &mut dyn Engine, index: isize) -> Result<f64> {
        pull_number(engine, index)
    }
}

impl FromSlot for i64 {
    fn from_slot(engine: &mut dyn Engine, index: isize) -> Result<i64> {
        pull_integer(engine, index)
    }
}

impl FromSlot for String {
    fn from_slot(engine: &mut dyn Engine, index: isize) -> Result<String> {
        pull_text(engine, index)
    }
}

impl FromSlot for bool {
    fn from_slot(engine: &mut dyn Engine, index: isize) -> Result<bool> {
        pull_boolean(engine, index)
    }
}

impl FromSlot for NativeRef {
    fn from_slot(engine: &mut dyn Engine, index: isize) -> Result<NativeRef> {
        pull_function(engine, index)
    }
}

/// Generic argument: accepts any representable kind.
impl FromSlot for Value {
    fn from_slot(engine: &mut dyn Engine, index: isize) -> Result<Value> {
        pull_value(engine, index, &ValueSet::new(), MAX_TABLE_DEPTH)
    }
}

impl FromSlot for Table {
    fn from_slot(engine: &mut dyn Engine, index: isize) -> Result<Table> {
        expect_kind(engine, index, Kind::Table)?;
        pull_value(engine, index, &ValueSet::new(), MAX_TABLE_DEPTH)?.into_table()
    }
}

/// A host return type the adapter can marshal back onto the stack.
///
/// Most types push one result; `()` pushes none; `Vec<Value>` pushes one
/// result per element.
pub trait IntoResults {
    fn into_results(self, engine: &mut dyn Engine) -> Result<usize>;
}

impl IntoResults for () {
    fn into_results(self, _engine: &mut dyn Engine) -> Result<usize> {
        Ok(0)
    }
}

impl IntoResults for Value {
    fn into_results(self, engine: &mut dyn Engine) -> Result<usize> {
        push_value(engine, &self)?;
        Ok(1)
    }
}

impl IntoResults for f64 {
    fn into_results(self, engine: &mut dyn Engine) -> Result<usize> {
        Value::Number(self).into_results(engine)
    }
}

impl IntoResults for i64 {
    fn into_results(self, engine: &mut dyn Engine) -> Result<usize> {
        Value::integer(self).into_results(engine)
    }
}

impl IntoResults for String {
    fn into_results(self, engine: &mut dyn Engine) -> Result<usize> {
        Value::Text(self).into_results(engine)
    }
}

impl IntoResults for bool {
    fn into_results(self, engine: &mut dyn Engine) -> Result<usize> {
        Value::Boolean(self).into_results(engine)
    }
}

impl IntoResults for Table {
    fn into_results(self, engine: &mut dyn Engine) -> Result<usize> {
        Value::Table(self).into_results(engine)
    }
}

impl IntoResults for NativeRef {
    fn into_results(self, engine: &mut dyn Engine) -> Result<usize> {
        Value::Function(self).into_results(engine)
    }
}

impl IntoResults for Vec<Value> {
    fn into_results(self, engine: &mut dyn Engine) -> Result<usize> {
        let count = self.len();
        for value in self {
            push_value(engine, &value)?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::reference::ReferenceEngine;

    fn table_value(pairs: Vec<(Value, Value)>) -> Value {
        Value::Table(pairs.into_iter().collect())
    }

    fn nested(depth: usize) -> Value {
        if depth == 0 {
            Value::number(1.0)
        } else {
            table_value(vec![(Value::text("inner"), nested(depth - 1))])
        }
    }

    #[test]
    fn scalar_push_pull_round_trip() {
        let mut engine = ReferenceEngine::new();
        for value in [
            Value::nil(),
            Value::number(-2.5),
            Value::text("hello"),
            Value::boolean(true),
        ] {
            push_value(&mut engine, &value).unwrap();
            let back = pull_value(&mut engine, -1, &ValueSet::new(), MAX_TABLE_DEPTH).unwrap();
            assert_eq!(back, value);
            engine.pop(1);
        }
    }

    #[test]
    fn table_round_trip_preserves_pairs() {
        let mut engine = ReferenceEngine::new();
        let value = table_value(vec![
            (Value::text("a"), Value::number(1.0)),
            (Value::number(2.0), Value::boolean(false)),
            (
                Value::text("sub"),
                table_value(vec![(Value::text("x"), Value::text("y"))]),
            ),
        ]);
        push_value(&mut engine, &value).unwrap();
        let back = pull_value(&mut engine, -1, &ValueSet::new(), MAX_TABLE_DEPTH).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn native_function_round_trip_keeps_identity() {
        fn entry(_: &mut crate::engine::CallContext<'_>) -> std::result::Result<usize, String> {
            Ok(0)
        }
        let mut engine = ReferenceEngine::new();
        let f = NativeRef::new(entry);
        push_value(&mut engine, &Value::function(f.clone())).unwrap();
        let back = pull_value(&mut engine, -1, &ValueSet::new(), MAX_TABLE_DEPTH).unwrap();
        assert_eq!(back, Value::function(f));
    }

    #[test]
    fn ignore_set_prunes_matching_pairs() {
        let mut engine = ReferenceEngine::new();
        let value = table_value(vec![
            (Value::text("keep"), Value::number(1.0)),
            (Value::text("drop_key"), Value::number(2.0)),
            (Value::text("k"), Value::text("drop_value")),
        ]);
        push_value(&mut engine, &value).unwrap();

        let mut ignore = ValueSet::new();
        ignore.insert(Value::text("drop_key"));
        ignore.insert(Value::text("drop_value"));
        let back = pull_value(&mut engine, -1, &ignore, MAX_TABLE_DEPTH).unwrap();
        let expected = table_value(vec![(Value::text("keep"), Value::number(1.0))]);
        assert_eq!(back, expected);
    }

    #[test]
    fn empty_ignore_set_is_a_no_op() {
        let mut engine = ReferenceEngine::new();
        let value = table_value(vec![(Value::text("a"), Value::number(1.0))]);
        push_value(&mut engine, &value).unwrap();
        let back = pull_value(&mut engine, -1, &ValueSet::new(), MAX_TABLE_DEPTH).unwrap();
        assert_eq!(back, value);
    }

    #[cfg(not(feature = "truncate-deep-tables"))]
    #[test]
    fn deep_table_fails_with_table_too_deep() {
        let mut engine = ReferenceEngine::new();
        // Twice the budget: pushing is unbounded, pulling is guarded.
        push_value(&mut engine, &nested(MAX_TABLE_DEPTH * 2)).unwrap();
        let err = pull_value(&mut engine, 1, &ValueSet::new(), MAX_TABLE_DEPTH).unwrap_err();
        assert!(matches!(err, Error::TableTooDeep));
    }

    #[cfg(feature = "truncate-deep-tables")]
    #[test]
    fn deep_table_truncates_to_nil() {
        let mut engine = ReferenceEngine::new();
        push_value(&mut engine, &nested(MAX_TABLE_DEPTH * 2)).unwrap();
        let back = pull_value(&mut engine, 1, &ValueSet::new(), MAX_TABLE_DEPTH).unwrap();
        // The traversal terminated; somewhere below, a subtree became nil.
        assert!(back.is_table());
    }

    #[test]
    fn shallow_pull_within_budget_succeeds() {
        let mut engine = ReferenceEngine::new();
        let value = nested(MAX_TABLE_DEPTH - 2);
        push_value(&mut engine, &value).unwrap();
        let back = pull_value(&mut engine, 1, &ValueSet::new(), MAX_TABLE_DEPTH).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn typed_pulls_enforce_kinds() {
        let mut engine = ReferenceEngine::new();
        push_value(&mut engine, &Value::text("not a number")).unwrap();
        assert!(matches!(
            pull_number(&mut engine, 1),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            pull_boolean(&mut engine, 1),
            Err(Error::TypeMismatch { .. })
        ));
        assert_eq!(pull_text(&mut engine, 1).unwrap(), "not a number");
    }

    #[test]
    fn integer_pull_rejects_fractional_numbers() {
        let mut engine = ReferenceEngine::new();
        push_value(&mut engine, &Value::number(1.5)).unwrap();
        assert!(matches!(
            pull_integer(&mut engine, 1),
            Err(Error::TypeMismatch { .. })
        ));
        engine.pop(1);
        push_value(&mut engine, &Value::number(7.0)).unwrap();
        assert_eq!(pull_integer(&mut engine, 1).unwrap(), 7);
    }

    #[test]
    fn integer_pull_rejects_non_finite_numbers() {
        let mut engine = ReferenceEngine::new();
        for n in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            push_value(&mut engine, &Value::number(n)).unwrap();
            assert!(matches!(
                pull_integer(&mut engine, -1),
                Err(Error::TypeMismatch { .. })
            ));
            engine.pop(1);
        }
    }

    #[test]
    fn pushing_reserved_kinds_fails() {
        let mut engine = ReferenceEngine::new();
        for value in [Value::UserData, Value::Thread, Value::WeakTable] {
            assert!(matches!(
                push_value(&mut engine, &value),
                Err(Error::TypeMismatch { .. })
            ));
        }
    }

    #[cfg(not(feature = "strict-foreign-kinds"))]
    #[test]
    fn userdata_pulls_as_nil_under_lenient_policy() {
        use crate::engine::{Engine, Lib};
        let mut engine = ReferenceEngine::new();
        engine.mount_library(Lib::Io, "io").unwrap();
        engine.get_global("io");
        let io = pull_value(&mut engine, -1, &ValueSet::new(), MAX_TABLE_DEPTH).unwrap();
        let io = io.get_table().unwrap().clone();
        assert_eq!(io[&Value::text("stdout")], Value::nil());
        assert_eq!(io[&Value::text("stderr")], Value::nil());
    }
}
