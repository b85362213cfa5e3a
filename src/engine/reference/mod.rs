//! Compact reference implementation of the [`Engine`] trait.
//!
//! This interpreter exists so the crate is runnable and testable without an
//! external runtime; the bridge itself only ever talks to it through the
//! [`Engine`] trait. It executes the small dialect described in [`syntax`]
//! over a single operand stack with frame-base addressing: during a native
//! call the base is moved so the callee sees exactly its own arguments.
//!
//! Engine tables have reference identity (a script can build cyclic
//! structures), which is precisely what the pull-side recursion budget in
//! [`crate::marshal`] guards against.

mod syntax;

use self::syntax::{BinOp, Expr, FieldKey, Stmt, Target};
use super::{ChunkMode, Engine, EngineFault, Lib, NativeRef};
use crate::value::Kind;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Upper bound on total stack slots; `grow_stack` refuses beyond this.
const MAX_STACK: usize = 1 << 20;

/// A script-defined function: named parameters over a statement block.
#[derive(Debug)]
pub(crate) struct ScriptFn {
    pub(crate) name: String,
    pub(crate) params: Vec<String>,
    pub(crate) body: Vec<Stmt>,
}

type TableRef = Rc<RefCell<Vec<(Slot, Slot)>>>;

/// One engine-native value.
#[derive(Debug, Clone)]
enum Slot {
    Nil,
    Number(f64),
    Text(Rc<str>),
    Boolean(bool),
    Table(TableRef),
    Native(NativeRef),
    Script(Rc<ScriptFn>),
    /// Opaque host object (e.g. `io.stdout`); not representable across the
    /// bridge.
    UserData(usize),
}

impl Slot {
    fn kind(&self) -> Kind {
        match self {
            Slot::Nil => Kind::Nil,
            Slot::Number(_) => Kind::Number,
            Slot::Text(_) => Kind::Text,
            Slot::Boolean(_) => Kind::Boolean,
            Slot::Table(_) => Kind::Table,
            Slot::Native(_) | Slot::Script(_) => Kind::Function,
            Slot::UserData(_) => Kind::UserData,
        }
    }

    /// Raw equality: scalars by content, tables and functions by identity.
    fn raw_eq(&self, other: &Slot) -> bool {
        match (self, other) {
            (Slot::Nil, Slot::Nil) => true,
            (Slot::Number(a), Slot::Number(b)) => a == b,
            (Slot::Text(a), Slot::Text(b)) => a == b,
            (Slot::Boolean(a), Slot::Boolean(b)) => a == b,
            (Slot::Table(a), Slot::Table(b)) => Rc::ptr_eq(a, b),
            (Slot::Native(a), Slot::Native(b)) => a == b,
            (Slot::Script(a), Slot::Script(b)) => Rc::ptr_eq(a, b),
            (Slot::UserData(a), Slot::UserData(b)) => a == b,
            _ => false,
        }
    }
}

fn new_table() -> TableRef {
    Rc::new(RefCell::new(Vec::new()))
}

/// Set `table[key] = value`, replacing an existing pair; a nil value removes
/// the key, a nil key is ignored.
fn table_set_pair(table: &TableRef, key: Slot, value: Slot) {
    if matches!(key, Slot::Nil) {
        return;
    }
    let mut pairs = table.borrow_mut();
    if let Some(pos) = pairs.iter().position(|(k, _)| k.raw_eq(&key)) {
        if matches!(value, Slot::Nil) {
            pairs.remove(pos);
        } else {
            pairs[pos].1 = value;
        }
    } else if !matches!(value, Slot::Nil) {
        pairs.push((key, value));
    }
}

fn table_get_pair(table: &TableRef, key: &Slot) -> Slot {
    table
        .borrow()
        .iter()
        .find(|(k, _)| k.raw_eq(key))
        .map(|(_, v)| v.clone())
        .unwrap_or(Slot::Nil)
}

/// Local bindings of a script-function frame (the parameters).
type Locals = HashMap<String, Slot>;

/// The reference engine: one operand stack, one globals table.
pub struct ReferenceEngine {
    stack: Vec<Slot>,
    /// Current frame base; slot 1 of the frame is `stack[base]`.
    base: usize,
    globals: TableRef,
}

impl Default for ReferenceEngine {
    fn default() -> Self {
        ReferenceEngine::new()
    }
}

impl ReferenceEngine {
    pub fn new() -> ReferenceEngine {
        ReferenceEngine {
            stack: Vec::new(),
            base: 0,
            globals: new_table(),
        }
    }

    fn slot(&self, index: isize) -> Slot {
        let abs = self.absolute(index);
        if abs == 0 {
            return Slot::Nil;
        }
        self.stack
            .get(self.base + abs - 1)
            .cloned()
            .unwrap_or(Slot::Nil)
    }

    fn global_slot(&self, name: &str) -> Slot {
        table_get_pair(&self.globals, &Slot::Text(name.into()))
    }

    fn set_global_slot(&mut self, name: &str, value: Slot) {
        table_set_pair(&self.globals, Slot::Text(name.into()), value);
    }

    // ------------------------------------------------------------------
    // Evaluator
    // ------------------------------------------------------------------

    fn runtime_error(&self, msg: String) -> EngineFault {
        EngineFault::Runtime(msg)
    }

    /// Execute a statement block; `Some(values)` when a `return` ran.
    fn exec_block(
        &mut self,
        stmts: &[Stmt],
        locals: &mut Locals,
    ) -> Result<Option<Vec<Slot>>, EngineFault> {
        for stmt in stmts {
            match stmt {
                Stmt::Assign(target, expr) => {
                    let value = self.eval(expr, locals)?;
                    match target {
                        Target::Global(name) => {
                            if locals.contains_key(name) {
                                locals.insert(name.clone(), value);
                            } else {
                                self.set_global_slot(name, value);
                            }
                        }
                        Target::Field(base, field) => {
                            let base = self.eval(base, locals)?;
                            match base {
                                Slot::Table(t) => {
                                    table_set_pair(&t, Slot::Text(field.as_str().into()), value);
                                }
                                other => {
                                    return Err(self.runtime_error(format!(
                                        "attempt to index a {} value ('{}')",
                                        other.kind().name(),
                                        field
                                    )))
                                }
                            }
                        }
                    }
                }
                Stmt::Return(exprs) => {
                    let mut values = Vec::with_capacity(exprs.len());
                    for expr in exprs {
                        values.push(self.eval(expr, locals)?);
                    }
                    return Ok(Some(values));
                }
                Stmt::Expr(expr) => {
                    self.eval(expr, locals)?;
                }
            }
        }
        Ok(None)
    }

    fn eval(&mut self, expr: &Expr, locals: &mut Locals) -> Result<Slot, EngineFault> {
        match expr {
            Expr::Nil => Ok(Slot::Nil),
            Expr::True => Ok(Slot::Boolean(true)),
            Expr::False => Ok(Slot::Boolean(false)),
            Expr::Number(n) => Ok(Slot::Number(*n)),
            Expr::Text(s) => Ok(Slot::Text(s.as_str().into())),
            Expr::Function(f) => Ok(Slot::Script(f.clone())),
            Expr::Name(name) => Ok(locals
                .get(name)
                .cloned()
                .unwrap_or_else(|| self.global_slot(name))),
            Expr::Field(base, field) => {
                let base = self.eval(base, locals)?;
                match base {
                    Slot::Table(t) => Ok(table_get_pair(&t, &Slot::Text(field.as_str().into()))),
                    other => Err(self.runtime_error(format!(
                        "attempt to index a {} value ('{}')",
                        other.kind().name(),
                        field
                    ))),
                }
            }
            Expr::Call(callee, args) => {
                let callee = self.eval(callee, locals)?;
                self.stack.push(callee);
                for arg in args {
                    let value = self.eval(arg, locals)?;
                    self.stack.push(value);
                }
                let nres = self.call(args.len())?;
                // Expression context truncates a call to its first result.
                let result = if nres > 0 {
                    self.stack[self.stack.len() - nres].clone()
                } else {
                    Slot::Nil
                };
                self.stack.truncate(self.stack.len() - nres);
                Ok(result)
            }
            Expr::Neg(operand) => match self.eval(operand, locals)? {
                Slot::Number(n) => Ok(Slot::Number(-n)),
                other => Err(self.runtime_error(format!(
                    "attempt to perform arithmetic on a {} value",
                    other.kind().name()
                ))),
            },
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs, locals)?;
                let rhs = self.eval(rhs, locals)?;
                self.apply_binary(*op, lhs, rhs)
            }
            Expr::TableCtor(fields) => {
                let table = new_table();
                let mut next_index = 1.0;
                for (key, expr) in fields {
                    let value = self.eval(expr, locals)?;
                    let key = match key {
                        FieldKey::Named(name) => Slot::Text(name.as_str().into()),
                        FieldKey::Positional => {
                            let k = Slot::Number(next_index);
                            next_index += 1.0;
                            k
                        }
                    };
                    table_set_pair(&table, key, value);
                }
                Ok(Slot::Table(table))
            }
        }
    }

    fn apply_binary(&self, op: BinOp, lhs: Slot, rhs: Slot) -> Result<Slot, EngineFault> {
        if op == BinOp::Concat {
            let render = |slot: &Slot| -> Option<String> {
                match slot {
                    Slot::Text(s) => Some(s.to_string()),
                    Slot::Number(n) => Some(format!("{n}")),
                    _ => None,
                }
            };
            return match (render(&lhs), render(&rhs)) {
                (Some(a), Some(b)) => Ok(Slot::Text(format!("{a}{b}").into())),
                _ => Err(self.runtime_error(format!(
                    "attempt to concatenate a {} value",
                    if matches!(lhs, Slot::Text(_) | Slot::Number(_)) {
                        rhs.kind().name()
                    } else {
                        lhs.kind().name()
                    }
                ))),
            };
        }
        let (a, b) = match (&lhs, &rhs) {
            (Slot::Number(a), Slot::Number(b)) => (*a, *b),
            _ => {
                let offender = if matches!(lhs, Slot::Number(_)) { rhs } else { lhs };
                return Err(self.runtime_error(format!(
                    "attempt to perform arithmetic on a {} value",
                    offender.kind().name()
                )));
            }
        };
        let result = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::Concat => unreachable!(),
        };
        Ok(Slot::Number(result))
    }
}

impl Engine for ReferenceEngine {
    fn load(&mut self, source: &str, chunk_name: &str, mode: ChunkMode) -> Result<(), EngineFault> {
        if mode == ChunkMode::Binary {
            return Err(EngineFault::Compile(format!(
                "{chunk_name}: attempt to load a text chunk in binary-only mode"
            )));
        }
        let body = syntax::parse(source, chunk_name)?;
        self.stack.push(Slot::Script(Rc::new(ScriptFn {
            name: chunk_name.to_string(),
            params: Vec::new(),
            body,
        })));
        Ok(())
    }

    fn call(&mut self, nargs: usize) -> Result<usize, EngineFault> {
        let len = self.stack.len();
        if len < self.base + nargs + 1 {
            return Err(EngineFault::Runtime(
                "not enough stack slots for call".to_string(),
            ));
        }
        let callee_pos = len - nargs - 1;
        let callee = self.stack[callee_pos].clone();
        match callee {
            Slot::Native(native) => {
                let saved_base = self.base;
                self.base = callee_pos + 1;
                let outcome = native.invoke(self);
                self.base = saved_base;
                match outcome {
                    Ok(nres) => {
                        if self.stack.len() < callee_pos + 1 + nres {
                            self.stack.truncate(callee_pos);
                            return Err(EngineFault::Runtime(
                                "native function reported more results than it pushed".to_string(),
                            ));
                        }
                        let results = self.stack.split_off(self.stack.len() - nres);
                        self.stack.truncate(callee_pos);
                        self.stack.extend(results);
                        Ok(nres)
                    }
                    Err(msg) => {
                        self.stack.truncate(callee_pos);
                        Err(EngineFault::Runtime(msg))
                    }
                }
            }
            Slot::Script(func) => {
                let args = self.stack.split_off(callee_pos + 1);
                self.stack.pop();
                let mut locals = Locals::new();
                for (i, param) in func.params.iter().enumerate() {
                    locals.insert(param.clone(), args.get(i).cloned().unwrap_or(Slot::Nil));
                }
                match self.exec_block(&func.body, &mut locals) {
                    Ok(returned) => {
                        let results = returned.unwrap_or_default();
                        let n = results.len();
                        self.stack.extend(results);
                        Ok(n)
                    }
                    Err(fault) => {
                        self.stack.truncate(callee_pos);
                        Err(fault)
                    }
                }
            }
            other => {
                self.stack.truncate(callee_pos);
                Err(EngineFault::Runtime(format!(
                    "attempt to call a {} value",
                    other.kind().name()
                )))
            }
        }
    }

    fn stack_top(&self) -> usize {
        self.stack.len() - self.base
    }

    fn set_stack_top(&mut self, top: usize) {
        self.stack.resize(self.base + top, Slot::Nil);
    }

    fn grow_stack(&mut self, extra: usize) -> bool {
        if self.stack.len() + extra > MAX_STACK {
            return false;
        }
        self.stack.reserve(extra);
        true
    }

    fn pop(&mut self, n: usize) {
        let floor = self.base;
        let target = self.stack.len().saturating_sub(n).max(floor);
        self.stack.truncate(target);
    }

    fn push_copy(&mut self, index: isize) {
        let copy = self.slot(index);
        self.stack.push(copy);
    }

    fn absolute(&self, index: isize) -> usize {
        if index > 0 {
            index as usize
        } else {
            let top = (self.stack.len() - self.base) as isize;
            (top + index + 1).max(0) as usize
        }
    }

    fn slot_kind(&self, index: isize) -> Kind {
        self.slot(index).kind()
    }

    fn push_nil(&mut self) {
        self.stack.push(Slot::Nil);
    }

    fn push_number(&mut self, n: f64) {
        self.stack.push(Slot::Number(n));
    }

    fn push_text(&mut self, s: &str) {
        self.stack.push(Slot::Text(s.into()));
    }

    fn push_boolean(&mut self, b: bool) {
        self.stack.push(Slot::Boolean(b));
    }

    fn push_function(&mut self, f: NativeRef) {
        self.stack.push(Slot::Native(f));
    }

    fn push_table(&mut self) {
        self.stack.push(Slot::Table(new_table()));
    }

    fn read_number(&self, index: isize) -> Option<f64> {
        match self.slot(index) {
            Slot::Number(n) => Some(n),
            _ => None,
        }
    }

    fn read_text(&self, index: isize) -> Option<String> {
        match self.slot(index) {
            Slot::Text(s) => Some(s.to_string()),
            _ => None,
        }
    }

    fn read_boolean(&self, index: isize) -> Option<bool> {
        match self.slot(index) {
            Slot::Boolean(b) => Some(b),
            _ => None,
        }
    }

    fn read_function(&self, index: isize) -> Option<NativeRef> {
        match self.slot(index) {
            Slot::Native(f) => Some(f),
            _ => None,
        }
    }

    fn table_set(&mut self, index: isize) {
        let table = self.slot(index);
        let value = self.stack.pop().unwrap_or(Slot::Nil);
        let key = self.stack.pop().unwrap_or(Slot::Nil);
        if let Slot::Table(t) = table {
            table_set_pair(&t, key, value);
        }
    }

    fn table_get(&mut self, index: isize) {
        let table = self.slot(index);
        let key = self.stack.pop().unwrap_or(Slot::Nil);
        let value = match table {
            Slot::Table(t) => table_get_pair(&t, &key),
            _ => Slot::Nil,
        };
        self.stack.push(value);
    }

    fn table_next(&mut self, index: isize) -> bool {
        let table = self.slot(index);
        let key = self.stack.pop().unwrap_or(Slot::Nil);
        let Slot::Table(t) = table else {
            return false;
        };
        let pairs = t.borrow();
        let next_pos = if matches!(key, Slot::Nil) {
            0
        } else {
            match pairs.iter().position(|(k, _)| k.raw_eq(&key)) {
                Some(pos) => pos + 1,
                None => return false,
            }
        };
        match pairs.get(next_pos) {
            Some((k, v)) => {
                let (k, v) = (k.clone(), v.clone());
                drop(pairs);
                self.stack.push(k);
                self.stack.push(v);
                true
            }
            None => false,
        }
    }

    fn get_global(&mut self, name: &str) {
        let value = self.global_slot(name);
        self.stack.push(value);
    }

    fn set_global(&mut self, name: &str) {
        let value = self.stack.pop().unwrap_or(Slot::Nil);
        self.set_global_slot(name, value);
    }

    fn mount_library(&mut self, lib: Lib, alias: &str) -> Result<(), EngineFault> {
        if lib == Lib::All {
            for entry in Lib::CATALOG {
                self.mount_library(entry, entry.name())?;
            }
            return Ok(());
        }
        let table = libs::build(self, lib);
        self.set_global_slot(alias, Slot::Table(table));
        Ok(())
    }
}

// ============================================================================
// Library catalog
// ============================================================================

mod libs {
    use super::*;
    use crate::engine::CallContext;
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Build the table for one catalog entry. `Base` additionally installs
    /// its functions as plain globals and binds the self-referential `_G`.
    pub(super) fn build(engine: &mut ReferenceEngine, lib: Lib) -> TableRef {
        match lib {
            Lib::Base => {
                for (name, entry) in [
                    ("print", lib_print as crate::engine::NativeEntry),
                    ("type", lib_type),
                    ("tostring", lib_tostring),
                ] {
                    engine.set_global_slot(name, Slot::Native(NativeRef::new(entry)));
                }
                // The base table is the globals table itself; `_G` is the
                // canonical self-reference that global dumps must prune.
                engine.set_global_slot("_G", Slot::Table(engine.globals.clone()));
                engine.globals.clone()
            }
            Lib::Math => table_of(&[
                ("pi", Slot::Number(std::f64::consts::PI)),
                ("floor", native(lib_math_floor)),
                ("abs", native(lib_math_abs)),
                ("sqrt", native(lib_math_sqrt)),
            ]),
            Lib::String => table_of(&[
                ("len", native(lib_string_len)),
                ("upper", native(lib_string_upper)),
            ]),
            Lib::Os => table_of(&[("time", native(lib_os_time))]),
            Lib::Io => table_of(&[
                ("write", native(lib_io_write)),
                // Stream handles are opaque userdata, deliberately outside
                // what the bridge can represent.
                ("stdout", Slot::UserData(1)),
                ("stderr", Slot::UserData(2)),
            ]),
            Lib::Bit32 => table_of(&[
                ("band", native(lib_bit32_band)),
                ("bor", native(lib_bit32_bor)),
            ]),
            Lib::Package => {
                let t = new_table();
                table_set_pair(
                    &t,
                    Slot::Text("loaded".into()),
                    Slot::Table(new_table()),
                );
                t
            }
            // Mounted for catalog completeness; no operations yet.
            Lib::Coroutine | Lib::Table | Lib::Debug => new_table(),
            Lib::All => unreachable!("expanded by mount_library"),
        }
    }

    fn native(entry: crate::engine::NativeEntry) -> Slot {
        Slot::Native(NativeRef::new(entry))
    }

    fn table_of(entries: &[(&str, Slot)]) -> TableRef {
        let t = new_table();
        for (name, value) in entries {
            table_set_pair(&t, Slot::Text((*name).into()), value.clone());
        }
        t
    }

    /// Script-facing rendering of the slot at `index`, via the narrow
    /// interface only.
    fn render_arg(ctx: &mut CallContext<'_>, index: isize) -> String {
        match ctx.engine.slot_kind(index) {
            Kind::Nil => "nil".to_string(),
            Kind::Number => ctx
                .engine
                .read_number(index)
                .map(|n| format!("{n}"))
                .unwrap_or_default(),
            Kind::Text => ctx.engine.read_text(index).unwrap_or_default(),
            Kind::Boolean => match ctx.engine.read_boolean(index) {
                Some(true) => "true".to_string(),
                _ => "false".to_string(),
            },
            Kind::Table => "table".to_string(),
            Kind::Function => "function".to_string(),
            other => other.name().to_string(),
        }
    }

    fn lib_print(ctx: &mut CallContext<'_>) -> Result<usize, String> {
        let argc = ctx.engine.stack_top();
        let mut parts = Vec::with_capacity(argc);
        for i in 1..=argc {
            parts.push(render_arg(ctx, i as isize));
        }
        println!("{}", parts.join("\t"));
        Ok(0)
    }

    fn lib_io_write(ctx: &mut CallContext<'_>) -> Result<usize, String> {
        let argc = ctx.engine.stack_top();
        for i in 1..=argc {
            print!("{}", render_arg(ctx, i as isize));
        }
        Ok(0)
    }

    fn lib_type(ctx: &mut CallContext<'_>) -> Result<usize, String> {
        if ctx.engine.stack_top() < 1 {
            return Err("bad argument #1 to 'type' (value expected)".to_string());
        }
        let name = ctx.engine.slot_kind(1).name();
        ctx.engine.push_text(name);
        Ok(1)
    }

    fn lib_tostring(ctx: &mut CallContext<'_>) -> Result<usize, String> {
        if ctx.engine.stack_top() < 1 {
            return Err("bad argument #1 to 'tostring' (value expected)".to_string());
        }
        let rendered = render_arg(ctx, 1);
        ctx.engine.push_text(&rendered);
        Ok(1)
    }

    fn arg_number(ctx: &mut CallContext<'_>, index: isize, what: &str) -> Result<f64, String> {
        ctx.engine
            .read_number(index)
            .ok_or_else(|| format!("bad argument #{index} to '{what}' (number expected)"))
    }

    fn lib_math_floor(ctx: &mut CallContext<'_>) -> Result<usize, String> {
        let n = arg_number(ctx, 1, "floor")?;
        ctx.engine.push_number(n.floor());
        Ok(1)
    }

    fn lib_math_abs(ctx: &mut CallContext<'_>) -> Result<usize, String> {
        let n = arg_number(ctx, 1, "abs")?;
        ctx.engine.push_number(n.abs());
        Ok(1)
    }

    fn lib_math_sqrt(ctx: &mut CallContext<'_>) -> Result<usize, String> {
        let n = arg_number(ctx, 1, "sqrt")?;
        ctx.engine.push_number(n.sqrt());
        Ok(1)
    }

    fn lib_string_len(ctx: &mut CallContext<'_>) -> Result<usize, String> {
        let s = ctx
            .engine
            .read_text(1)
            .ok_or_else(|| "bad argument #1 to 'len' (string expected)".to_string())?;
        ctx.engine.push_number(s.len() as f64);
        Ok(1)
    }

    fn lib_string_upper(ctx: &mut CallContext<'_>) -> Result<usize, String> {
        let s = ctx
            .engine
            .read_text(1)
            .ok_or_else(|| "bad argument #1 to 'upper' (string expected)".to_string())?;
        ctx.engine.push_text(&s.to_uppercase());
        Ok(1)
    }

    fn lib_os_time(ctx: &mut CallContext<'_>) -> Result<usize, String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| format!("os.time: {e}"))?;
        ctx.engine.push_number(now.as_secs_f64().floor());
        Ok(1)
    }

    fn arg_u32(ctx: &mut CallContext<'_>, index: isize, what: &str) -> Result<u32, String> {
        let n = arg_number(ctx, index, what)?;
        if n != n.trunc() || !(0.0..=u32::MAX as f64).contains(&n) {
            return Err(format!(
                "bad argument #{index} to '{what}' (integer in range expected)"
            ));
        }
        Ok(n as u32)
    }

    fn lib_bit32_band(ctx: &mut CallContext<'_>) -> Result<usize, String> {
        let a = arg_u32(ctx, 1, "band")?;
        let b = arg_u32(ctx, 2, "band")?;
        ctx.engine.push_number((a & b) as f64);
        Ok(1)
    }

    fn lib_bit32_bor(ctx: &mut CallContext<'_>) -> Result<usize, String> {
        let a = arg_u32(ctx, 1, "bor")?;
        let b = arg_u32(ctx, 2, "bor")?;
        ctx.engine.push_number((a | b) as f64);
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(source: &str) -> ReferenceEngine {
        let mut engine = ReferenceEngine::new();
        engine.load(source, "test", ChunkMode::Text).unwrap();
        engine
    }

    #[test]
    fn runs_return_expression() {
        let mut engine = loaded("return 1+1");
        let nres = engine.call(0).unwrap();
        assert_eq!(nres, 1);
        assert_eq!(engine.read_number(-1), Some(2.0));
    }

    #[test]
    fn multiple_return_values_in_order() {
        let mut engine = loaded("return 1, 'two', true");
        let nres = engine.call(0).unwrap();
        assert_eq!(nres, 3);
        assert_eq!(engine.read_number(1), Some(1.0));
        assert_eq!(engine.read_text(2), Some("two".to_string()));
        assert_eq!(engine.read_boolean(3), Some(true));
    }

    #[test]
    fn globals_survive_across_chunks() {
        let mut engine = loaded("x = 10");
        engine.call(0).unwrap();
        engine.load("return x * 2", "test2", ChunkMode::Text).unwrap();
        engine.call(0).unwrap();
        assert_eq!(engine.read_number(-1), Some(20.0));
    }

    #[test]
    fn script_function_definition_and_call() {
        let mut engine = loaded("function add(a, b) return a + b end");
        engine.call(0).unwrap();
        engine.get_global("add");
        engine.push_number(2.0);
        engine.push_number(40.0);
        let nres = engine.call(2).unwrap();
        assert_eq!(nres, 1);
        assert_eq!(engine.read_number(-1), Some(42.0));
    }

    #[test]
    fn calling_a_non_function_is_a_runtime_fault() {
        let mut engine = loaded("x = 5\nx()");
        let fault = engine.call(0).unwrap_err();
        assert!(fault.to_string().contains("attempt to call a number value"));
        // The failed call left the frame balanced.
        assert_eq!(engine.stack_top(), 0);
    }

    #[test]
    fn arithmetic_on_text_is_a_runtime_fault() {
        let mut engine = loaded("return 1 + 'x'");
        let fault = engine.call(0).unwrap_err();
        assert!(fault.to_string().contains("arithmetic on a text value"));
    }

    #[test]
    fn table_constructor_and_field_access() {
        let mut engine = loaded("t = { a = 1, nested = { b = 2 } }\nreturn t.nested.b");
        engine.call(0).unwrap();
        assert_eq!(engine.read_number(-1), Some(2.0));
    }

    #[test]
    fn table_protocol_set_get_next() {
        let mut engine = ReferenceEngine::new();
        engine.push_table();
        engine.push_text("k");
        engine.push_number(9.0);
        engine.table_set(1);
        engine.push_text("k");
        engine.table_get(1);
        assert_eq!(engine.read_number(-1), Some(9.0));
        engine.pop(1);

        engine.push_nil();
        assert!(engine.table_next(1));
        assert_eq!(engine.read_text(-2), Some("k".to_string()));
        assert_eq!(engine.read_number(-1), Some(9.0));
        engine.pop(1);
        assert!(!engine.table_next(1));
    }

    #[test]
    fn setting_nil_removes_a_pair() {
        let mut engine = ReferenceEngine::new();
        engine.push_table();
        engine.push_text("k");
        engine.push_number(1.0);
        engine.table_set(1);
        engine.push_text("k");
        engine.push_nil();
        engine.table_set(1);
        engine.push_nil();
        assert!(!engine.table_next(1));
    }

    #[test]
    fn base_library_self_reference() {
        let mut engine = ReferenceEngine::new();
        engine.mount_library(Lib::Base, "base").unwrap();
        engine.get_global("_G");
        assert_eq!(engine.slot_kind(-1), Kind::Table);
        engine.get_global("base");
        assert_eq!(engine.slot_kind(-1), Kind::Table);
        engine.get_global("print");
        assert_eq!(engine.slot_kind(-1), Kind::Function);
    }

    #[test]
    fn math_library_via_script() {
        let mut engine = ReferenceEngine::new();
        engine.mount_library(Lib::Math, "math").unwrap();
        engine
            .load("return math.floor(2.7) + math.abs(-1)", "t", ChunkMode::Text)
            .unwrap();
        engine.call(0).unwrap();
        assert_eq!(engine.read_number(-1), Some(3.0));
    }

    #[test]
    fn io_streams_are_userdata() {
        let mut engine = ReferenceEngine::new();
        engine.mount_library(Lib::Io, "io").unwrap();
        engine.get_global("io");
        engine.push_text("stdout");
        engine.table_get(-2);
        assert_eq!(engine.slot_kind(-1), Kind::UserData);
    }

    #[test]
    fn binary_mode_rejects_text_source() {
        let mut engine = ReferenceEngine::new();
        let fault = engine.load("x = 1", "chunk", ChunkMode::Binary).unwrap_err();
        assert!(matches!(fault, EngineFault::Compile(_)));
    }

    #[test]
    fn grow_stack_refuses_past_cap() {
        let mut engine = ReferenceEngine::new();
        assert!(engine.grow_stack(16));
        assert!(!engine.grow_stack(MAX_STACK + 1));
    }

    #[test]
    fn negative_indices_address_from_the_top() {
        let mut engine = ReferenceEngine::new();
        engine.push_number(1.0);
        engine.push_number(2.0);
        assert_eq!(engine.absolute(-1), 2);
        assert_eq!(engine.absolute(-2), 1);
        assert_eq!(engine.read_number(-2), Some(1.0));
    }
}
