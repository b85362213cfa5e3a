//! The owning handle around one engine instance.
//!
//! A [`Session`] pairs an [`Engine`] with the bridge's marshaling layer and
//! exposes the operations a host program actually performs: load a chunk,
//! run it, call a named function, read and write global variables, register
//! host functions, mount standard libraries. Every operation restores the
//! engine stack to where it found it, whether it succeeds or fails, so no
//! sequence of host calls can leak slots.
//!
//! Dotted paths are understood by the variable operations: `"a.b.c"` means
//! field `c` of table `b` inside global `a`. Writing through a dotted path
//! creates missing intermediate tables (replacing non-table intermediates);
//! reading through a missing or non-table intermediate yields nil rather
//! than an error. [`Session::call`] deliberately takes a plain global name,
//! not a path; fetch nested functions with [`Session::get_variable`] first
//! if needed.
//!
//! [`Session::destroy`] releases the engine early; it is idempotent, and
//! every later operation fails with [`Error::UninitializedResource`] naming
//! the operation that was attempted.

use std::path::Path;

use crate::adapter::NativeFunction;
use crate::engine::reference::ReferenceEngine;
use crate::engine::{ChunkMode, Engine, Lib};
use crate::error::{Error, Result};
use crate::marshal::{pull_value, push_value, MAX_TABLE_DEPTH};
use crate::value::{Kind, Value, ValueSet};

/// An owned scripting engine plus the typed operations to drive it.
pub struct Session {
    engine: Option<Box<dyn Engine>>,
}

impl Session {
    /// Create a session backed by the built-in reference engine.
    pub fn new() -> Session {
        Session::from_engine(Box::new(ReferenceEngine::new()))
    }

    /// Create a session around an existing engine.
    pub fn from_engine(engine: Box<dyn Engine>) -> Session {
        Session {
            engine: Some(engine),
        }
    }

    /// Release the engine. Idempotent; the session stays usable only for
    /// another `destroy`.
    pub fn destroy(&mut self) {
        if self.engine.take().is_some() {
            tracing::debug!("session destroyed");
        }
    }

    fn engine_mut(&mut self, op: &'static str) -> Result<&mut dyn Engine> {
        match self.engine.as_deref_mut() {
            Some(engine) => Ok(engine),
            None => Err(Error::UninitializedResource(op)),
        }
    }

    // ------------------------------------------------------------------
    // Chunk loading
    // ------------------------------------------------------------------

    /// Load a script file as a pending chunk, accepting either encoding.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.load_file_with_mode(path, "bt")
    }

    /// Load a script file under an explicit mode token (`"b"`, `"t"`,
    /// `"bt"` or `"tb"`).
    pub fn load_file_with_mode(&mut self, path: impl AsRef<Path>, mode: &str) -> Result<()> {
        let path = path.as_ref();
        let engine = self.engine_mut("load_file")?;
        let mode = parse_mode(mode)?;
        let source = std::fs::read_to_string(path)
            .map_err(|err| Error::CompileError(format!("cannot open {}: {err}", path.display())))?;
        let name = path.display().to_string();
        load_chunk(engine, &source, &name, mode)
    }

    /// Load script source as a pending chunk; strings are text-only.
    pub fn load_string(&mut self, source: &str) -> Result<()> {
        self.load_string_with_mode(source, "t")
    }

    /// Load script source under an explicit mode token.
    pub fn load_string_with_mode(&mut self, source: &str, mode: &str) -> Result<()> {
        let engine = self.engine_mut("load_string")?;
        let mode = parse_mode(mode)?;
        load_chunk(engine, source, "chunk", mode)
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run the most recently loaded chunk and return its results in order.
    pub fn run(&mut self) -> Result<Vec<Value>> {
        let engine = self.engine_mut("run")?;
        tracing::debug!("running pending chunk");
        let floor = engine.stack_top().saturating_sub(1);
        let nres = engine.call(0)?;
        collect_results(engine, nres, floor)
    }

    /// Call the global function `name` with `args`, returning its results
    /// in order. The name is a plain global, never a dotted path.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Vec<Value>> {
        let engine = self.engine_mut("call")?;
        tracing::debug!(name, argc = args.len(), "calling global function");
        let floor = engine.stack_top();
        if !engine.grow_stack(args.len() + 1) {
            return Err(Error::StackOverflow);
        }
        engine.get_global(name);
        let kind = engine.slot_kind(-1);
        if kind != Kind::Function {
            engine.set_stack_top(floor);
            return Err(Error::mismatch("function", kind.name()));
        }
        for arg in args {
            if let Err(err) = push_value(engine, arg) {
                engine.set_stack_top(floor);
                return Err(err);
            }
        }
        // On failure the engine removes callee and arguments itself.
        let nres = engine.call(args.len())?;
        collect_results(engine, nres, floor)
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    /// Bind `value` at `name`, which may be a dotted path. Intermediate
    /// segments that are missing or not tables are replaced by fresh
    /// tables.
    pub fn set_variable(&mut self, name: &str, value: &Value) -> Result<()> {
        let engine = self.engine_mut("set_variable")?;
        let segments = split_path(name)?;
        tracing::debug!(name, kind = value.kind().name(), "setting variable");

        let floor = engine.stack_top();
        if let [single] = segments.as_slice() {
            if let Err(err) = push_value(engine, value) {
                engine.set_stack_top(floor);
                return Err(err);
            }
            engine.set_global(single);
            return Ok(());
        }

        if !engine.grow_stack(segments.len() + 3) {
            return Err(Error::StackOverflow);
        }
        engine.get_global(segments[0]);
        if engine.slot_kind(-1) != Kind::Table {
            engine.pop(1);
            engine.push_table();
            engine.push_copy(-1);
            engine.set_global(segments[0]);
        }
        // Walk the middle segments, leaving each level's table on the
        // stack; the whole chain is discarded at the end.
        for seg in &segments[1..segments.len() - 1] {
            engine.push_text(seg);
            engine.table_get(-2);
            if engine.slot_kind(-1) != Kind::Table {
                engine.pop(1);
                engine.push_table();
                engine.push_text(seg);
                engine.push_copy(-2);
                engine.table_set(-4);
            }
        }
        engine.push_text(segments[segments.len() - 1]);
        if let Err(err) = push_value(engine, value) {
            engine.set_stack_top(floor);
            return Err(err);
        }
        engine.table_set(-3);
        engine.set_stack_top(floor);
        Ok(())
    }

    /// Read the variable at `name` (a plain global or dotted path). A
    /// missing variable, or a path through a missing or non-table
    /// intermediate, reads as nil.
    pub fn get_variable(&mut self, name: &str) -> Result<Value> {
        self.get_variable_filtered(name, &ValueSet::new())
    }

    /// Like [`Session::get_variable`], with an ignore-set applied to the
    /// top level of the final pull: pairs whose key or value is in the set
    /// are omitted. This is how self-referential globals (`_G`, a mounted
    /// `base`) are pruned out of a whole-namespace dump.
    pub fn get_variable_filtered(&mut self, name: &str, ignore: &ValueSet) -> Result<Value> {
        let engine = self.engine_mut("get_variable")?;
        let segments = split_path(name)?;
        let floor = engine.stack_top();
        if !engine.grow_stack(segments.len() + 2) {
            return Err(Error::StackOverflow);
        }
        engine.get_global(segments[0]);
        for seg in &segments[1..] {
            if engine.slot_kind(-1) != Kind::Table {
                engine.set_stack_top(floor);
                return Ok(Value::Nil);
            }
            engine.push_text(seg);
            engine.table_get(-2);
        }
        let result = pull_value(engine, -1, ignore, MAX_TABLE_DEPTH);
        engine.set_stack_top(floor);
        result
    }

    // ------------------------------------------------------------------
    // Host functions and libraries
    // ------------------------------------------------------------------

    /// Register a host function under `name` (a plain global or dotted
    /// path, with the same auto-creation as [`Session::set_variable`]).
    pub fn register_function<Args, F>(&mut self, name: &str, func: F) -> Result<()>
    where
        F: NativeFunction<Args>,
    {
        tracing::debug!(name, "registering native function");
        self.set_variable(name, &Value::Function(func.into_native()))
    }

    /// Mount a standard library under its own name; [`Lib::All`] mounts
    /// the whole catalog.
    pub fn load_lib(&mut self, lib: Lib) -> Result<()> {
        self.load_lib_as(lib, lib.name())
    }

    /// Mount a standard library under `alias`. The alias is ignored for
    /// [`Lib::All`]: each catalog entry lands under its own name.
    pub fn load_lib_as(&mut self, lib: Lib, alias: &str) -> Result<()> {
        let engine = self.engine_mut("load_lib")?;
        tracing::debug!(lib = lib.name(), alias, "mounting library");
        engine.mount_library(lib, alias)?;
        Ok(())
    }
}

impl Default for Session {
    fn default() -> Session {
        Session::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn parse_mode(token: &str) -> Result<ChunkMode> {
    ChunkMode::from_token(token)
        .ok_or_else(|| Error::InvalidArgument(format!("unrecognized load mode {token:?}")))
}

fn load_chunk(engine: &mut dyn Engine, source: &str, name: &str, mode: ChunkMode) -> Result<()> {
    tracing::debug!(chunk = name, "loading chunk");
    if !engine.grow_stack(1) {
        return Err(Error::StackOverflow);
    }
    engine.load(source, name, mode)?;
    Ok(())
}

/// Pull the `nres` call results sitting above `floor`, in order, then
/// restore the stack to `floor`.
fn collect_results(engine: &mut dyn Engine, nres: usize, floor: usize) -> Result<Vec<Value>> {
    let none = ValueSet::new();
    let mut results = Vec::with_capacity(nres);
    for i in 0..nres {
        match pull_value(engine, (floor + i + 1) as isize, &none, MAX_TABLE_DEPTH) {
            Ok(value) => results.push(value),
            Err(err) => {
                engine.set_stack_top(floor);
                return Err(err);
            }
        }
    }
    engine.set_stack_top(floor);
    Ok(results)
}

fn split_path(name: &str) -> Result<Vec<&str>> {
    if name.is_empty() || name.split('.').any(str::is_empty) {
        return Err(Error::InvalidArgument(format!(
            "invalid variable path {name:?}"
        )));
    }
    Ok(name.split('.').collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Table;
    use std::io::Write as _;

    #[test]
    fn load_string_and_run() {
        let mut session = Session::new();
        session.load_string("return 1+1").unwrap();
        let results = session.run().unwrap();
        assert_eq!(results, vec![Value::number(2.0)]);
    }

    #[test]
    fn run_returns_multiple_results_in_order() {
        let mut session = Session::new();
        session.load_string("return 1, 'two', true").unwrap();
        let results = session.run().unwrap();
        assert_eq!(
            results,
            vec![Value::number(1.0), Value::text("two"), Value::boolean(true)]
        );
    }

    #[test]
    fn unrecognized_mode_token_is_rejected_up_front() {
        let mut session = Session::new();
        let err = session.load_string_with_mode("return 1", "q").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        // Nothing was loaded; running still fails cleanly.
        assert!(session.run().is_err());
    }

    #[test]
    fn binary_only_mode_rejects_text_source() {
        let mut session = Session::new();
        let err = session.load_string_with_mode("return 1", "b").unwrap_err();
        assert!(matches!(err, Error::CompileError(_)));
    }

    #[test]
    fn compile_error_reports_chunk_and_line() {
        let mut session = Session::new();
        let err = session.load_string("return ]").unwrap_err();
        match err {
            Error::CompileError(msg) => assert!(msg.starts_with("chunk:1:"), "{msg}"),
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[test]
    fn script_fault_surfaces_as_script_error() {
        let mut session = Session::new();
        session.load_string("return 1 + 'x'").unwrap();
        let err = session.run().unwrap_err();
        assert!(matches!(err, Error::ScriptError(_)));
        // The session stays usable afterwards.
        session.load_string("return 7").unwrap();
        assert_eq!(session.run().unwrap(), vec![Value::number(7.0)]);
    }

    #[test]
    fn load_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "return 40 + 2").unwrap();
        let mut session = Session::new();
        session.load_file(file.path()).unwrap();
        assert_eq!(session.run().unwrap(), vec![Value::number(42.0)]);
    }

    #[test]
    fn missing_file_is_a_compile_error() {
        let mut session = Session::new();
        let err = session.load_file("/no/such/path.skf").unwrap_err();
        assert!(matches!(err, Error::CompileError(_)));
    }

    #[test]
    fn set_and_get_scalar_variable() {
        let mut session = Session::new();
        session.set_variable("x", &Value::number(5.0)).unwrap();
        assert_eq!(session.get_variable("x").unwrap(), Value::number(5.0));
        // The script sees the same binding.
        session.load_string("return x * 2").unwrap();
        assert_eq!(session.run().unwrap(), vec![Value::number(10.0)]);
    }

    #[test]
    fn dotted_set_creates_intermediate_tables() {
        let mut session = Session::new();
        session
            .set_variable("config.net.port", &Value::number(8080.0))
            .unwrap();
        assert_eq!(
            session.get_variable("config.net.port").unwrap(),
            Value::number(8080.0)
        );
        assert!(session.get_variable("config.net").unwrap().is_table());
        session.load_string("return config.net.port").unwrap();
        assert_eq!(session.run().unwrap(), vec![Value::number(8080.0)]);
    }

    #[test]
    fn dotted_set_replaces_non_table_intermediates() {
        let mut session = Session::new();
        session.set_variable("a", &Value::number(1.0)).unwrap();
        session.set_variable("a.b", &Value::number(2.0)).unwrap();
        assert_eq!(session.get_variable("a.b").unwrap(), Value::number(2.0));
    }

    #[test]
    fn failed_set_variable_leaves_the_stack_balanced() {
        let mut session = Session::new();
        session.load_string("return 7").unwrap();

        let mut bad = Table::new();
        bad.insert(Value::text("handle"), Value::UserData);
        let bad = Value::table(bad);
        assert!(matches!(
            session.set_variable("x", &bad),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            session.set_variable("a.b", &bad),
            Err(Error::TypeMismatch { .. })
        ));

        // The pending chunk is still the topmost slot.
        assert_eq!(session.run().unwrap(), vec![Value::number(7.0)]);
        assert_eq!(session.get_variable("x").unwrap(), Value::nil());
    }

    #[test]
    fn missing_variable_reads_as_nil() {
        let mut session = Session::new();
        assert_eq!(session.get_variable("nothing").unwrap(), Value::nil());
        assert_eq!(session.get_variable("a.b.c").unwrap(), Value::nil());
        session.set_variable("n", &Value::number(1.0)).unwrap();
        // Indexing through a non-table reads as nil too.
        assert_eq!(session.get_variable("n.field").unwrap(), Value::nil());
    }

    #[test]
    fn empty_path_segments_are_invalid() {
        let mut session = Session::new();
        for name in ["", ".", "a.", ".a", "a..b"] {
            assert!(matches!(
                session.get_variable(name),
                Err(Error::InvalidArgument(_))
            ));
            assert!(matches!(
                session.set_variable(name, &Value::nil()),
                Err(Error::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn registered_function_is_callable_from_script() {
        let mut session = Session::new();
        session
            .register_function("myLib.double", |n: f64| n * 2.0)
            .unwrap();
        session.load_string("return myLib.double(21)").unwrap();
        assert_eq!(session.run().unwrap(), vec![Value::number(42.0)]);
    }

    #[test]
    fn registered_function_fault_reaches_the_host() {
        let mut session = Session::new();
        session
            .register_function("strictly", |n: f64| n)
            .unwrap();
        session.load_string("return strictly('oops')").unwrap();
        match session.run().unwrap_err() {
            Error::ScriptError(msg) => {
                assert!(msg.contains("native function: type mismatch"), "{msg}")
            }
            other => panic!("expected script error, got {other:?}"),
        }
    }

    #[test]
    fn call_invokes_script_defined_functions() {
        let mut session = Session::new();
        session
            .load_string("function add(a, b) return a + b end")
            .unwrap();
        session.run().unwrap();
        let results = session
            .call("add", &[Value::number(2.0), Value::number(40.0)])
            .unwrap();
        assert_eq!(results, vec![Value::number(42.0)]);
    }

    #[test]
    fn call_takes_plain_globals_not_paths() {
        let mut session = Session::new();
        session
            .register_function("lib.fn", |n: f64| n)
            .unwrap();
        let err = session.call("lib.fn", &[Value::number(1.0)]).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn call_on_a_non_function_global_is_a_type_mismatch() {
        let mut session = Session::new();
        session.set_variable("x", &Value::number(1.0)).unwrap();
        let err = session.call("x", &[]).unwrap_err();
        match err {
            Error::TypeMismatch { expected, actual } => {
                assert_eq!(expected, "function");
                assert_eq!(actual, "number");
            }
            other => panic!("expected type mismatch, got {other:?}"),
        }
        let err = session.call("missing", &[]).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn load_lib_all_mounts_the_catalog() {
        let mut session = Session::new();
        session.load_lib(Lib::All).unwrap();
        let pi = session.get_variable("math.pi").unwrap();
        assert_eq!(pi, Value::number(std::f64::consts::PI));
        session.load_string("return string.upper('abc')").unwrap();
        assert_eq!(session.run().unwrap(), vec![Value::text("ABC")]);
    }

    #[test]
    fn load_lib_as_mounts_under_an_alias() {
        let mut session = Session::new();
        session.load_lib_as(Lib::Math, "m").unwrap();
        assert!(session.get_variable("m.floor").unwrap().is_function());
        assert_eq!(session.get_variable("math").unwrap(), Value::nil());
    }

    #[test]
    fn namespace_dump_with_ignore_set() {
        let mut session = Session::new();
        session.load_lib_as(Lib::Base, "base").unwrap();
        session.set_variable("x", &Value::number(1.0)).unwrap();

        let mut ignore = ValueSet::new();
        ignore.insert(Value::text("_G"));
        ignore.insert(Value::text("base"));
        let globals = session.get_variable_filtered("_G", &ignore).unwrap();
        let globals = globals.get_table().unwrap().clone();
        assert_eq!(globals[&Value::text("x")], Value::number(1.0));
        assert!(!globals.contains_key(&Value::text("_G")));
        assert!(!globals.contains_key(&Value::text("base")));
    }

    #[test]
    fn destroyed_session_reports_uninitialized_resource() {
        let mut session = Session::new();
        session.destroy();
        session.destroy();
        match session.load_string("return 1") {
            Err(Error::UninitializedResource(op)) => assert_eq!(op, "load_string"),
            other => panic!("expected uninitialized resource, got {other:?}"),
        }
        assert!(matches!(
            session.run(),
            Err(Error::UninitializedResource("run"))
        ));
        assert!(matches!(
            session.call("f", &[]),
            Err(Error::UninitializedResource("call"))
        ));
        assert!(matches!(
            session.get_variable("x"),
            Err(Error::UninitializedResource("get_variable"))
        ));
        assert!(matches!(
            session.set_variable("x", &Value::nil()),
            Err(Error::UninitializedResource("set_variable"))
        ));
        assert!(matches!(
            session.load_lib(Lib::Math),
            Err(Error::UninitializedResource("load_lib"))
        ));
    }
}
