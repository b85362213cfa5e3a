//! The narrow interface to the embedded scripting engine.
//!
//! The bridge treats the engine as an opaque execution collaborator: it
//! compiles source into pending chunks, calls values on its operand stack,
//! and exposes typed push/read primitives on stack slots. Everything the
//! rest of the crate needs is captured by the [`Engine`] trait; the bridge
//! modules never assume a particular implementation.
//!
//! A compact reference implementation lives in [`reference`]; it backs the
//! default [`crate::Session`] and the test suite.
//!
//! # Stack addressing
//!
//! Slot indices are 1-based from the current frame base; negative indices
//! count back from the top (`-1` is the topmost slot). During a native call
//! the frame base is moved so the callee sees exactly its own arguments.

pub mod reference;

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::value::Kind;

/// Faults reported by the engine itself.
#[derive(Debug, thiserror::Error)]
pub enum EngineFault {
    /// Source failed to parse or compile; carries the rendered error.
    #[error("{0}")]
    Compile(String),

    /// A fault raised while executing script code.
    #[error("{0}")]
    Runtime(String),
}

/// How a chunk's source may be encoded, parsed from the load-mode tokens
/// `"b"`, `"t"`, `"bt"` and `"tb"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    /// Precompiled binary chunks only.
    Binary,
    /// Textual source only.
    Text,
    /// Either encoding.
    Either,
}

impl ChunkMode {
    /// Parse one of the four recognized mode tokens; any other token is
    /// rejected by the caller before the engine is involved.
    pub fn from_token(token: &str) -> Option<ChunkMode> {
        match token {
            "b" => Some(ChunkMode::Binary),
            "t" => Some(ChunkMode::Text),
            "bt" | "tb" => Some(ChunkMode::Either),
            _ => None,
        }
    }
}

/// The fixed catalog of standard library modules an engine can mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lib {
    Base,
    Coroutine,
    Table,
    Io,
    Os,
    String,
    Bit32,
    Math,
    Debug,
    Package,
    /// Sentinel: mount every catalog entry under its own name.
    All,
}

impl Lib {
    /// Every concrete catalog entry, in mount order.
    pub const CATALOG: [Lib; 10] = [
        Lib::Base,
        Lib::Coroutine,
        Lib::Table,
        Lib::Io,
        Lib::Os,
        Lib::String,
        Lib::Bit32,
        Lib::Math,
        Lib::Debug,
        Lib::Package,
    ];

    /// The library's own variable name, used when no alias is given.
    pub fn name(self) -> &'static str {
        match self {
            Lib::Base => "base",
            Lib::Coroutine => "coroutine",
            Lib::Table => "table",
            Lib::Io => "io",
            Lib::Os => "os",
            Lib::String => "string",
            Lib::Bit32 => "bit32",
            Lib::Math => "math",
            Lib::Debug => "debug",
            Lib::Package => "package",
            Lib::All => "all",
        }
    }
}

/// The native-call ABI: opaque context in, result count out. A returned
/// error is converted by the engine into a script-level fault; it never
/// crosses the boundary as a host-level failure.
pub type NativeEntry = fn(&mut CallContext<'_>) -> Result<usize, String>;

/// Context handed to a native function while the engine is calling it.
///
/// The engine moves the frame base before the call, so stack indices inside
/// the native address its arguments: slot 1 is the first argument and
/// [`Engine::stack_top`] is the argument count.
pub struct CallContext<'a> {
    /// The calling engine, for argument pulls and result pushes.
    pub engine: &'a mut (dyn Engine + 'a),
    upvalue: Rc<dyn Any>,
}

impl<'a> CallContext<'a> {
    pub fn new(engine: &'a mut (dyn Engine + 'a), upvalue: Rc<dyn Any>) -> CallContext<'a> {
        CallContext { engine, upvalue }
    }

    /// The closure's single piece of captured state. For functions
    /// registered through [`crate::Session::register_function`] this is the
    /// erased host function, recovered by the adapter trampoline.
    pub fn upvalue(&self) -> &Rc<dyn Any> {
        &self.upvalue
    }
}

/// A native closure as the engine stores it: the trampoline entry point
/// plus one erased upvalue.
pub struct NativeClosure {
    entry: NativeEntry,
    upvalue: Rc<dyn Any>,
}

/// Opaque, cheaply clonable handle to a native closure.
///
/// Equality and ordering are by closure identity (allocation address), the
/// host-side analogue of function-pointer comparison: two registrations of
/// the same Rust function are distinct handles.
#[derive(Clone)]
pub struct NativeRef(Rc<NativeClosure>);

impl NativeRef {
    /// Wrap a bare entry point with no captured state.
    pub fn new(entry: NativeEntry) -> NativeRef {
        NativeRef::with_upvalue(entry, Rc::new(()))
    }

    /// Wrap an entry point together with its single upvalue.
    pub fn with_upvalue(entry: NativeEntry, upvalue: Rc<dyn Any>) -> NativeRef {
        NativeRef(Rc::new(NativeClosure { entry, upvalue }))
    }

    /// Invoke the closure against `engine`. Used by engine implementations
    /// when script code calls a native value.
    pub fn invoke(&self, engine: &mut dyn Engine) -> Result<usize, String> {
        let mut ctx = CallContext::new(engine, self.0.upvalue.clone());
        (self.0.entry)(&mut ctx)
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for NativeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeRef({:#x})", self.addr())
    }
}

impl PartialEq for NativeRef {
    fn eq(&self, other: &NativeRef) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for NativeRef {}

impl PartialOrd for NativeRef {
    fn partial_cmp(&self, other: &NativeRef) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NativeRef {
    fn cmp(&self, other: &NativeRef) -> Ordering {
        self.addr().cmp(&other.addr())
    }
}

/// The execution engine as the bridge consumes it.
///
/// All operations run to completion on the caller's thread. Implementations
/// are single-threaded and provide no internal locking.
pub trait Engine {
    /// Compile `source` into a pending chunk and push it onto the stack.
    fn load(&mut self, source: &str, chunk_name: &str, mode: ChunkMode) -> Result<(), EngineFault>;

    /// Call the value below the top `nargs` slots with those slots as
    /// arguments. Callee and arguments are consumed; the results are left
    /// on the stack and their count returned. On failure the consumed slots
    /// are removed and nothing is pushed.
    fn call(&mut self, nargs: usize) -> Result<usize, EngineFault>;

    /// Number of slots in the current frame.
    fn stack_top(&self) -> usize;

    /// Truncate (or nil-extend) the current frame to exactly `top` slots.
    fn set_stack_top(&mut self, top: usize);

    /// Ensure capacity for `extra` additional slots. Returns false when the
    /// stack cannot grow; callers treat that as a stack-overflow condition.
    fn grow_stack(&mut self, extra: usize) -> bool;

    /// Pop `n` slots.
    fn pop(&mut self, n: usize);

    /// Push a copy of the slot at `index`.
    fn push_copy(&mut self, index: isize);

    /// Resolve a possibly negative index to an absolute 1-based one.
    fn absolute(&self, index: isize) -> usize;

    /// The kind of value in the slot at `index`. Out-of-range indices
    /// report [`Kind::Nil`].
    fn slot_kind(&self, index: isize) -> Kind;

    fn push_nil(&mut self);
    fn push_number(&mut self, n: f64);
    fn push_text(&mut self, s: &str);
    fn push_boolean(&mut self, b: bool);
    fn push_function(&mut self, f: NativeRef);

    /// Push a fresh empty table.
    fn push_table(&mut self);

    fn read_number(&self, index: isize) -> Option<f64>;
    fn read_text(&self, index: isize) -> Option<String>;
    fn read_boolean(&self, index: isize) -> Option<bool>;
    fn read_function(&self, index: isize) -> Option<NativeRef>;

    /// Pop a value and a key (value topmost) and set `table[key] = value`
    /// on the table at `index`. A nil value removes the key. Does nothing
    /// but pop if the slot is not a table.
    fn table_set(&mut self, index: isize);

    /// Pop a key and push `table[key]` from the table at `index`; pushes
    /// nil when the slot is not a table or the key is absent.
    fn table_get(&mut self, index: isize);

    /// One step of the table iteration protocol: pops a key (nil to start)
    /// and, if the table at `index` has a next pair, pushes that pair's key
    /// and value and returns true; otherwise pushes nothing and returns
    /// false.
    fn table_next(&mut self, index: isize) -> bool;

    /// Push the global named `name` (nil if absent).
    fn get_global(&mut self, name: &str);

    /// Pop a value and bind it to the global named `name`.
    fn set_global(&mut self, name: &str);

    /// Mount one catalog entry under `alias`.
    fn mount_library(&mut self, lib: Lib, alias: &str) -> Result<(), EngineFault>;
}
