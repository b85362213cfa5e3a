//! A typed value bridge to an embedded scripting runtime.
//!
//! skiff moves values between Rust and a stack-based scripting engine: it
//! marshals a closed tagged union of host values onto and off the engine's
//! operand stack, adapts plain Rust functions into script-callable natives,
//! and wraps the whole engine in a session with load/run/call/variable
//! operations. A compact reference engine is built in, so the crate is
//! usable out of the box.
//!
//! # Modules
//!
//! - [`value`] -- The host-side [`Value`] union, its [`Kind`] ranks, and the
//!   ordered [`Table`] representation.
//! - [`marshal`] -- Stack push/pull with a depth budget and ignore-set for
//!   nested tables.
//! - [`adapter`] -- Turns `Fn` items and closures into script-callable
//!   natives with checked arity and argument types.
//! - [`session`] -- The owning [`Session`] handle: chunks, execution,
//!   variables, libraries.
//! - [`engine`] -- The narrow [`Engine`] trait the bridge is written
//!   against, plus the built-in reference implementation.
//!
//! # Example
//!
//! Register a host function, run a chunk that calls it, and read the result:
//!
//! ```
//! use skiff::{Lib, Session, Value};
//!
//! # fn main() -> Result<(), skiff::Error> {
//! let mut session = Session::new();
//! session.load_lib(Lib::Math)?;
//! session.register_function("double", |n: f64| n * 2.0)?;
//!
//! session.load_string("return double(math.pi)")?;
//! let results = session.run()?;
//! assert_eq!(results, vec![Value::number(std::f64::consts::PI * 2.0)]);
//!
//! session.set_variable("config.scale", &Value::number(3.0))?;
//! assert_eq!(session.get_variable("config.scale")?, Value::number(3.0));
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod engine;
pub mod error;
pub mod marshal;
pub mod session;
pub mod value;

pub use adapter::NativeFunction;
pub use engine::{CallContext, ChunkMode, Engine, EngineFault, Lib, NativeEntry, NativeRef};
pub use error::{Error, Result};
pub use marshal::{pull_value, push_value, MAX_TABLE_DEPTH};
pub use session::Session;
pub use value::{Kind, Table, Value, ValueSet};
