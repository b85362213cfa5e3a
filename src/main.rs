//! Demo driver: mounts the standard libraries, exposes a small host
//! library, runs a script, and dumps the resulting global namespace.
//!
//! Usage: `skiff [script]` (defaults to `scripts/demo.skf`).

use std::process::ExitCode;

use skiff::{Error, Lib, Session, Table, Value, ValueSet};
use tracing_subscriber::EnvFilter;

fn run(path: &str) -> Result<(), Error> {
    let mut session = Session::new();
    session.load_lib(Lib::All)?;

    let mut my_lib = Table::new();
    my_lib.insert(Value::text("version"), Value::number(1.0));
    session.set_variable("myLib", &Value::table(my_lib))?;
    session.register_function("myLib.double", |n: f64| n * 2.0)?;
    session.register_function("myLib.greet", |name: String| format!("hello, {name}"))?;

    session.load_file(path)?;
    for value in session.run()? {
        println!("{value}");
    }

    // Prune the self-referential globals out of the dump.
    let mut ignore = ValueSet::new();
    for name in ["_G", "base", "package"] {
        ignore.insert(Value::text(name));
    }
    let globals = session.get_variable_filtered("_G", &ignore)?;
    println!("globals:\n{globals}");
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "scripts/demo.skf".to_string());

    match run(&path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ Error::CompileError(_)) => {
            eprintln!("failed to load {path}: {err}");
            ExitCode::FAILURE
        }
        Err(err @ (Error::ScriptError(_) | Error::TableTooDeep)) => {
            eprintln!("script failed: {err}");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
