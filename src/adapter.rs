//! Generic adapter binding host functions to the engine's native-call ABI.
//!
//! [`NativeFunction`] is implemented for any `Fn` of arity 0..=8 whose
//! arguments implement [`FromSlot`] and whose return type implements
//! [`IntoResults`]. `into_native` erases the concrete function into a
//! [`NativeRef`]: a per-signature trampoline paired with the function
//! itself, stored as the closure's single upvalue. The trampoline recovers
//! the strongly-typed function by downcast at call time; the engine never
//! sees more than an opaque handle.
//!
//! Inside the trampoline, slot 1 is the first argument and the frame's
//! stack top is the argument count. The argument count must equal the
//! declared arity exactly; each argument is then pulled as its declared
//! type, in order. Any failure (argument mismatch, result marshaling, or
//! a panic in the host function) is converted into a script-level fault
//! string here, at the boundary, and never unwinds into the engine.

use crate::engine::{CallContext, NativeRef};
use crate::error::Error;
use crate::marshal::{FromSlot, IntoResults};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

/// Fault string reported when argument or result conversion fails.
const FAULT_TYPE_MISMATCH: &str = "native function: type mismatch";
/// Fault string reported for any other failure inside the adapter.
const FAULT_UNKNOWN: &str = "native function: unknown error";

/// A host function that can be registered for scripts to call.
pub trait NativeFunction<Args> {
    /// Erase the function into an engine-callable native closure.
    fn into_native(self) -> NativeRef;
}

fn fault(err: Error) -> String {
    match err {
        Error::TypeMismatch { .. } => FAULT_TYPE_MISMATCH.to_string(),
        _ => FAULT_UNKNOWN.to_string(),
    }
}

macro_rules! impl_native_function {
    ($trampoline:ident, $arity:expr $(, $arg:ident => $idx:expr)*) => {
        // Argument bindings reuse the type parameter names.
        #[allow(non_snake_case)]
        fn $trampoline<F, R $(, $arg)*>(
            ctx: &mut CallContext<'_>,
        ) -> std::result::Result<usize, String>
        where
            F: Fn($($arg),*) -> R + 'static,
            R: IntoResults + 'static,
            $($arg: FromSlot + 'static,)*
        {
            // The upvalue is the erased host function placed there at
            // registration; only this instantiation knows its real type.
            let upvalue = ctx.upvalue().clone();
            let func = upvalue
                .downcast_ref::<F>()
                .ok_or_else(|| FAULT_UNKNOWN.to_string())?;

            let engine = &mut *ctx.engine;
            if engine.stack_top() != $arity {
                return Err(FAULT_TYPE_MISMATCH.to_string());
            }
            $(let $arg = $arg::from_slot(engine, $idx).map_err(fault)?;)*

            let result = catch_unwind(AssertUnwindSafe(|| func($($arg),*)))
                .map_err(|_| FAULT_UNKNOWN.to_string())?;

            result.into_results(engine).map_err(fault)
        }

        impl<F, R $(, $arg)*> NativeFunction<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + 'static,
            R: IntoResults + 'static,
            $($arg: FromSlot + 'static,)*
        {
            fn into_native(self) -> NativeRef {
                NativeRef::with_upvalue($trampoline::<F, R $(, $arg)*>, Rc::new(self))
            }
        }
    };
}

impl_native_function!(trampoline0, 0);
impl_native_function!(trampoline1, 1, A1 => 1);
impl_native_function!(trampoline2, 2, A1 => 1, A2 => 2);
impl_native_function!(trampoline3, 3, A1 => 1, A2 => 2, A3 => 3);
impl_native_function!(trampoline4, 4, A1 => 1, A2 => 2, A3 => 3, A4 => 4);
impl_native_function!(trampoline5, 5, A1 => 1, A2 => 2, A3 => 3, A4 => 4, A5 => 5);
impl_native_function!(trampoline6, 6, A1 => 1, A2 => 2, A3 => 3, A4 => 4, A5 => 5, A6 => 6);
impl_native_function!(trampoline7, 7, A1 => 1, A2 => 2, A3 => 3, A4 => 4, A5 => 5, A6 => 6, A7 => 7);
impl_native_function!(trampoline8, 8, A1 => 1, A2 => 2, A3 => 3, A4 => 4, A5 => 5, A6 => 6, A7 => 7, A8 => 8);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::reference::ReferenceEngine;
    use crate::engine::Engine;
    use crate::value::Value;

    fn call_native(engine: &mut ReferenceEngine, native: NativeRef, args: &[Value]) -> Result<usize, String> {
        engine.push_function(native);
        for arg in args {
            crate::marshal::push_value(engine, arg).unwrap();
        }
        match engine.call(args.len()) {
            Ok(n) => Ok(n),
            Err(fault) => Err(fault.to_string()),
        }
    }

    #[test]
    fn zero_arity_function_with_result() {
        let native = (|| 42.0_f64).into_native();
        let mut engine = ReferenceEngine::new();
        let nres = call_native(&mut engine, native, &[]).unwrap();
        assert_eq!(nres, 1);
        assert_eq!(engine.read_number(-1), Some(42.0));
    }

    #[test]
    fn typed_arguments_in_declared_order() {
        fn describe(n: f64, label: String, flag: bool) -> String {
            format!("{label}={n}/{flag}")
        }
        let native = describe.into_native();
        let mut engine = ReferenceEngine::new();
        let args = [
            Value::number(2.0),
            Value::text("x"),
            Value::boolean(true),
        ];
        let nres = call_native(&mut engine, native, &args).unwrap();
        assert_eq!(nres, 1);
        assert_eq!(engine.read_text(-1), Some("x=2/true".to_string()));
    }

    #[test]
    fn void_return_reports_zero_results() {
        fn sink(_: f64) {}
        let native = sink.into_native();
        let mut engine = ReferenceEngine::new();
        let nres = call_native(&mut engine, native, &[Value::number(1.0)]).unwrap();
        assert_eq!(nres, 0);
        assert_eq!(engine.stack_top(), 0);
    }

    #[test]
    fn value_sequence_return_spreads_results() {
        fn pair() -> Vec<Value> {
            vec![Value::number(1.0), Value::text("two")]
        }
        let native = pair.into_native();
        let mut engine = ReferenceEngine::new();
        let nres = call_native(&mut engine, native, &[]).unwrap();
        assert_eq!(nres, 2);
        assert_eq!(engine.read_number(1), Some(1.0));
        assert_eq!(engine.read_text(2), Some("two".to_string()));
    }

    #[test]
    fn wrong_argument_count_is_a_script_fault() {
        fn add(a: f64, b: f64) -> f64 {
            a + b
        }
        let native = add.into_native();
        let mut engine = ReferenceEngine::new();
        let err = call_native(&mut engine, native, &[Value::number(1.0)]).unwrap_err();
        assert!(err.contains("native function: type mismatch"));
    }

    #[test]
    fn wrong_argument_type_is_a_script_fault() {
        fn add(a: f64, b: f64) -> f64 {
            a + b
        }
        let native = add.into_native();
        let mut engine = ReferenceEngine::new();
        let err = call_native(
            &mut engine,
            native,
            &[Value::number(1.0), Value::text("two")],
        )
        .unwrap_err();
        assert!(err.contains("native function: type mismatch"));
    }

    #[test]
    fn integer_argument_rejects_fractional_input() {
        fn double(i: i64) -> i64 {
            i * 2
        }
        let native = double.into_native();
        let mut engine = ReferenceEngine::new();
        let err = call_native(&mut engine, native, &[Value::number(1.5)]).unwrap_err();
        assert!(err.contains("native function: type mismatch"));
    }

    #[test]
    fn host_panic_becomes_a_script_fault() {
        fn boom(_: f64) -> f64 {
            panic!("host bug")
        }
        let native = boom.into_native();
        let mut engine = ReferenceEngine::new();
        let err = call_native(&mut engine, native, &[Value::number(1.0)]).unwrap_err();
        assert!(err.contains("native function: unknown error"));
        // The failed call left the frame balanced.
        assert_eq!(engine.stack_top(), 0);
    }

    #[test]
    fn generic_value_argument_accepts_any_kind() {
        fn kind_name(v: Value) -> String {
            v.kind().name().to_string()
        }
        let native = kind_name.into_native();
        let mut engine = ReferenceEngine::new();
        call_native(&mut engine, native.clone(), &[Value::boolean(false)]).unwrap();
        assert_eq!(engine.read_text(-1), Some("boolean".to_string()));
        engine.pop(1);
        call_native(&mut engine, native, &[Value::text("s")]).unwrap();
        assert_eq!(engine.read_text(-1), Some("text".to_string()));
    }

    #[test]
    fn closures_with_captured_state_are_supported() {
        let offset = 10.0_f64;
        let native = (move |n: f64| n + offset).into_native();
        let mut engine = ReferenceEngine::new();
        call_native(&mut engine, native, &[Value::number(5.0)]).unwrap();
        assert_eq!(engine.read_number(-1), Some(15.0));
    }
}
