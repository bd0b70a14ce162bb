//! Wrapper code generation.
//!
//! `wrapper::WrapperGenerator` walks a validated `ProgramIr` and writes the
//! host-side Python module through a `emitter::CodeEmitter`.
//! `benchmark` appends the optional standalone timing harness.

pub mod benchmark;
pub mod emitter;
pub mod wrapper;

use serde::Serialize;

use crate::ir::deps::OutputKind;
use crate::ir::SizeExpr;

pub use emitter::{CodeEmitter, LineMap, Region};
pub use wrapper::WrapperGenerator;

/// The result of one generation pass.
#[derive(Clone, Debug, Serialize)]
pub struct GeneratedModule {
    pub source: String,
    pub line_map: LineMap,
    /// One entry per program output, in return order.
    pub output_kinds: Vec<OutputKind>,
    /// BLAKE3 hex digest of `source`.
    pub key: String,
    /// Cleared when the pool planner laid out buffers.
    pub allow_stack_allocation: bool,
}

impl GeneratedModule {
    pub(crate) fn new(
        source: String,
        line_map: LineMap,
        output_kinds: Vec<OutputKind>,
        allow_stack_allocation: bool,
    ) -> Self {
        let key = blake3::hash(source.as_bytes()).to_hex().to_string();
        Self {
            source,
            line_map,
            output_kinds,
            key,
            allow_stack_allocation,
        }
    }

    /// First 16 hex chars of the key, for status lines.
    pub fn short_key(&self) -> &str {
        &self.key[..16]
    }
}

/// Python tuple literal: `(4, 4)`, `(8, )`, `()`.
pub fn python_tuple<T: ToString>(items: &[T]) -> String {
    match items {
        [] => "()".to_string(),
        [one] => format!("({}, )", one.to_string()),
        many => format!(
            "({})",
            many.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

pub fn shape_tuple(dims: &[SizeExpr]) -> String {
    python_tuple(dims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_tuple_forms() {
        assert_eq!(python_tuple::<i64>(&[]), "()");
        assert_eq!(python_tuple(&[8]), "(8, )");
        assert_eq!(python_tuple(&[4, 4]), "(4, 4)");
        assert_eq!(
            shape_tuple(&[SizeExpr::Sym("s0".into()), SizeExpr::Int(16)]),
            "(s0, 16)"
        );
    }

    #[test]
    fn test_key_is_content_hash() {
        let a = GeneratedModule::new("x = 1\n".into(), LineMap::default(), vec![], true);
        let b = GeneratedModule::new("x = 1\n".into(), LineMap::default(), vec![], true);
        let c = GeneratedModule::new("x = 2\n".into(), LineMap::default(), vec![], true);
        assert_eq!(a.key, b.key);
        assert_ne!(a.key, c.key);
        assert_eq!(a.key.len(), 64);
        assert_eq!(a.short_key().len(), 16);
    }
}
