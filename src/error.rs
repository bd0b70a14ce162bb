//! Error taxonomy for dispatch and wrapper generation.
//!
//! Every error here is fatal for the call that produced it: generation is
//! a pure transformation of the IR, so retrying without changing the IR
//! cannot succeed. Callers treat any `Err` as "no artifact produced".

use thiserror::Error;

use crate::diagnostic::Diagnostic;
use crate::dispatch::{DeviceFamily, OperatorKind};
use crate::span::Span;

/// Failures of the device-dispatch registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Device family outside {cpu, xpu}.
    #[error("device '{0}' is not supported; only cpu and xpu devices can dispatch fused ops")]
    UnsupportedDevice(String),

    /// No kernel registered for the requested pair.
    #[error("no {op} kernel is registered for device family {family}")]
    UnregisteredOperator {
        family: DeviceFamily,
        op: OperatorKind,
    },

    /// Operator name that does not name any known operator kind.
    #[error("unknown operator kind '{0}'")]
    UnknownOperator(String),
}

/// How a device-guard stack was misused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardFault {
    /// `DeviceGuardExit` with no guard open.
    ExitWithoutEnter,
    /// Guard still open when the suffix is reached.
    Unclosed { device_index: u32 },
}

/// Failures of wrapper generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    /// Unbalanced device guards; an upstream IR-construction bug.
    #[error("{}", guard_message(.fault))]
    GuardStackViolation {
        fault: GuardFault,
        line: Option<usize>,
    },

    /// IR references something never declared, or is otherwise ill-formed.
    #[error("malformed IR: {message}")]
    MalformedIr {
        message: String,
        line: Option<usize>,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

fn guard_message(fault: &GuardFault) -> String {
    match fault {
        GuardFault::ExitWithoutEnter => {
            "device guard exit without a matching enter".to_string()
        }
        GuardFault::Unclosed { device_index } => {
            format!("device guard {} is still open at the end of the program", device_index)
        }
    }
}

impl CodegenError {
    pub fn malformed(message: impl Into<String>, line: Option<usize>) -> Self {
        CodegenError::MalformedIr {
            message: message.into(),
            line,
        }
    }

    /// Attach an IR line to a `MalformedIr` that has none yet.
    pub fn at_line(self, at: usize) -> Self {
        match self {
            CodegenError::MalformedIr {
                message,
                line: None,
            } => CodegenError::MalformedIr {
                message,
                line: Some(at),
            },
            other => other,
        }
    }

    /// Index of the IR line the error points at, when known.
    pub fn line(&self) -> Option<usize> {
        match self {
            CodegenError::GuardStackViolation { line, .. } => *line,
            CodegenError::MalformedIr { line, .. } => *line,
            CodegenError::Dispatch(_) => None,
        }
    }

    /// Convert to a diagnostic, resolving the IR line to its source span.
    pub fn to_diagnostic(&self, spans: &[Span]) -> Diagnostic {
        let span = self
            .line()
            .and_then(|i| spans.get(i).copied())
            .unwrap_or_else(Span::dummy);
        let diag = Diagnostic::error(self.to_string(), span);
        match self {
            CodegenError::GuardStackViolation { .. } => diag.with_note(
                "device guards must be closed in the reverse order they were opened".to_string(),
            ),
            _ => diag,
        }
    }
}
