//! Error types for the shift register minimizer

use thiserror::Error;

/// Result type for compilation operations
pub type CompileResult<T> = Result<T, CompileError>;

/// Compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Lexer error at position {position}: {message}")]
    LexerError { position: usize, message: String },

    #[error("Parser error: {message}")]
    ParseError { message: String },

    #[error(
        "Dependence distance vector is not constant:\n\
         \tWrite: {var}({write})\n\
         \tRead:  {var}({read})\n\
         \t{dim}'th distance element: {distance} is not constant"
    )]
    NonConstantDistance {
        var: String,
        write: String,
        read: String,
        dim: usize,
        distance: String,
    },

    #[error(
        "Dependence distance vector is not valid:\n\
         \tWrite:    {var}({write})\n\
         \tRead:     {var}({read})\n\
         \tDistance: {distance:?}\n\
         \tError:    {reason}"
    )]
    AcausalDependence {
        var: String,
        write: String,
        read: String,
        distance: Vec<i64>,
        reason: String,
    },

    #[error("Shift register {var} is written more than once")]
    MultipleWrites { var: String },

    #[error("Only one vectorized loop is allowed, found {first} and {second}")]
    MultipleVectorizedLoops { first: String, second: String },

    #[error("Vectorized loop {loop_name} must be the innermost dimension of {var}")]
    VectorizedNotInnermost { var: String, loop_name: String },

    #[error("Write to {var} uses index {index}, which is not an enclosing loop variable")]
    WriteIndexNotLoopVar { var: String, index: String },

    #[error("Extent of loop {loop_name} used by {var} is not a compile-time constant")]
    NonConstantExtent { var: String, loop_name: String },

    #[error("Register extent of {var} over loop {loop_name} overflows a 64-bit integer")]
    ExtentOverflow { var: String, loop_name: String },

    #[error(
        "Vectorized loop of {var} carries a dependence and needs {extent} time registers; \
         devectorize the loop or make its distances 0"
    )]
    UnsupportedVectorizedTime { var: String, extent: i64 },

    #[error("Shift register {var} is allocated in more than one systolic region")]
    DuplicateAllocation { var: String },

    #[error("Evaluation error: {message}")]
    Eval { message: String },

    #[error("Semantic mismatch at emitted value {index}: expected {expected:?}, got {actual:?}")]
    Mismatch {
        index: usize,
        expected: Option<i64>,
        actual: Option<i64>,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CompileError {
    pub fn parse_error(msg: impl Into<String>) -> Self {
        CompileError::ParseError { message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CompileError::Internal { message: msg.into() }
    }

    pub fn eval(msg: impl Into<String>) -> Self {
        CompileError::Eval { message: msg.into() }
    }

    /// True for errors caused by the input program rather than by a bug in
    /// whoever built the IR.
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            CompileError::Internal { .. } | CompileError::Eval { .. } | CompileError::Mismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acausal_message_names_accesses() {
        let err = CompileError::AcausalDependence {
            var: "V".to_string(),
            write: "x".to_string(),
            read: "x + 1".to_string(),
            distance: vec![-1],
            reason: "0'th element = -1 is negative".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("V(x)"));
        assert!(text.contains("V(x + 1)"));
        assert!(text.contains("[-1]"));
        assert!(err.is_user_error());
    }

    #[test]
    fn test_internal_is_not_user_error() {
        assert!(!CompileError::internal("arity").is_user_error());
    }
}
