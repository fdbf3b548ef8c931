//! Compile-time error reporting.
//!
//! The compiler keeps going after an error so one run reports as much as
//! possible; the accumulated list comes back as [`CompileErrors`].

use thiserror::Error;

/// One diagnostic with the source line it was reported on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct CompileError {
    pub line: u32,
    pub message: String,
}

impl CompileError {
    pub fn new(line: u32, message: impl Into<String>) -> CompileError {
        CompileError {
            line,
            message: message.into(),
        }
    }
}

/// Every diagnostic produced while compiling one shader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileErrors {
    pub errors: Vec<CompileError>,
}

impl std::error::Error for CompileErrors {}

impl CompileErrors {
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// True when any diagnostic's message contains `needle`; keeps tests
    /// readable.
    pub fn contains(&self, needle: &str) -> bool {
        self.errors.iter().any(|e| e.message.contains(needle))
    }
}

impl std::fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

/// Error sink used by the compiler passes. Each pass pushes into the same
/// list; compilation fails at the end of the pipeline if the list is
/// non-empty.
#[derive(Debug, Default)]
pub struct ErrorLog {
    errors: Vec<CompileError>,
}

impl ErrorLog {
    pub fn new() -> ErrorLog {
        ErrorLog::default()
    }

    pub fn error(&mut self, line: u32, message: impl Into<String>) {
        self.errors.push(CompileError::new(line, message));
    }

    pub fn count(&self) -> usize {
        self.errors.len()
    }

    /// Consume the log; `Err` when anything was reported.
    pub fn finish(self) -> Result<(), CompileErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(CompileErrors {
                errors: self.errors,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_accumulate_and_format_with_lines() {
        let mut log = ErrorLog::new();
        log.error(2, "Continue outside of a loop");
        log.error(7, "Unresolved symbol 'Kd'");
        let errors = log.finish().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.contains("Continue outside of a loop"));
        assert_eq!(
            errors.to_string(),
            "line 2: Continue outside of a loop\nline 7: Unresolved symbol 'Kd'"
        );
    }

    #[test]
    fn empty_log_finishes_clean() {
        assert!(ErrorLog::new().finish().is_ok());
    }
}
