use serde::Serialize;

/// A hard compilation error. Aborts the current compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    pub line: Option<usize>,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parser,
    Compiler,
}

impl CompileError {
    pub fn parser(message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            message: message.into(),
            line,
            kind: ErrorKind::Parser,
        }
    }

    pub fn compiler(message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            message: message.into(),
            line,
            kind: ErrorKind::Compiler,
        }
    }

    /// Format the error with its stage and line, e.g. `[parser] line 3: impossible radix 40`.
    pub fn report(&self) -> String {
        let stage = match self.kind {
            ErrorKind::Parser => "parser",
            ErrorKind::Compiler => "compiler",
        };
        match self.line {
            Some(line) => format!("[{stage}] line {line}: {}", self.message),
            None => format!("[{stage}] {}", self.message),
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} on line {line}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CompileError {}

/// A soft diagnostic. Logged, never aborts compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub message: String,
    pub line: Option<usize>,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "warning: line {line}: {}", self.message),
            None => write!(f, "warning: {}", self.message),
        }
    }
}
