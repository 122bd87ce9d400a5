use std::fmt;
use std::fs;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ── Lexer options ───────────────────────────────────────────────

/// Options consumed by the lexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LexOptions {
    /// Keep whitespace as WHITESPACE tokens (debug output only).
    pub preserve: bool,
    /// Reserved.
    pub exact: bool,
}

impl Default for LexOptions {
    fn default() -> Self {
        Self {
            preserve: false,
            exact: true,
        }
    }
}

// ── Compile options ─────────────────────────────────────────────

/// Output dialect. Only one is supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    #[default]
    Basic,
}

/// Options for a single compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    pub lex: LexOptions,
    /// Use `remainder(` for `%` instead of the iPart/fPart emulation.
    pub modern: bool,
    /// Fold constant subtrees.
    pub simplify: bool,
    pub target: Target,
    /// Emit `"unknown_expr"` for unparseable expressions instead of dropping them.
    pub dump_unknown: bool,
    /// Program re-entered by non-inline user function calls.
    pub program_name: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            lex: LexOptions::default(),
            modern: true,
            simplify: true,
            target: Target::Basic,
            dump_unknown: false,
            program_name: "TIADV".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum OptionsError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for OptionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionsError::Io(e) => write!(f, "I/O error: {e}"),
            OptionsError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for OptionsError {}

impl From<std::io::Error> for OptionsError {
    fn from(e: std::io::Error) -> Self {
        OptionsError::Io(e)
    }
}

impl From<serde_json::Error> for OptionsError {
    fn from(e: serde_json::Error) -> Self {
        OptionsError::Json(e)
    }
}

impl Options {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, OptionsError> {
        let data = fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, OptionsError> {
        Ok(serde_json::from_str(data)?)
    }

    /// JSON schema of the options file.
    pub fn schema() -> serde_json::Value {
        let schema = schemars::schema_for!(Options);
        serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
    }
}
