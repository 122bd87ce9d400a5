#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod ast;
#[allow(
    clippy::indexing_slicing,
    clippy::module_name_repetitions,
)]
pub mod builtins;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::single_match_else,
    clippy::module_name_repetitions,
)]
pub mod codegen;
#[allow(clippy::module_name_repetitions)]
pub mod context;
#[allow(clippy::module_name_repetitions)]
pub mod error;
#[allow(
    clippy::indexing_slicing,
    clippy::cast_possible_truncation,
    clippy::module_name_repetitions,
)]
pub mod lexer;
pub mod optimize;
#[allow(clippy::module_name_repetitions)]
pub mod options;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod parser;
#[allow(clippy::indexing_slicing)]
pub mod util;

use serde::Serialize;
use tracing::{debug, error};

use context::Context;
use error::{CompileError, Diagnostic};
use options::Options;

/// Output of a successful compilation.
#[derive(Debug, Clone, Serialize)]
pub struct Compiled {
    pub code: String,
    /// Soft diagnostics collected along the way.
    pub diagnostics: Vec<Diagnostic>,
}

/// Compile source text to target source.
///
/// source → lex → parse → generate. Each call builds its own [`Context`],
/// so compilations never share variable or function state.
pub fn compile_source(source: &str, options: &Options) -> Result<Compiled, CompileError> {
    let tokens = lexer::lex(source, &options.lex);
    debug!(tokens = tokens.len(), "lexed");

    let mut ctx = Context::new();
    let ast = parser::parse(&tokens, &mut ctx, options)?;
    debug!(statements = ast.statement_count(), "parsed");

    let code = codegen::generate(&ast, &mut ctx, options)?;
    debug!(bytes = code.len(), "generated");

    Ok(Compiled {
        code,
        diagnostics: ctx.into_diagnostics(),
    })
}

/// Like [`compile_source`], but logs a hard error and returns `None`.
pub fn compile(source: &str, options: &Options) -> Option<String> {
    match compile_source(source, options) {
        Ok(compiled) => Some(compiled.code),
        Err(e) => {
            error!("{}", e.report());
            None
        }
    }
}
