//! Orchestration of the analysis pipeline: wrap, parse, check, rewrite.

use ruff_python_ast::ModModule;
use ruff_python_parser::parse_module;

use crate::{
    check,
    error::ActionError,
    harness::{self, ExecutionContext, WrappedAction},
    io::DiagnosticWriter,
    loc::LineIndex,
    rewrite::{self, RewriteStats},
    scope::ScopeTree,
};

/// Options controlling diagnostics of a single analysis.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzeOptions {
    /// Print the assembled, line-numbered source even when analysis
    /// succeeds. On failure the listing is printed regardless.
    pub print_code: bool,
}

/// The validated and rewritten action program.
#[derive(Debug)]
pub struct AnalyzedAction {
    /// Rewritten syntax tree, ready for an external compile/exec step.
    pub module: ModModule,
    /// The assembled (pre-rewrite) harness source the tree was parsed from.
    pub source: String,
    /// Name of the generated entry coroutine.
    pub entry_name: String,
    /// What the rewriter did: awaited call count and promoted functions.
    pub stats: RewriteStats,
}

/// Analyzes an action snippet, printing diagnostics to stdout.
pub fn analyze(code: &str, ctx: &ExecutionContext) -> Result<AnalyzedAction, ActionError> {
    let mut diagnostics = crate::io::StdDiagnostics;
    analyze_with(code, ctx, AnalyzeOptions::default(), &mut diagnostics)
}

/// Analyzes an action snippet with explicit options and diagnostic sink.
///
/// Each call is independent: the scope tree lives only for its duration and
/// the entry-function name is unique per call, so repeated analyses in one
/// process never collide.
pub fn analyze_with(
    code: &str,
    ctx: &ExecutionContext,
    options: AnalyzeOptions,
    diagnostics: &mut dyn DiagnosticWriter,
) -> Result<AnalyzedAction, ActionError> {
    let WrappedAction { source, entry_name } = harness::wrap(code, ctx);
    if options.print_code {
        emit_listing(diagnostics, &source);
    }

    let parsed = match parse_module(&source) {
        Ok(parsed) => parsed,
        Err(err) => {
            if !options.print_code {
                emit_listing(diagnostics, &source);
            }
            return Err(ActionError::structural(format!(
                "the assembled action source failed to parse: {err}"
            )));
        }
    };
    let mut module = parsed.into_syntax();

    let index = LineIndex::new(&source);
    let mut scopes = ScopeTree::new();
    if let Err(err) = check::check(&module, &index, &mut scopes) {
        if !options.print_code {
            emit_listing(diagnostics, &source);
        }
        return Err(err);
    }

    let stats = rewrite::rewrite(&mut module, &mut scopes);
    Ok(AnalyzedAction {
        module,
        source,
        entry_name,
        stats,
    })
}

fn emit_listing(diagnostics: &mut dyn DiagnosticWriter, source: &str) {
    for line in harness::numbered(source).lines() {
        diagnostics.write_line(line);
    }
}
