#![doc = include_str!("../../../README.md")]

mod analyze;
mod check;
mod error;
mod harness;
mod io;
mod loc;
mod rewrite;
mod scope;
mod surface;

pub use crate::{
    analyze::{AnalyzeOptions, AnalyzedAction, analyze, analyze_with},
    error::ActionError,
    harness::{ExecutionContext, RuntimeMode, WrappedAction, numbered, wrap},
    io::{CollectDiagnostics, DiagnosticWriter, StdDiagnostics},
    loc::CodeLoc,
    rewrite::RewriteStats,
    surface::{ACTION_FUNCTION, ASYNC_MODULE, CLIENT_CLASS, CLIENT_VARIABLE, ClientCapability, SDK_PACKAGE},
};
