use std::{env, fs, process::ExitCode};

use actionlift::{AnalyzeOptions, ExecutionContext, StdDiagnostics, analyze_with};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let mut print_code = false;
    let mut paths: Vec<&str> = Vec::new();
    for arg in args.iter().skip(1) {
        if arg == "--print-code" {
            print_code = true;
        } else {
            paths.push(arg.as_str());
        }
    }
    let Some(file_path) = paths.first().copied() else {
        eprintln!("usage: actionlift <action.py> [context.json] [--print-code]");
        return ExitCode::FAILURE;
    };

    let code = match read_file(file_path) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let ctx = match paths.get(1) {
        Some(context_path) => match load_context(context_path) {
            Ok(ctx) => ctx,
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => ExecutionContext::default(),
    };

    let mut diagnostics = StdDiagnostics;
    match analyze_with(&code, &ctx, AnalyzeOptions { print_code }, &mut diagnostics) {
        Ok(analyzed) => {
            println!(
                "{file_path}: ok ({} call sites awaited, {} functions promoted)",
                analyzed.stats.awaited_calls,
                analyzed.stats.promoted_functions.len()
            );
            if !analyzed.stats.promoted_functions.is_empty() {
                println!("promoted to async: {}", analyzed.stats.promoted_functions.join(", "));
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{file_path}: {err}");
            ExitCode::FAILURE
        }
    }
}

fn read_file(file_path: &str) -> Result<String, String> {
    match fs::metadata(file_path) {
        Ok(metadata) => {
            if !metadata.is_file() {
                return Err(format!("{file_path} is not a file"));
            }
        }
        Err(err) => {
            return Err(format!("cannot read {file_path}: {err}"));
        }
    }
    fs::read_to_string(file_path).map_err(|err| format!("cannot read {file_path}: {err}"))
}

fn load_context(context_path: &str) -> Result<ExecutionContext, String> {
    let raw = fs::read_to_string(context_path).map_err(|err| format!("cannot read {context_path}: {err}"))?;
    serde_json::from_str(&raw).map_err(|err| format!("cannot parse {context_path}: {err}"))
}
