//! Diagnostic output sinks for assembled-source listings.
//!
//! The analyzer prints the line-numbered harness source when asked to, and
//! automatically when parsing or validation fails. Hosts embedding the
//! analyzer (a browser kernel, a test) route that output through this trait
//! instead of capturing stdout.

/// Trait for receiving diagnostic output produced during analysis.
pub trait DiagnosticWriter {
    /// Writes one line of diagnostic output, without a trailing newline.
    fn write_line(&mut self, line: &str);
}

/// Writer that prints diagnostics to stdout.
#[derive(Debug, Default)]
pub struct StdDiagnostics;

impl DiagnosticWriter for StdDiagnostics {
    fn write_line(&mut self, line: &str) {
        println!("{line}");
    }
}

/// Writer that collects diagnostics into a buffer.
#[derive(Debug, Default)]
pub struct CollectDiagnostics {
    buffer: String,
}

impl CollectDiagnostics {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The collected output so far.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Consumes the collector and returns the output.
    #[must_use]
    pub fn into_string(self) -> String {
        self.buffer
    }
}

impl DiagnosticWriter for CollectDiagnostics {
    fn write_line(&mut self, line: &str) {
        self.buffer.push_str(line);
        self.buffer.push('\n');
    }
}
