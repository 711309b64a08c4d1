//! Assembly of the synthetic wrapper around a raw action snippet.
//!
//! The harness gives the snippet a running shape: the concurrency import,
//! the front-end connection hookup, a uniquely named `async def` entry that
//! contains the user code followed by client construction and the call into
//! `action`, and the scheduling statement matching the runtime. The result
//! is plain source text, ready for parsing.

use uuid::Uuid;

/// Where the rewritten program will ultimately run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    /// Run the entry coroutine to completion on a fresh event loop.
    #[default]
    Native,
    /// Schedule the entry coroutine on the browser's already-running loop.
    Browser,
}

/// Values forwarded verbatim into the generated harness.
///
/// This is an explicit per-call context: nothing here is process-wide, so
/// concurrent analyses never interfere.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ExecutionContext {
    pub access_token: String,
    pub universe_id: String,
    pub environment: String,
    pub workspace_id: String,
    /// Client verbosity level, forwarded to the constructor.
    pub verbosity: String,
    /// Client retry budget, forwarded to the constructor.
    pub retry_attempts: u32,
    /// Name of a notification callable in the embedding interpreter's
    /// globals, attached to the front-end connection before the entry runs.
    pub notification_callback: Option<String>,
    pub mode: RuntimeMode,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            universe_id: String::new(),
            environment: String::new(),
            workspace_id: String::new(),
            verbosity: "INFO".to_owned(),
            retry_attempts: 5,
            notification_callback: None,
            mode: RuntimeMode::default(),
        }
    }
}

impl ExecutionContext {
    /// Creates a context with the required backend coordinates and default
    /// verbosity, retries and runtime mode.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        universe_id: impl Into<String>,
        environment: impl Into<String>,
        workspace_id: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            universe_id: universe_id.into(),
            environment: environment.into(),
            workspace_id: workspace_id.into(),
            ..Self::default()
        }
    }
}

/// A wrapped snippet ready for parsing.
#[derive(Debug, Clone)]
pub struct WrappedAction {
    /// The assembled source: preamble, entry function, scheduling tail.
    pub source: String,
    /// Name of the generated entry coroutine, unique per call.
    pub entry_name: String,
}

/// Wraps a raw action snippet in the execution harness.
#[must_use]
pub fn wrap(code: &str, ctx: &ExecutionContext) -> WrappedAction {
    let code = normalize(code);
    let entry_name = format!("action_main_{}", Uuid::new_v4().simple());

    let mut source = String::with_capacity(code.len() + 512);
    source.push_str("import asyncio\n");
    source.push_str("from shimoku.frontend import connection\n");
    if let Some(callback) = &ctx.notification_callback {
        source.push_str(&format!("connection.snackbar = {callback}\n"));
    }
    source.push_str(&format!("async def {entry_name}():\n"));
    for line in code.lines() {
        if line.trim().is_empty() {
            source.push('\n');
        } else {
            source.push_str(&format!("    {line}\n"));
        }
    }
    source.push_str("    shimoku_client = Client(\n");
    source.push_str(&format!("        access_token={},\n", py_str(&ctx.access_token)));
    source.push_str(&format!("        universe_id={},\n", py_str(&ctx.universe_id)));
    source.push_str(&format!("        environment={},\n", py_str(&ctx.environment)));
    source.push_str("        async_execution=True,\n");
    source.push_str(&format!("        verbosity={},\n", py_str(&ctx.verbosity)));
    source.push_str(&format!("        retry_attempts={},\n", ctx.retry_attempts));
    source.push_str("    )\n");
    source.push_str(&format!(
        "    shimoku_client.set_workspace({})\n",
        py_str(&ctx.workspace_id)
    ));
    source.push_str("    action(shimoku_client)\n");
    match ctx.mode {
        RuntimeMode::Native => source.push_str(&format!("asyncio.run({entry_name}())\n")),
        RuntimeMode::Browser => source.push_str(&format!("asyncio.ensure_future({entry_name}())\n")),
    }

    WrappedAction { source, entry_name }
}

/// Normalizes line endings and joins backslash-continued lines.
fn normalize(code: &str) -> String {
    code.replace("\r\n", "\n").replace('\r', "\n").replace("\\\n", "")
}

/// Renders a string as a single-quoted Python literal.
fn py_str(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

/// Renders a source listing with 1-based line numbers, the format printed
/// when analysis fails or a listing is requested.
#[must_use]
pub fn numbered(source: &str) -> String {
    let mut out = String::new();
    for (i, line) in source.lines().enumerate() {
        out.push_str(&format!("{:4} {line}\n", i + 1));
    }
    out
}
