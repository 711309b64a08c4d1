use actionlift::{ExecutionContext, RuntimeMode, wrap};

fn ctx() -> ExecutionContext {
    ExecutionContext::new("token", "universe", "production", "workspace")
}

#[test]
fn entry_names_are_unique_per_call() {
    let first = wrap("pass", &ctx());
    let second = wrap("pass", &ctx());
    assert_ne!(first.entry_name, second.entry_name);
    assert!(first.entry_name.starts_with("action_main_"));
    assert!(first.source.contains(&first.entry_name));
}

#[test]
fn user_code_is_indented_into_the_entry() {
    let wrapped = wrap("x = 1\nprint(x)", &ctx());
    let header = format!("async def {}():", wrapped.entry_name);
    assert!(wrapped.source.contains(&header));
    assert!(wrapped.source.contains("\n    x = 1\n"));
    assert!(wrapped.source.contains("\n    print(x)\n"));
}

#[test]
fn context_values_are_embedded() {
    let wrapped = wrap("pass", &ctx());
    assert!(wrapped.source.contains("access_token='token'"));
    assert!(wrapped.source.contains("universe_id='universe'"));
    assert!(wrapped.source.contains("environment='production'"));
    assert!(wrapped.source.contains("async_execution=True"));
    assert!(wrapped.source.contains("verbosity='INFO'"));
    assert!(wrapped.source.contains("retry_attempts=5"));
    assert!(wrapped.source.contains("shimoku_client.set_workspace('workspace')"));
    assert!(wrapped.source.contains("action(shimoku_client)"));
}

#[test]
fn context_strings_are_escaped() {
    let mut context = ctx();
    context.access_token = "it's".to_owned();
    let wrapped = wrap("pass", &context);
    assert!(wrapped.source.contains("access_token='it\\'s'"));
}

#[test]
fn native_mode_runs_a_fresh_event_loop() {
    let wrapped = wrap("pass", &ctx());
    assert!(
        wrapped
            .source
            .ends_with(&format!("asyncio.run({}())\n", wrapped.entry_name))
    );
}

#[test]
fn browser_mode_schedules_on_the_running_loop() {
    let mut context = ctx();
    context.mode = RuntimeMode::Browser;
    let wrapped = wrap("pass", &context);
    assert!(
        wrapped
            .source
            .ends_with(&format!("asyncio.ensure_future({}())\n", wrapped.entry_name))
    );
}

#[test]
fn notification_callback_is_attached_when_provided() {
    let mut context = ctx();
    context.notification_callback = Some("notify_user".to_owned());
    let wrapped = wrap("pass", &context);
    assert!(wrapped.source.contains("connection.snackbar = notify_user\n"));

    let without = wrap("pass", &ctx());
    assert!(!without.source.contains("connection.snackbar"));
}

#[test]
fn crlf_line_endings_are_normalized() {
    let wrapped = wrap("x = 1\r\ny = 2\r\n", &ctx());
    assert!(wrapped.source.contains("\n    x = 1\n    y = 2\n"));
    assert!(!wrapped.source.contains('\r'));
}

#[test]
fn line_continuations_are_joined() {
    let wrapped = wrap("total = 1 + \\\n2", &ctx());
    assert!(wrapped.source.contains("    total = 1 + 2\n"));
}

#[test]
fn blank_lines_are_preserved_without_indentation() {
    let wrapped = wrap("x = 1\n\ny = 2", &ctx());
    assert!(wrapped.source.contains("    x = 1\n\n    y = 2\n"));
}

#[test]
fn preamble_imports_the_event_loop_and_connection() {
    let wrapped = wrap("pass", &ctx());
    assert!(wrapped.source.starts_with("import asyncio\nfrom shimoku.frontend import connection\n"));
}
