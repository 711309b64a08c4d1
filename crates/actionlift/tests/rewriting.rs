use actionlift::{AnalyzeOptions, AnalyzedAction, CollectDiagnostics, ExecutionContext, analyze_with};
use pretty_assertions::assert_eq;
use ruff_python_ast::{self as ast, Expr, Stmt};

fn ctx() -> ExecutionContext {
    ExecutionContext::new("token", "universe", "production", "workspace")
}

fn analyze_ok(code: &str) -> AnalyzedAction {
    let mut diagnostics = CollectDiagnostics::new();
    analyze_with(code, &ctx(), AnalyzeOptions::default(), &mut diagnostics)
        .unwrap_or_else(|err| panic!("expected snippet to validate, got: {err}"))
}

/// The generated entry coroutine wrapping the user code.
fn entry_def(analyzed: &AnalyzedAction) -> &ast::StmtFunctionDef {
    analyzed
        .module
        .body
        .iter()
        .find_map(|stmt| match stmt {
            Stmt::FunctionDef(def) if def.name.as_str() == analyzed.entry_name => Some(def),
            _ => None,
        })
        .expect("entry function present in the rewritten module")
}

fn find_def<'a>(body: &'a [Stmt], name: &str) -> &'a ast::StmtFunctionDef {
    body.iter()
        .find_map(|stmt| match stmt {
            Stmt::FunctionDef(def) if def.name.as_str() == name => Some(def),
            _ => None,
        })
        .unwrap_or_else(|| panic!("function '{name}' not found"))
}

/// True for an expression statement of the form `await <call>`.
fn is_awaited_call(stmt: &Stmt) -> bool {
    matches!(stmt, Stmt::Expr(expr) if matches!(&*expr.value, Expr::Await(_)))
}

/// True for a plain (un-awaited) call expression statement.
fn is_plain_call(stmt: &Stmt) -> bool {
    matches!(stmt, Stmt::Expr(expr) if matches!(&*expr.value, Expr::Call(_)))
}

/// Finds the statement awaiting or calling the named function in a body.
fn call_stmt<'a>(body: &'a [Stmt], callee: &str) -> &'a Stmt {
    body.iter()
        .find(|stmt| {
            let Stmt::Expr(expr) = stmt else { return false };
            let call = match &*expr.value {
                Expr::Await(await_expr) => match &*await_expr.value {
                    Expr::Call(call) => call,
                    _ => return false,
                },
                Expr::Call(call) => call,
                _ => return false,
            };
            matches!(&*call.func, Expr::Name(name) if name.id.as_str() == callee)
        })
        .unwrap_or_else(|| panic!("no call to '{callee}' found"))
}

#[test]
fn direct_client_call_is_awaited_and_action_promoted() {
    let analyzed = analyze_ok(
        "from shimoku import Client\n\
         \n\
         def action(shimoku_client):\n\
         \x20   shimoku_client.set_menu_path('overview')\n",
    );
    let entry = entry_def(&analyzed);
    let action = find_def(&entry.body, "action");
    assert!(action.is_async, "action must be promoted to async def");
    assert!(is_awaited_call(&action.body[0]), "client call must be awaited");
}

#[test]
fn helper_with_client_parameter_is_promoted_and_awaited() {
    let analyzed = analyze_ok(
        "from shimoku import Client\n\
         \n\
         def action(shimoku_client):\n\
         \x20   helper(shimoku_client)\n\
         \n\
         def helper(c: Client):\n\
         \x20   c.plt.line(data=[], x='a')\n",
    );
    let entry = entry_def(&analyzed);

    let helper = find_def(&entry.body, "helper");
    assert!(helper.is_async, "helper must be promoted to async def");
    assert!(is_awaited_call(&helper.body[0]), "c.plt.line(...) must be awaited");

    let action = find_def(&entry.body, "action");
    assert!(action.is_async, "action must be promoted to async def");
    assert!(
        is_awaited_call(call_stmt(&action.body, "helper")),
        "helper(shimoku_client) must be awaited"
    );

    // The harness's own call into the now-async action is awaited too.
    assert!(
        is_awaited_call(call_stmt(&entry.body, "action")),
        "action(shimoku_client) must be awaited in the entry"
    );

    assert_eq!(analyzed.stats.promoted_functions, vec!["action", "helper"]);
}

#[test]
fn async_requirement_propagates_through_call_chain() {
    let analyzed = analyze_ok(
        "from shimoku import Client\n\
         \n\
         def g(c: Client):\n\
         \x20   c.data.set_data(data=[])\n\
         \n\
         def f(c: Client):\n\
         \x20   g(c)\n\
         \n\
         def action(shimoku_client):\n\
         \x20   f(shimoku_client)\n",
    );
    let entry = entry_def(&analyzed);

    let g = find_def(&entry.body, "g");
    assert!(g.is_async);
    assert!(is_awaited_call(&g.body[0]));

    let f = find_def(&entry.body, "f");
    assert!(f.is_async, "f must become async because it calls g");
    assert!(is_awaited_call(call_stmt(&f.body, "g")), "f's call to g must be awaited");

    let action = find_def(&entry.body, "action");
    assert!(action.is_async);
    assert!(is_awaited_call(call_stmt(&action.body, "f")));
}

#[test]
fn sibling_without_client_calls_stays_synchronous() {
    let analyzed = analyze_ok(
        "from shimoku import Client\n\
         \n\
         def helper(c: Client):\n\
         \x20   c.plt.line(data=[], x='a')\n\
         \n\
         def fmt(n: int) -> str:\n\
         \x20   return str(n)\n\
         \n\
         def action(shimoku_client):\n\
         \x20   helper(shimoku_client)\n\
         \x20   fmt(3)\n",
    );
    let entry = entry_def(&analyzed);

    let fmt = find_def(&entry.body, "fmt");
    assert!(!fmt.is_async, "fmt never touches the client and must stay sync");

    let action = find_def(&entry.body, "action");
    assert!(is_awaited_call(call_stmt(&action.body, "helper")));
    assert!(
        is_plain_call(call_stmt(&action.body, "fmt")),
        "the call to fmt must stay un-awaited"
    );
    assert_eq!(analyzed.stats.promoted_functions, vec!["helper", "action"]);
}

#[test]
fn non_capability_client_attributes_stay_synchronous() {
    let analyzed = analyze_ok(
        "from shimoku import Client\n\
         \n\
         def action(shimoku_client):\n\
         \x20   shimoku_client.disable_caching()\n",
    );
    let entry = entry_def(&analyzed);
    let action = find_def(&entry.body, "action");
    assert!(!action.is_async, "non-capability attributes must not force async");
    assert!(is_plain_call(&action.body[0]));
}

/// Helpers are resolved against the scope tree in source order. A single
/// forward reference works (the rewriter sees the checker's finalized
/// flags), but a two-level forward chain loses the outermost await. This is
/// long-standing behavior callers rely on; the test pins it.
#[test]
fn forward_reference_chain_keeps_source_order_limitation() {
    let analyzed = analyze_ok(
        "from shimoku import Client\n\
         \n\
         def f(c: Client):\n\
         \x20   g(c)\n\
         \n\
         def g(c: Client):\n\
         \x20   h(c)\n\
         \n\
         def h(c: Client):\n\
         \x20   c.plt.line(data=[], x='a')\n\
         \n\
         def action(shimoku_client):\n\
         \x20   f(shimoku_client)\n",
    );
    let entry = entry_def(&analyzed);

    let h = find_def(&entry.body, "h");
    assert!(h.is_async);
    let g = find_def(&entry.body, "g");
    assert!(g.is_async, "g sees h already finalized and is promoted");
    assert!(is_awaited_call(call_stmt(&g.body, "h")));

    let f = find_def(&entry.body, "f");
    assert!(!f.is_async, "f was rewritten before g was known to be async");
    assert!(
        is_plain_call(call_stmt(&f.body, "g")),
        "f's call to g stays un-awaited under source-order resolution"
    );

    let action = find_def(&entry.body, "action");
    assert!(!action.is_async);
    assert_eq!(analyzed.stats.promoted_functions, vec!["g", "h"]);
}

#[test]
fn harness_set_workspace_is_awaited_in_entry() {
    let analyzed = analyze_ok(
        "from shimoku import Client\n\
         \n\
         def action(shimoku_client):\n\
         \x20   pass\n",
    );
    let entry = entry_def(&analyzed);
    assert!(entry.is_async, "the entry is generated as a coroutine");
    let awaited = entry.body.iter().filter(|stmt| is_awaited_call(stmt)).count();
    assert_eq!(awaited, 1, "only set_workspace is awaited for an inert action");
}

#[test]
fn module_level_scheduling_tail_is_untouched() {
    let analyzed = analyze_ok(
        "from shimoku import Client\n\
         \n\
         def action(shimoku_client):\n\
         \x20   shimoku_client.run()\n",
    );
    let tail = analyzed
        .module
        .body
        .last()
        .expect("module has a scheduling tail");
    assert!(
        is_plain_call(tail),
        "asyncio.run(...) at module level must stay un-awaited"
    );
}

#[test]
fn repeated_analysis_is_deterministic_with_unique_entries() {
    const SNIPPET: &str = "from shimoku import Client\n\
                           \n\
                           def action(shimoku_client):\n\
                           \x20   helper(shimoku_client)\n\
                           \n\
                           def helper(c: Client):\n\
                           \x20   c.plt.line(data=[], x='a')\n";
    let first = analyze_ok(SNIPPET);
    let second = analyze_ok(SNIPPET);

    assert_ne!(first.entry_name, second.entry_name, "entry names are unique per call");
    assert_eq!(first.stats.awaited_calls, second.stats.awaited_calls);
    assert_eq!(first.stats.promoted_functions, second.stats.promoted_functions);

    // The user-code subtrees are structurally identical: the entry names
    // have the same length, so ranges line up exactly.
    let first_helper = find_def(&entry_def(&first).body, "helper");
    let second_helper = find_def(&entry_def(&second).body, "helper");
    assert_eq!(format!("{first_helper:?}"), format!("{second_helper:?}"));
}

#[test]
fn awaited_call_count_matches_rewrites() {
    let analyzed = analyze_ok(
        "from shimoku import Client\n\
         \n\
         def action(shimoku_client):\n\
         \x20   helper(shimoku_client)\n\
         \n\
         def helper(c: Client):\n\
         \x20   c.plt.line(data=[], x='a')\n",
    );
    // helper's client call, action's helper call, the entry's action call,
    // and the harness set_workspace call.
    assert_eq!(analyzed.stats.awaited_calls, 4);
}
