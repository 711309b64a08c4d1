//! The async rewriter: a second pass over the validated tree that inserts
//! `await` at every recorded call site, awaits calls to functions already
//! known to be asynchronous, and promotes the enclosing definitions to
//! `async def`.
//!
//! The pass performs no policy checks; a tree that passed the checker cannot
//! violate its assumptions. Re-running the pass over its own output changes
//! nothing: awaited calls are never wrapped twice and promoted definitions
//! stay promoted.

use ruff_python_ast::{self as ast, Expr, Stmt};
use ruff_text_size::Ranged;

use crate::scope::ScopeTree;

/// Summary of one rewriting pass.
#[derive(Debug, Clone, Default)]
pub struct RewriteStats {
    /// Number of call expressions wrapped in `await`.
    pub awaited_calls: usize,
    /// Names of user functions promoted to `async def`, in source order.
    pub promoted_functions: Vec<String>,
}

/// Rewrites the module in place using the scope tree built by the checker.
pub(crate) fn rewrite(module: &mut ast::ModModule, scopes: &mut ScopeTree) -> RewriteStats {
    scopes.rewind();
    let mut rewriter = Rewriter {
        scopes,
        stats: RewriteStats::default(),
    };
    rewriter.rewrite_stmts(&mut module.body);
    rewriter.stats
}

struct Rewriter<'a> {
    scopes: &'a mut ScopeTree,
    stats: RewriteStats,
}

impl Rewriter<'_> {
    fn rewrite_stmts(&mut self, stmts: &mut [Stmt]) {
        for stmt in stmts {
            self.rewrite_stmt(stmt);
        }
    }

    fn rewrite_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::FunctionDef(def) => {
                // Decorators and defaults belong to the enclosing scope.
                for decorator in &mut def.decorator_list {
                    self.rewrite_expr(&mut decorator.expression);
                }
                for param in def
                    .parameters
                    .posonlyargs
                    .iter_mut()
                    .chain(def.parameters.args.iter_mut())
                    .chain(def.parameters.kwonlyargs.iter_mut())
                {
                    if let Some(default) = &mut param.default {
                        self.rewrite_expr(default);
                    }
                }
                self.scopes.enter(def.name.as_str());
                self.rewrite_stmts(&mut def.body);
                let scope = self.scopes.current();
                let promote = self.scopes.needs_async(scope);
                self.scopes.exit();
                if promote && !def.is_async {
                    def.is_async = true;
                    self.stats.promoted_functions.push(def.name.as_str().to_owned());
                }
            }
            Stmt::ClassDef(class) => {
                for decorator in &mut class.decorator_list {
                    self.rewrite_expr(&mut decorator.expression);
                }
                if let Some(arguments) = &mut class.arguments {
                    for base in arguments.args.iter_mut() {
                        self.rewrite_expr(base);
                    }
                    for keyword in arguments.keywords.iter_mut() {
                        self.rewrite_expr(&mut keyword.value);
                    }
                }
                self.rewrite_stmts(&mut class.body);
            }
            Stmt::Return(ret) => {
                if let Some(value) = &mut ret.value {
                    self.rewrite_expr(value);
                }
            }
            Stmt::Assign(assign) => {
                self.rewrite_expr(&mut assign.value);
                for target in &mut assign.targets {
                    self.rewrite_expr(target);
                }
            }
            Stmt::AugAssign(aug) => {
                self.rewrite_expr(&mut aug.target);
                self.rewrite_expr(&mut aug.value);
            }
            Stmt::AnnAssign(ann) => {
                if let Some(value) = &mut ann.value {
                    self.rewrite_expr(value);
                }
                self.rewrite_expr(&mut ann.target);
            }
            Stmt::TypeAlias(alias) => self.rewrite_expr(&mut alias.value),
            Stmt::For(for_stmt) => {
                self.rewrite_expr(&mut for_stmt.iter);
                self.rewrite_expr(&mut for_stmt.target);
                self.rewrite_stmts(&mut for_stmt.body);
                self.rewrite_stmts(&mut for_stmt.orelse);
            }
            Stmt::While(while_stmt) => {
                self.rewrite_expr(&mut while_stmt.test);
                self.rewrite_stmts(&mut while_stmt.body);
                self.rewrite_stmts(&mut while_stmt.orelse);
            }
            Stmt::If(if_stmt) => {
                self.rewrite_expr(&mut if_stmt.test);
                self.rewrite_stmts(&mut if_stmt.body);
                for clause in &mut if_stmt.elif_else_clauses {
                    if let Some(test) = &mut clause.test {
                        self.rewrite_expr(test);
                    }
                    self.rewrite_stmts(&mut clause.body);
                }
            }
            Stmt::With(with_stmt) => {
                for item in &mut with_stmt.items {
                    self.rewrite_expr(&mut item.context_expr);
                    if let Some(vars) = &mut item.optional_vars {
                        self.rewrite_expr(vars);
                    }
                }
                self.rewrite_stmts(&mut with_stmt.body);
            }
            Stmt::Match(match_stmt) => {
                self.rewrite_expr(&mut match_stmt.subject);
                for case in &mut match_stmt.cases {
                    if let Some(guard) = &mut case.guard {
                        self.rewrite_expr(guard);
                    }
                    self.rewrite_stmts(&mut case.body);
                }
            }
            Stmt::Raise(raise) => {
                if let Some(exc) = &mut raise.exc {
                    self.rewrite_expr(exc);
                }
                if let Some(cause) = &mut raise.cause {
                    self.rewrite_expr(cause);
                }
            }
            Stmt::Try(try_stmt) => {
                self.rewrite_stmts(&mut try_stmt.body);
                for handler in &mut try_stmt.handlers {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    if let Some(exc_type) = &mut handler.type_ {
                        self.rewrite_expr(exc_type);
                    }
                    self.rewrite_stmts(&mut handler.body);
                }
                self.rewrite_stmts(&mut try_stmt.orelse);
                self.rewrite_stmts(&mut try_stmt.finalbody);
            }
            Stmt::Assert(assert) => {
                self.rewrite_expr(&mut assert.test);
                if let Some(msg) = &mut assert.msg {
                    self.rewrite_expr(msg);
                }
            }
            Stmt::Delete(delete) => {
                for target in &mut delete.targets {
                    self.rewrite_expr(target);
                }
            }
            Stmt::Expr(expr) => self.rewrite_expr(&mut expr.value),
            Stmt::Import(_)
            | Stmt::ImportFrom(_)
            | Stmt::Global(_)
            | Stmt::Nonlocal(_)
            | Stmt::Pass(_)
            | Stmt::Break(_)
            | Stmt::Continue(_)
            | Stmt::IpyEscapeCommand(_) => {}
        }
    }

    fn rewrite_expr(&mut self, expr: &mut Expr) {
        match expr {
            Expr::Call(_) => self.rewrite_call(expr),
            Expr::Await(await_expr) => {
                // Already awaited: rewrite the call's children but never
                // wrap the call a second time.
                if let Expr::Call(call) = &mut *await_expr.value {
                    self.rewrite_call_parts(call);
                } else {
                    self.rewrite_expr(&mut await_expr.value);
                }
            }
            Expr::BoolOp(bool_op) => {
                for value in &mut bool_op.values {
                    self.rewrite_expr(value);
                }
            }
            Expr::Named(named) => {
                self.rewrite_expr(&mut named.value);
            }
            Expr::BinOp(bin_op) => {
                self.rewrite_expr(&mut bin_op.left);
                self.rewrite_expr(&mut bin_op.right);
            }
            Expr::UnaryOp(unary) => self.rewrite_expr(&mut unary.operand),
            Expr::Lambda(lambda) => {
                if let Some(parameters) = &mut lambda.parameters {
                    for param in parameters
                        .posonlyargs
                        .iter_mut()
                        .chain(parameters.args.iter_mut())
                        .chain(parameters.kwonlyargs.iter_mut())
                    {
                        if let Some(default) = &mut param.default {
                            self.rewrite_expr(default);
                        }
                    }
                }
                self.rewrite_expr(&mut lambda.body);
            }
            Expr::If(if_expr) => {
                self.rewrite_expr(&mut if_expr.test);
                self.rewrite_expr(&mut if_expr.body);
                self.rewrite_expr(&mut if_expr.orelse);
            }
            Expr::Dict(dict) => {
                for item in &mut dict.items {
                    if let Some(key) = &mut item.key {
                        self.rewrite_expr(key);
                    }
                    self.rewrite_expr(&mut item.value);
                }
            }
            Expr::Set(set) => {
                for elt in &mut set.elts {
                    self.rewrite_expr(elt);
                }
            }
            Expr::ListComp(comp) => {
                self.rewrite_expr(&mut comp.elt);
                self.rewrite_comprehensions(&mut comp.generators);
            }
            Expr::SetComp(comp) => {
                self.rewrite_expr(&mut comp.elt);
                self.rewrite_comprehensions(&mut comp.generators);
            }
            Expr::DictComp(comp) => {
                if let Some(key) = &mut comp.key {
                    self.rewrite_expr(key);
                }
                self.rewrite_expr(&mut comp.value);
                self.rewrite_comprehensions(&mut comp.generators);
            }
            Expr::Generator(generator) => {
                self.rewrite_expr(&mut generator.elt);
                self.rewrite_comprehensions(&mut generator.generators);
            }
            Expr::Yield(yield_expr) => {
                if let Some(value) = &mut yield_expr.value {
                    self.rewrite_expr(value);
                }
            }
            Expr::YieldFrom(yield_from) => self.rewrite_expr(&mut yield_from.value),
            Expr::Compare(compare) => {
                self.rewrite_expr(&mut compare.left);
                for comparator in compare.comparators.iter_mut() {
                    self.rewrite_expr(comparator);
                }
            }
            Expr::Attribute(attribute) => self.rewrite_expr(&mut attribute.value),
            Expr::Subscript(subscript) => {
                self.rewrite_expr(&mut subscript.value);
                self.rewrite_expr(&mut subscript.slice);
            }
            Expr::Starred(starred) => self.rewrite_expr(&mut starred.value),
            Expr::List(list) => {
                for elt in &mut list.elts {
                    self.rewrite_expr(elt);
                }
            }
            Expr::Tuple(tuple) => {
                for elt in &mut tuple.elts {
                    self.rewrite_expr(elt);
                }
            }
            Expr::Slice(slice) => {
                if let Some(lower) = &mut slice.lower {
                    self.rewrite_expr(lower);
                }
                if let Some(upper) = &mut slice.upper {
                    self.rewrite_expr(upper);
                }
                if let Some(step) = &mut slice.step {
                    self.rewrite_expr(step);
                }
            }
            // Interpolated strings are left untouched; the sandbox has no
            // awaitable call surface inside them (see DESIGN.md).
            Expr::FString(_)
            | Expr::TString(_)
            | Expr::Name(_)
            | Expr::StringLiteral(_)
            | Expr::BytesLiteral(_)
            | Expr::NumberLiteral(_)
            | Expr::BooleanLiteral(_)
            | Expr::NoneLiteral(_)
            | Expr::EllipsisLiteral(_)
            | Expr::IpyEscapeCommand(_) => {}
        }
    }

    fn rewrite_comprehensions(&mut self, generators: &mut [ast::Comprehension]) {
        for comprehension in generators {
            self.rewrite_expr(&mut comprehension.target);
            self.rewrite_expr(&mut comprehension.iter);
            for condition in &mut comprehension.ifs {
                self.rewrite_expr(condition);
            }
        }
    }

    fn rewrite_call_parts(&mut self, call: &mut ast::ExprCall) {
        self.rewrite_expr(&mut call.func);
        for arg in call.arguments.args.iter_mut() {
            self.rewrite_expr(arg);
        }
        for keyword in call.arguments.keywords.iter_mut() {
            self.rewrite_expr(&mut keyword.value);
        }
    }

    fn rewrite_call(&mut self, expr: &mut Expr) {
        let Expr::Call(call) = expr else { return };
        self.rewrite_call_parts(call);
        if self.scopes.at_root() {
            // Module-level statements belong to the harness, which drives
            // the entry coroutine itself.
            return;
        }
        let scope = self.scopes.current();
        let should_await = if self.scopes.is_await_site(scope, call.range().start()) {
            true
        } else if let Some(name) = callee_name(&call.func)
            && let Some(callee) = self.scopes.resolve(name)
            && self.scopes.needs_async(callee)
        {
            true
        } else {
            false
        };
        if should_await {
            self.scopes.mark_needs_async(scope);
            self.wrap_in_await(expr);
        }
    }

    fn wrap_in_await(&mut self, expr: &mut Expr) {
        let range = expr.range();
        let placeholder = Expr::NoneLiteral(ast::ExprNoneLiteral {
            node_index: Default::default(),
            range,
        });
        let inner = std::mem::replace(expr, placeholder);
        *expr = Expr::Await(ast::ExprAwait {
            node_index: Default::default(),
            range,
            value: Box::new(inner),
        });
        self.stats.awaited_calls += 1;
    }
}

/// Name a call target resolves under: a bare name directly, a method call by
/// its final attribute segment.
fn callee_name(func: &Expr) -> Option<&str> {
    match func {
        Expr::Name(name) => Some(name.id.as_str()),
        Expr::Attribute(attribute) => Some(attribute.attr.as_str()),
        _ => None,
    }
}
