//! The policy checker: a single depth-first pass over the wrapped program
//! that enforces the action sandbox rules while populating the scope tree
//! with the call sites the rewriter must await.
//!
//! Checking is fail-fast. The first broken rule aborts the traversal with an
//! [`ActionError`] naming the rule; nothing is batched or recovered.

use indexmap::IndexMap;
use ruff_python_ast::{self as ast, Expr, Stmt};
use ruff_text_size::{Ranged, TextRange};

use crate::{
    error::ActionError,
    loc::{CodeLoc, LineIndex},
    scope::ScopeTree,
    surface::{ACTION_FUNCTION, ASYNC_MODULE, CLIENT_CLASS, CLIENT_VARIABLE, ClientCapability, SDK_PACKAGE},
};

/// Validates the wrapped module and records await sites into `scopes`.
pub(crate) fn check(module: &ast::ModModule, index: &LineIndex, scopes: &mut ScopeTree) -> Result<(), ActionError> {
    let mut checker = Checker {
        scopes,
        index,
        in_class: false,
        action_found: false,
        client_imported: false,
        client_bound: false,
    };
    checker.check_stmts(&module.body)?;
    if !checker.action_found {
        return Err(ActionError::violation("Action function is not defined"));
    }
    if !checker.client_imported {
        return Err(ActionError::violation(
            "The Client class is never imported from the shimoku package",
        ));
    }
    Ok(())
}

struct Checker<'a> {
    scopes: &'a mut ScopeTree,
    index: &'a LineIndex,
    /// True while traversing a class body (including method bodies).
    in_class: bool,
    action_found: bool,
    client_imported: bool,
    client_bound: bool,
}

impl Checker<'_> {
    fn loc(&self, range: TextRange) -> CodeLoc {
        self.index.locate(range.start())
    }

    fn check_stmts(&mut self, stmts: &[Stmt]) -> Result<(), ActionError> {
        for stmt in stmts {
            self.check_stmt(stmt)?;
        }
        Ok(())
    }

    fn check_stmt(&mut self, stmt: &Stmt) -> Result<(), ActionError> {
        match stmt {
            Stmt::FunctionDef(def) => self.check_function_def(def),
            Stmt::ClassDef(class) => {
                for decorator in &class.decorator_list {
                    self.check_expr(&decorator.expression)?;
                }
                if let Some(arguments) = &class.arguments {
                    for base in arguments.args.iter() {
                        self.check_expr(base)?;
                    }
                    for keyword in arguments.keywords.iter() {
                        self.check_expr(&keyword.value)?;
                    }
                }
                let enclosing = self.in_class;
                self.in_class = true;
                let result = self.check_stmts(&class.body);
                self.in_class = enclosing;
                result
            }
            Stmt::Return(ret) => {
                if let Some(value) = &ret.value {
                    if let Expr::Name(name) = &**value
                        && name.id.as_str() == CLIENT_VARIABLE
                    {
                        return Err(ActionError::violation_at(
                            "Cannot return the client instance",
                            self.loc(ret.range()),
                        ));
                    }
                    self.check_expr(value)?;
                }
                Ok(())
            }
            Stmt::Assign(assign) => {
                self.check_expr(&assign.value)?;
                for target in &assign.targets {
                    self.check_binding(target, &assign.value)?;
                    if !matches!(target, Expr::Name(_)) {
                        self.check_expr(target)?;
                    }
                }
                Ok(())
            }
            Stmt::AugAssign(aug) => {
                if let Expr::Name(name) = &*aug.target
                    && name.id.as_str() == CLIENT_VARIABLE
                {
                    return Err(ActionError::violation_at(
                        "Cannot assign to the reserved name 'shimoku_client'",
                        self.loc(aug.range()),
                    ));
                }
                self.check_expr(&aug.target)?;
                self.check_expr(&aug.value)
            }
            Stmt::AnnAssign(ann) => {
                self.check_expr(&ann.annotation)?;
                if let Some(value) = &ann.value {
                    self.check_expr(value)?;
                    self.check_binding(&ann.target, value)?;
                }
                if !matches!(&*ann.target, Expr::Name(_)) {
                    self.check_expr(&ann.target)?;
                }
                Ok(())
            }
            Stmt::TypeAlias(alias) => self.check_expr(&alias.value),
            Stmt::For(for_stmt) => {
                self.check_expr(&for_stmt.iter)?;
                self.check_expr(&for_stmt.target)?;
                self.check_stmts(&for_stmt.body)?;
                self.check_stmts(&for_stmt.orelse)
            }
            Stmt::While(while_stmt) => {
                self.check_expr(&while_stmt.test)?;
                self.check_stmts(&while_stmt.body)?;
                self.check_stmts(&while_stmt.orelse)
            }
            Stmt::If(if_stmt) => {
                self.check_expr(&if_stmt.test)?;
                self.check_stmts(&if_stmt.body)?;
                for clause in &if_stmt.elif_else_clauses {
                    if let Some(test) = &clause.test {
                        self.check_expr(test)?;
                    }
                    self.check_stmts(&clause.body)?;
                }
                Ok(())
            }
            Stmt::With(with_stmt) => {
                for item in &with_stmt.items {
                    self.check_expr(&item.context_expr)?;
                    if let Some(vars) = &item.optional_vars {
                        self.check_expr(vars)?;
                    }
                }
                self.check_stmts(&with_stmt.body)
            }
            Stmt::Match(match_stmt) => {
                self.check_expr(&match_stmt.subject)?;
                for case in &match_stmt.cases {
                    if let Some(guard) = &case.guard {
                        self.check_expr(guard)?;
                    }
                    self.check_stmts(&case.body)?;
                }
                Ok(())
            }
            Stmt::Raise(raise) => {
                if let Some(exc) = &raise.exc {
                    self.check_expr(exc)?;
                }
                if let Some(cause) = &raise.cause {
                    self.check_expr(cause)?;
                }
                Ok(())
            }
            Stmt::Try(try_stmt) => {
                self.check_stmts(&try_stmt.body)?;
                for handler in &try_stmt.handlers {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    if let Some(exc_type) = &handler.type_ {
                        self.check_expr(exc_type)?;
                    }
                    self.check_stmts(&handler.body)?;
                }
                self.check_stmts(&try_stmt.orelse)?;
                self.check_stmts(&try_stmt.finalbody)
            }
            Stmt::Assert(assert) => {
                self.check_expr(&assert.test)?;
                if let Some(msg) = &assert.msg {
                    self.check_expr(msg)?;
                }
                Ok(())
            }
            Stmt::Import(import) => self.check_import(import),
            Stmt::ImportFrom(import) => self.check_import_from(import),
            Stmt::Delete(delete) => {
                for target in &delete.targets {
                    self.check_expr(target)?;
                }
                Ok(())
            }
            Stmt::Expr(expr) => self.check_expr(&expr.value),
            Stmt::Global(_)
            | Stmt::Nonlocal(_)
            | Stmt::Pass(_)
            | Stmt::Break(_)
            | Stmt::Continue(_)
            | Stmt::IpyEscapeCommand(_) => Ok(()),
        }
    }

    /// Imports of the concurrency module are the harness's privilege; user
    /// code (anything below module level) may not take a reference to it.
    fn check_import(&mut self, import: &ast::StmtImport) -> Result<(), ActionError> {
        if self.scopes.at_root() {
            return Ok(());
        }
        for alias in &import.names {
            if alias.name.as_str().contains(ASYNC_MODULE) {
                return Err(ActionError::violation_at(
                    "Cannot import asyncio module",
                    self.loc(alias.range()),
                ));
            }
        }
        Ok(())
    }

    fn check_import_from(&mut self, import: &ast::StmtImportFrom) -> Result<(), ActionError> {
        let module = import.module.as_ref().map_or("", ast::Identifier::as_str);
        if !self.scopes.at_root() && module.contains(ASYNC_MODULE) {
            return Err(ActionError::violation_at(
                "Cannot import from asyncio module",
                self.loc(import.range()),
            ));
        }
        let root = module.split('.').next().unwrap_or_default();
        if root == SDK_PACKAGE {
            for alias in &import.names {
                if alias.asname.is_some() {
                    return Err(ActionError::violation_at(
                        format!("Cannot rename '{}' imported from the shimoku package", alias.name.as_str()),
                        self.loc(alias.range()),
                    ));
                }
                if alias.name.as_str() == CLIENT_CLASS {
                    self.client_imported = true;
                }
            }
        }
        Ok(())
    }

    /// Enforces the single-binding and reserved-name rules for one
    /// assignment target.
    fn check_binding(&mut self, target: &Expr, value: &Expr) -> Result<(), ActionError> {
        let Expr::Name(name) = target else {
            return Ok(());
        };
        if self.is_client_value(value) {
            if self.client_bound {
                return Err(ActionError::violation_at(
                    "Cannot create a second client instance",
                    self.loc(target.range()),
                ));
            }
            if name.id.as_str() != CLIENT_VARIABLE {
                return Err(ActionError::violation_at(
                    format!(
                        "The client instance must be assigned to 'shimoku_client', not '{}'",
                        name.id.as_str()
                    ),
                    self.loc(target.range()),
                ));
            }
            self.client_bound = true;
        } else if name.id.as_str() == CLIENT_VARIABLE {
            return Err(ActionError::violation_at(
                "Cannot assign to the reserved name 'shimoku_client'",
                self.loc(target.range()),
            ));
        }
        Ok(())
    }

    /// True for expressions that produce or reference the client instance.
    fn is_client_value(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Call(call) => {
                matches!(&*call.func, Expr::Name(name) if name.id.as_str() == CLIENT_CLASS)
            }
            Expr::Name(name) => self.is_client_name(name.id.as_str()),
            _ => false,
        }
    }

    /// True if `name` denotes the client: either the reserved variable or a
    /// parameter declared with the bare client type in an enclosing scope.
    fn is_client_name(&self, name: &str) -> bool {
        name == CLIENT_VARIABLE || self.scopes.client_param_in_chain(name, CLIENT_CLASS)
    }

    fn check_function_def(&mut self, def: &ast::StmtFunctionDef) -> Result<(), ActionError> {
        // Decorators and parameter defaults evaluate in the enclosing scope.
        for decorator in &def.decorator_list {
            self.check_expr(&decorator.expression)?;
        }
        for param in non_variadic_params(&def.parameters) {
            if let Some(default) = &param.default {
                self.check_expr(default)?;
            }
        }

        if def.is_async && !self.scopes.at_root() {
            return Err(ActionError::violation_at(
                "Async functions are not allowed in action code",
                self.loc(def.name.range()),
            ));
        }

        let name = def.name.as_str();
        if name == ACTION_FUNCTION {
            self.validate_action_signature(def)?;
            self.action_found = true;
        }

        let scope = self.scopes.enter(name);
        // Declared types are recorded up front so the body can recognize
        // client-typed parameters; validation follows the body.
        let mut params = IndexMap::new();
        for param in non_variadic_params(&def.parameters) {
            let param_name = param.parameter.name.as_str();
            let declared = match param.parameter.annotation.as_deref() {
                Some(annotation) => annotation_name(annotation),
                // The action entry's client parameter may omit its annotation.
                None if name == ACTION_FUNCTION && param_name == CLIENT_VARIABLE => CLIENT_CLASS.to_owned(),
                None => String::new(),
            };
            params.insert(param_name.to_owned(), declared);
        }
        self.scopes.set_params(scope, params);
        self.check_stmts(&def.body)?;
        if self.scopes.is_user_defined(scope) {
            for param in non_variadic_params(&def.parameters) {
                self.validate_param(
                    name,
                    param.parameter.name.as_str(),
                    param.parameter.annotation.as_deref(),
                    param.range(),
                )?;
            }
        }
        self.scopes.exit();
        Ok(())
    }

    /// Validates the shape of the single `action(shimoku_client)` entry.
    fn validate_action_signature(&self, def: &ast::StmtFunctionDef) -> Result<(), ActionError> {
        let loc = self.loc(def.name.range());
        if self.in_class {
            return Err(ActionError::violation_at(
                "Action function cannot be defined inside a class",
                loc,
            ));
        }
        if self.scopes.in_user_code() {
            return Err(ActionError::violation_at(
                "Action function cannot be nested inside another function",
                loc,
            ));
        }
        if self.action_found {
            return Err(ActionError::violation_at("Action function can only be defined once", loc));
        }
        let parameters = &def.parameters;
        let positional = parameters.posonlyargs.len() + parameters.args.len();
        if positional != 1
            || !parameters.kwonlyargs.is_empty()
            || parameters.vararg.is_some()
            || parameters.kwarg.is_some()
        {
            return Err(ActionError::violation_at(
                "Action function must take exactly one parameter",
                loc,
            ));
        }
        let param = parameters
            .posonlyargs
            .first()
            .or_else(|| parameters.args.first())
            .expect("one positional parameter is present");
        if param.parameter.name.as_str() != CLIENT_VARIABLE {
            return Err(ActionError::violation_at(
                "Action function parameter must be named 'shimoku_client'",
                loc,
            ));
        }
        if let Some(annotation) = &param.parameter.annotation
            && !is_client_annotation(annotation)
        {
            return Err(ActionError::violation_at(
                "Action function parameter must be annotated with 'Client'",
                loc,
            ));
        }
        Ok(())
    }

    /// Per-parameter annotation rules for user-defined functions.
    fn validate_param(
        &self,
        fn_name: &str,
        param_name: &str,
        annotation: Option<&Expr>,
        range: TextRange,
    ) -> Result<(), ActionError> {
        if param_name == "self" && self.in_class {
            return Ok(());
        }
        let loc = self.index.locate(range.start());
        let Some(annotation) = annotation else {
            if fn_name == ACTION_FUNCTION && param_name == CLIENT_VARIABLE {
                return Ok(());
            }
            return Err(ActionError::violation_at(
                format!("Parameter '{param_name}' of function '{fn_name}' must have a type annotation"),
                loc,
            ));
        };
        if matches!(annotation, Expr::Subscript(_)) && annotation_mentions_client(annotation) {
            return Err(ActionError::violation_at(
                format!(
                    "Parameter '{param_name}' of function '{fn_name}' cannot embed 'Client' in a generic type; \
                     annotate it as 'Client' directly"
                ),
                loc,
            ));
        }
        if param_name == CLIENT_VARIABLE && !is_client_annotation(annotation) {
            return Err(ActionError::violation_at(
                format!("Parameter 'shimoku_client' of function '{fn_name}' must be annotated with 'Client'"),
                loc,
            ));
        }
        Ok(())
    }

    fn check_expr(&mut self, expr: &Expr) -> Result<(), ActionError> {
        match expr {
            Expr::BoolOp(bool_op) => {
                for value in &bool_op.values {
                    self.check_expr(value)?;
                }
                Ok(())
            }
            Expr::Named(named) => {
                // A walrus assignment binds like an assignment statement.
                self.check_expr(&named.value)?;
                self.check_binding(&named.target, &named.value)
            }
            Expr::BinOp(bin_op) => {
                self.check_expr(&bin_op.left)?;
                self.check_expr(&bin_op.right)
            }
            Expr::UnaryOp(unary) => self.check_expr(&unary.operand),
            Expr::Lambda(lambda) => {
                if let Some(parameters) = &lambda.parameters {
                    for param in non_variadic_params(parameters) {
                        if let Some(default) = &param.default {
                            self.check_expr(default)?;
                        }
                    }
                }
                self.check_expr(&lambda.body)
            }
            Expr::If(if_expr) => {
                self.check_expr(&if_expr.test)?;
                self.check_expr(&if_expr.body)?;
                self.check_expr(&if_expr.orelse)
            }
            Expr::Dict(dict) => {
                for item in &dict.items {
                    if let Some(key) = &item.key {
                        self.check_expr(key)?;
                    }
                    self.check_expr(&item.value)?;
                }
                Ok(())
            }
            Expr::Set(set) => {
                for elt in &set.elts {
                    self.check_expr(elt)?;
                }
                Ok(())
            }
            Expr::ListComp(comp) => {
                self.check_expr(&comp.elt)?;
                self.check_comprehensions(&comp.generators)
            }
            Expr::SetComp(comp) => {
                self.check_expr(&comp.elt)?;
                self.check_comprehensions(&comp.generators)
            }
            Expr::DictComp(comp) => {
                if let Some(key) = &comp.key {
                    self.check_expr(key)?;
                }
                self.check_expr(&comp.value)?;
                self.check_comprehensions(&comp.generators)
            }
            Expr::Generator(generator) => {
                self.check_expr(&generator.elt)?;
                self.check_comprehensions(&generator.generators)
            }
            Expr::Await(await_expr) => self.check_expr(&await_expr.value),
            Expr::Yield(yield_expr) => {
                if let Some(value) = &yield_expr.value {
                    self.check_expr(value)?;
                }
                Ok(())
            }
            Expr::YieldFrom(yield_from) => self.check_expr(&yield_from.value),
            Expr::Compare(compare) => {
                self.check_expr(&compare.left)?;
                for comparator in compare.comparators.iter() {
                    self.check_expr(comparator)?;
                }
                Ok(())
            }
            Expr::Call(call) => self.check_call(call),
            Expr::FString(fstring) => {
                for part in &fstring.value {
                    if let ast::FStringPart::FString(inner) = part {
                        for element in &inner.elements {
                            if let ast::InterpolatedStringElement::Interpolation(interpolation) = element {
                                self.check_expr(&interpolation.expression)?;
                            }
                        }
                    }
                }
                Ok(())
            }
            Expr::Attribute(attribute) => self.check_expr(&attribute.value),
            Expr::Subscript(subscript) => {
                self.check_expr(&subscript.value)?;
                self.check_expr(&subscript.slice)
            }
            Expr::Starred(starred) => self.check_expr(&starred.value),
            Expr::List(list) => {
                for elt in &list.elts {
                    self.check_expr(elt)?;
                }
                Ok(())
            }
            Expr::Tuple(tuple) => {
                for elt in &tuple.elts {
                    self.check_expr(elt)?;
                }
                Ok(())
            }
            Expr::Slice(slice) => {
                if let Some(lower) = &slice.lower {
                    self.check_expr(lower)?;
                }
                if let Some(upper) = &slice.upper {
                    self.check_expr(upper)?;
                }
                if let Some(step) = &slice.step {
                    self.check_expr(step)?;
                }
                Ok(())
            }
            Expr::TString(_)
            | Expr::Name(_)
            | Expr::StringLiteral(_)
            | Expr::BytesLiteral(_)
            | Expr::NumberLiteral(_)
            | Expr::BooleanLiteral(_)
            | Expr::NoneLiteral(_)
            | Expr::EllipsisLiteral(_)
            | Expr::IpyEscapeCommand(_) => Ok(()),
        }
    }

    fn check_comprehensions(&mut self, generators: &[ast::Comprehension]) -> Result<(), ActionError> {
        for comprehension in generators {
            self.check_expr(&comprehension.target)?;
            self.check_expr(&comprehension.iter)?;
            for condition in &comprehension.ifs {
                self.check_expr(condition)?;
            }
        }
        Ok(())
    }

    fn check_call(&mut self, call: &ast::ExprCall) -> Result<(), ActionError> {
        self.check_expr(&call.func)?;
        for arg in call.arguments.args.iter() {
            self.check_expr(arg)?;
        }
        for keyword in call.arguments.keywords.iter() {
            self.check_expr(&keyword.value)?;
        }

        // Capability calls: client attribute access reaching the backend.
        if !self.scopes.at_root()
            && let Expr::Attribute(attribute) = &*call.func
            && let Some((base, first_attr)) = attribute_chain_base(attribute)
            && self.is_client_name(base)
            && ClientCapability::is_capability(first_attr)
        {
            let scope = self.scopes.current();
            self.scopes.add_await_site(scope, call.range().start());
            self.scopes.mark_needs_async(scope);
        }

        if let Expr::Name(func_name) = &*call.func
            && let Some(callee) = self.scopes.resolve(func_name.id.as_str())
        {
            // Transitive async requirement through a helper visited earlier
            // in source order. Helpers defined after their caller are not
            // propagated here; the rewriter picks up the single-level case
            // from the finalized tree.
            if self.scopes.needs_async(callee) && !self.scopes.at_root() {
                let scope = self.scopes.current();
                self.scopes.mark_needs_async(scope);
            }

            // The client may only flow into parameters declared as `Client`.
            for (slot, arg) in call.arguments.args.iter().enumerate() {
                if self.is_client_value(arg)
                    && let Some((param_name, declared)) = self.scopes.param_at(callee, slot)
                    && declared != CLIENT_CLASS
                {
                    return Err(ActionError::violation_at(
                        format!(
                            "Parameter '{param_name}' of function '{}' receives the client instance and must be \
                             annotated with 'Client', not '{declared}'",
                            func_name.id.as_str()
                        ),
                        self.loc(arg.range()),
                    ));
                }
            }
            for keyword in call.arguments.keywords.iter() {
                if let Some(key) = &keyword.arg
                    && self.is_client_value(&keyword.value)
                    && let Some(declared) = self.scopes.param_type(callee, key.as_str())
                    && declared != CLIENT_CLASS
                {
                    return Err(ActionError::violation_at(
                        format!(
                            "Parameter '{}' of function '{}' receives the client instance and must be annotated \
                             with 'Client', not '{declared}'",
                            key.as_str(),
                            func_name.id.as_str()
                        ),
                        self.loc(keyword.value.range()),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Iterates a function's positional and keyword parameters in declaration
/// order, skipping `*args`/`**kwargs`.
fn non_variadic_params(parameters: &ast::Parameters) -> impl Iterator<Item = &ast::ParameterWithDefault> {
    parameters
        .posonlyargs
        .iter()
        .chain(&parameters.args)
        .chain(&parameters.kwonlyargs)
}

/// Unwraps a chain of attribute accesses down to a plain name.
///
/// For `shimoku_client.plt.line` this returns `("shimoku_client", "plt")`:
/// the base name plus the attribute directly on it, which is the one checked
/// against the capability surface.
fn attribute_chain_base(attribute: &ast::ExprAttribute) -> Option<(&str, &str)> {
    let mut first_attr = attribute.attr.as_str();
    let mut value: &Expr = &attribute.value;
    loop {
        match value {
            Expr::Attribute(inner) => {
                first_attr = inner.attr.as_str();
                value = &inner.value;
            }
            Expr::Name(name) => return Some((name.id.as_str(), first_attr)),
            _ => return None,
        }
    }
}

/// True for the bare client annotation, written directly or as a string.
fn is_client_annotation(annotation: &Expr) -> bool {
    match annotation {
        Expr::Name(name) => name.id.as_str() == CLIENT_CLASS,
        Expr::StringLiteral(literal) => literal.value.to_str() == CLIENT_CLASS,
        _ => false,
    }
}

/// True if the client type name appears anywhere inside the annotation.
fn annotation_mentions_client(annotation: &Expr) -> bool {
    match annotation {
        Expr::Name(name) => name.id.as_str() == CLIENT_CLASS,
        Expr::StringLiteral(literal) => literal.value.to_str() == CLIENT_CLASS,
        Expr::Attribute(attribute) => {
            attribute.attr.as_str() == CLIENT_CLASS || annotation_mentions_client(&attribute.value)
        }
        Expr::Subscript(subscript) => {
            annotation_mentions_client(&subscript.value) || annotation_mentions_client(&subscript.slice)
        }
        Expr::BinOp(bin_op) => annotation_mentions_client(&bin_op.left) || annotation_mentions_client(&bin_op.right),
        Expr::Tuple(tuple) => tuple.elts.iter().any(annotation_mentions_client),
        Expr::List(list) => list.elts.iter().any(annotation_mentions_client),
        _ => false,
    }
}

/// Renders an annotation expression as the type name used in messages and
/// parameter tables.
fn annotation_name(annotation: &Expr) -> String {
    match annotation {
        Expr::Name(name) => name.id.to_string(),
        Expr::Attribute(attribute) => {
            format!("{}.{}", annotation_name(&attribute.value), attribute.attr.as_str())
        }
        Expr::Subscript(subscript) => {
            format!(
                "{}[{}]",
                annotation_name(&subscript.value),
                annotation_name(&subscript.slice)
            )
        }
        Expr::Tuple(tuple) => {
            let parts: Vec<String> = tuple.elts.iter().map(annotation_name).collect();
            parts.join(", ")
        }
        Expr::BinOp(bin_op) => {
            format!(
                "{} | {}",
                annotation_name(&bin_op.left),
                annotation_name(&bin_op.right)
            )
        }
        Expr::StringLiteral(literal) => literal.value.to_str().to_owned(),
        Expr::NoneLiteral(_) => "None".to_owned(),
        _ => "?".to_owned(),
    }
}
