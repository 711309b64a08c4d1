//! Lexical scope tracking shared by the checker and rewriter passes.
//!
//! Scopes live in an arena and are addressed by integer handles; each scope
//! stores its parent's handle, so walking outward for name resolution never
//! needs owning back-references. Children are created strictly during
//! descent, which keeps the structure acyclic by construction.

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;
use ruff_text_size::TextSize;

/// Handle of a scope in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ScopeId(u32);

impl ScopeId {
    const ROOT: Self = Self(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One lexical function-definition level.
#[derive(Debug, Default)]
struct Scope {
    /// Enclosing scope handle; `None` only for the module-level root.
    parent: Option<ScopeId>,
    /// True once any statement inside requires asynchronous execution.
    needs_async: bool,
    /// Start offsets of call expressions that must be awaited.
    await_sites: AHashSet<TextSize>,
    /// Declared parameters, in positional order, mapped to their declared
    /// type names.
    params: IndexMap<String, String>,
    /// Child scopes keyed by function name.
    children: AHashMap<String, ScopeId>,
}

/// Arena of scopes with a traversal cursor.
///
/// The checker builds the tree while validating; the rewriter walks the same
/// function definitions again, so [`ScopeTree::enter`] is idempotent per name
/// and [`ScopeTree::rewind`] resets the cursor between the two passes.
#[derive(Debug)]
pub(crate) struct ScopeTree {
    scopes: Vec<Scope>,
    current: ScopeId,
}

impl ScopeTree {
    pub(crate) fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
            current: ScopeId::ROOT,
        }
    }

    /// Handle of the scope the cursor is in.
    pub(crate) fn current(&self) -> ScopeId {
        self.current
    }

    /// True when the cursor sits at module level.
    pub(crate) fn at_root(&self) -> bool {
        self.current == ScopeId::ROOT
    }

    /// Enters the child scope `name`, creating it on first encounter.
    pub(crate) fn enter(&mut self, name: &str) -> ScopeId {
        if let Some(&child) = self.scopes[self.current.index()].children.get(name) {
            self.current = child;
            return child;
        }
        let id = ScopeId(u32::try_from(self.scopes.len()).expect("scope arena exceeds u32"));
        self.scopes.push(Scope {
            parent: Some(self.current),
            ..Scope::default()
        });
        self.scopes[self.current.index()].children.insert(name.to_owned(), id);
        self.current = id;
        id
    }

    /// Moves the cursor back to the enclosing scope.
    ///
    /// Must never be called with the cursor on the root scope.
    pub(crate) fn exit(&mut self) {
        self.current = self.scopes[self.current.index()]
            .parent
            .expect("exit called on the root scope");
    }

    /// Resets the cursor to the root, ready for the rewriter pass.
    pub(crate) fn rewind(&mut self) {
        self.current = ScopeId::ROOT;
    }

    /// Resolves a function name against the current scope's children, then
    /// outward through enclosing scopes.
    ///
    /// This approximates Python's lexical lookup closely enough for
    /// call-graph discovery; it does not model closures capturing names
    /// defined later.
    pub(crate) fn resolve(&self, name: &str) -> Option<ScopeId> {
        let mut scope = Some(self.current);
        while let Some(id) = scope {
            if let Some(&child) = self.scopes[id.index()].children.get(name) {
                return Some(child);
            }
            scope = self.scopes[id.index()].parent;
        }
        None
    }

    /// True iff the scope is nested two or more levels below module level,
    /// i.e. inside the user's snippet rather than the synthetic entry.
    pub(crate) fn is_user_defined(&self, id: ScopeId) -> bool {
        self.scopes[id.index()]
            .parent
            .and_then(|parent| self.scopes[parent.index()].parent)
            .is_some()
    }

    /// True when the cursor is inside a user-defined scope.
    pub(crate) fn in_user_code(&self) -> bool {
        self.is_user_defined(self.current)
    }

    pub(crate) fn needs_async(&self, id: ScopeId) -> bool {
        self.scopes[id.index()].needs_async
    }

    pub(crate) fn mark_needs_async(&mut self, id: ScopeId) {
        self.scopes[id.index()].needs_async = true;
    }

    /// Records a call expression that must be awaited.
    pub(crate) fn add_await_site(&mut self, id: ScopeId, offset: TextSize) {
        self.scopes[id.index()].await_sites.insert(offset);
    }

    pub(crate) fn is_await_site(&self, id: ScopeId, offset: TextSize) -> bool {
        self.scopes[id.index()].await_sites.contains(&offset)
    }

    /// Stores the declared parameters of a function scope.
    pub(crate) fn set_params(&mut self, id: ScopeId, params: IndexMap<String, String>) {
        self.scopes[id.index()].params = params;
    }

    /// Declared type of the parameter at a positional slot, with its name.
    pub(crate) fn param_at(&self, id: ScopeId, slot: usize) -> Option<(&str, &str)> {
        self.scopes[id.index()]
            .params
            .get_index(slot)
            .map(|(name, ty)| (name.as_str(), ty.as_str()))
    }

    /// Declared type of a parameter looked up by name.
    pub(crate) fn param_type(&self, id: ScopeId, name: &str) -> Option<&str> {
        self.scopes[id.index()].params.get(name).map(String::as_str)
    }

    /// True if `name` is a client-typed parameter of the current scope or of
    /// any enclosing scope.
    pub(crate) fn client_param_in_chain(&self, name: &str, client_type: &str) -> bool {
        let mut scope = Some(self.current);
        while let Some(id) = scope {
            if let Some(ty) = self.scopes[id.index()].params.get(name) {
                return ty == client_type;
            }
            scope = self.scopes[id.index()].parent;
        }
        false
    }
}
