use std::collections::HashMap;

use super::types::{SequenceId, Value};

/// Variables owned by one sequence. Names are case insensitive.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scope {
    vars: HashMap<String, Value>,
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}

impl Scope {
    pub fn new() -> Scope {
        Scope {
            vars: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(&fold(name))
    }

    pub fn set(&mut self, name: &str, val: Value) {
        self.vars.insert(fold(name), val);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(&fold(name))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Access to the scopes of other sequences for parent fallback lookups.
///
/// Parents are referred to by id and never owned, so a child whose parent
/// has been compacted away simply stops seeing its variables.
pub trait ScopeChain {
    /// The scope of `id` and that sequence's own parent, if it still exists
    fn scope_of(&self, id: SequenceId) -> Option<(&Scope, Option<SequenceId>)>;
}

/// Resolve `name` in `scope`, then along the parent chain starting at `parent`
pub fn lookup<'a>(
    scope: &'a Scope,
    parent: Option<SequenceId>,
    chain: &'a dyn ScopeChain,
    name: &str,
) -> Option<&'a Value> {
    if let Some(val) = scope.get(name) {
        return Some(val);
    }
    let mut next = parent;
    while let Some(id) = next {
        let (scope, parent) = chain.scope_of(id)?;
        if let Some(val) = scope.get(name) {
            return Some(val);
        }
        next = parent;
    }
    None
}
