use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::VarDecl;
use crate::intern::Symbol;

/// Lexical scope stack. The bottom frame is the global scope; every function
/// body and every `if`/`elif`/`else`, `for` and `while` body pushes a frame.
#[derive(Debug, Default)]
pub struct Scope {
    stacks: Vec<HashMap<Symbol, Rc<VarDecl>>>,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            stacks: vec![HashMap::new()],
        }
    }

    pub fn enter_scope(&mut self) {
        self.stacks.push(HashMap::new());
    }

    pub fn exit_scope(&mut self) {
        self.stacks.pop();
    }

    pub fn add_variable(&mut self, name: Symbol, decl: Rc<VarDecl>) {
        if let Some(scope) = self.stacks.last_mut() {
            scope.insert(name, decl);
        }
    }

    /// Walk the scope chain from the innermost frame outwards.
    pub fn find_variable(&self, name: Symbol) -> Option<Rc<VarDecl>> {
        self.stacks
            .iter()
            .rev()
            .find_map(|scope| scope.get(&name).cloned())
    }
}
