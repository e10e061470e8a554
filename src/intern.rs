//! String interning.
//!
//! Every identifier, keyword and literal lexeme is canonicalized into a
//! [`Symbol`] so that equality checks reduce to a single integer comparison.

use std::collections::HashMap;

/// Handle to an interned string. Two symbols are equal iff the byte
/// sequences they were interned from are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(u32);

impl Symbol {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Default)]
pub struct Interner {
    map: HashMap<String, Symbol>,
    vec: Vec<String>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.map.get(s) {
            return sym;
        }
        let sym = Symbol(self.vec.len() as u32);
        self.vec.push(s.to_owned());
        self.map.insert(s.to_owned(), sym);
        sym
    }

    pub fn resolve(&self, sym: Symbol) -> &str {
        &self.vec[sym.index()]
    }

    /// Look up an existing interned string without creating a new entry.
    pub fn lookup(&self, s: &str) -> Option<Symbol> {
        self.map.get(s).copied()
    }

    pub fn len(&self) -> usize {
        self.vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vec.is_empty()
    }
}

/// Pre-interned symbols for every keyword of the language, handed to each
/// stage so keyword checks are plain symbol comparisons.
///
/// `null`, `true`, `false` and `main` are not keywords, but the parser and
/// linker need their symbols for the same reason.
#[derive(Debug)]
pub struct Keywords {
    pub struct_: Symbol,
    pub defn: Symbol,
    pub decl: Symbol,
    pub pub_: Symbol,
    pub load: Symbol,
    pub let_: Symbol,
    pub if_: Symbol,
    pub elif: Symbol,
    pub else_: Symbol,
    pub for_: Symbol,
    pub to: Symbol,
    pub while_: Symbol,
    pub return_: Symbol,
    pub set: Symbol,
    pub deref: Symbol,
    pub addr: Symbol,
    pub at: Symbol,
    pub int: Symbol,
    pub i8_: Symbol,
    pub i16_: Symbol,
    pub i32_: Symbol,
    pub i64_: Symbol,
    pub u8_: Symbol,
    pub u16_: Symbol,
    pub u32_: Symbol,
    pub u64_: Symbol,
    pub char_: Symbol,
    pub bool_: Symbol,
    pub void: Symbol,
    pub null: Symbol,
    pub true_: Symbol,
    pub false_: Symbol,
    pub main: Symbol,
    primitives: Vec<Symbol>,
}

impl Keywords {
    pub fn new(interner: &mut Interner) -> Self {
        let mut kw = Self {
            struct_: interner.intern("struct"),
            defn: interner.intern("defn"),
            decl: interner.intern("decl"),
            pub_: interner.intern("pub"),
            load: interner.intern("load"),
            let_: interner.intern("let"),
            if_: interner.intern("if"),
            elif: interner.intern("elif"),
            else_: interner.intern("else"),
            for_: interner.intern("for"),
            to: interner.intern("to"),
            while_: interner.intern("while"),
            return_: interner.intern("return"),
            set: interner.intern("set"),
            deref: interner.intern("deref"),
            addr: interner.intern("addr"),
            at: interner.intern("at"),
            int: interner.intern("int"),
            i8_: interner.intern("i8"),
            i16_: interner.intern("i16"),
            i32_: interner.intern("i32"),
            i64_: interner.intern("i64"),
            u8_: interner.intern("u8"),
            u16_: interner.intern("u16"),
            u32_: interner.intern("u32"),
            u64_: interner.intern("u64"),
            char_: interner.intern("char"),
            bool_: interner.intern("bool"),
            void: interner.intern("void"),
            null: interner.intern("null"),
            true_: interner.intern("true"),
            false_: interner.intern("false"),
            main: interner.intern("main"),
            primitives: vec![],
        };
        kw.primitives = vec![
            kw.int, kw.i8_, kw.i16_, kw.i32_, kw.i64_, kw.u8_, kw.u16_, kw.u32_, kw.u64_,
            kw.char_, kw.bool_, kw.void,
        ];
        kw
    }

    pub fn is_primitive(&self, sym: Symbol) -> bool {
        self.primitives.contains(&sym)
    }

    pub fn is_operator_keyword(&self, sym: Symbol) -> bool {
        sym == self.set || sym == self.deref || sym == self.addr || sym == self.at
    }
}
