// KESTREL, a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// KESTREL is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/lisp/symtab.rs

// A table to associate symbol names with their unique symbol objects.

// <>

use super::types::Ref;

use rustc_hash::FxHashMap;

/// Per interpreter symbol table; entries are never removed
///
/// The symbol references stored here are collector roots, so they are
/// kept in one dense vector that can be rewritten in place.
pub struct SymbolTable {
    by_name: FxHashMap<Box<str>, usize>,
    syms: Vec<Ref>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            by_name: FxHashMap::default(),
            syms: Vec::with_capacity(64),
        }
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<Ref> {
        self.by_name.get(name).map(|&idx| self.syms[idx])
    }

    pub fn insert(&mut self, name: &str, sym: Ref) {
        assert!(!self.by_name.contains_key(name), "symbol interned twice");
        self.by_name.insert(Box::from(name), self.syms.len());
        self.syms.push(sym);
    }

    pub fn len(&self) -> usize {
        self.syms.len()
    }

    pub fn refs(&self) -> impl Iterator<Item = Ref> + '_ {
        self.syms.iter().copied()
    }

    pub fn refs_mut(&mut self) -> impl Iterator<Item = &mut Ref> {
        self.syms.iter_mut()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lisp::types::LowTag;

    #[test]
    fn a_test() {
        let mut tab = SymbolTable::new();
        let sym = Ref::pointer(4, LowTag::Other);

        tab.insert("testsym", sym);

        assert!(tab.lookup_by_name("nothere").is_none());
        assert_eq!(tab.lookup_by_name("testsym"), Some(sym));
        assert_eq!(tab.len(), 1);
    }

    #[test]
    fn manysym() {
        let mut tab = SymbolTable::new();

        // generates symbols a00 - z99
        for i in 0..2600 {
            let name = format!("{}{:02}", (b'a' + (i / 100) as u8) as char, i % 100);
            tab.insert(&name, Ref::pointer(i, LowTag::Other));
        }

        assert_eq!(tab.len(), 2600);
        assert_eq!(tab.lookup_by_name("m13"), Some(Ref::pointer(1213, LowTag::Other)));
        assert_eq!(tab.lookup_by_name("g92"), Some(Ref::pointer(692, LowTag::Other)));
    }

    #[test]
    fn relocation() {
        let mut tab = SymbolTable::new();
        tab.insert("sea", Ref::pointer(1, LowTag::Other));
        tab.insert("mesa", Ref::pointer(2, LowTag::Other));

        for (i, slot) in tab.refs_mut().enumerate() {
            *slot = Ref::pointer(100 + i, LowTag::Other);
        }

        assert_eq!(tab.lookup_by_name("sea"), Some(Ref::pointer(100, LowTag::Other)));
        assert_eq!(tab.lookup_by_name("mesa"), Some(Ref::pointer(101, LowTag::Other)));
        assert_eq!(tab.refs().count(), 2);
    }

    #[test]
    #[should_panic]
    fn no_duplicates() {
        let mut tab = SymbolTable::new();
        tab.insert("droll", Ref::pointer(1, LowTag::Other));
        tab.insert("droll", Ref::pointer(2, LowTag::Other));
    }
}
