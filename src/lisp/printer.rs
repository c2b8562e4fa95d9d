// KESTREL, a small Lisp runtime.

// SPDX-FileCopyrightText: © 2021 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// KESTREL is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/lisp/printer.rs

// Renders values back to text. Everything except functions and
// frames prints in a form the reader accepts.

// <>

use super::types::{Obj, Ref, NIL, TRUE, UNBOUND};
use super::Interp;

use std::fmt;

/// Pairs a value with the interpreter holding it, for display
pub struct Show<'a> {
    it: &'a Interp,
    val: Ref,
}

impl fmt::Display for Show<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let it = self.it;
        match self.val {
            NIL => write!(f, "nil"),
            TRUE => write!(f, "true"),
            UNBOUND => write!(f, "<unbound>"),
            v if v.fixnum_p() => write!(f, "{}", v.fixnum_get()),
            v if it.cons_p(v) => fmt_list(it, v, f),
            v => match it.reg.get(v) {
                Obj::String(bytes) => write!(f, "\"{}\"", String::from_utf8_lossy(bytes)),
                Obj::Symbol { name, .. } => write!(f, "{}", name),
                Obj::Function(func) => write!(
                    f,
                    "<fn arity:{} rest:{}>",
                    func.arity,
                    if func.rest { "YES" } else { "NO" }
                ),
                Obj::Cont(_) => write!(f, "<continuation>"),
                Obj::Cons { .. } | Obj::Moved => unreachable!(),
            },
        }
    }
}

/// Prints the spine iteratively so long lists don't deepen the stack
fn fmt_list(it: &Interp, mut list: Ref, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "(")?;
    loop {
        write!(f, "{}", it.show(it.car_unchecked(list)))?;
        list = it.cdr_unchecked(list);

        if list == NIL {
            break;
        }
        if !it.cons_p(list) {
            write!(f, " . {}", it.show(list))?;
            break;
        }
        write!(f, " ")?;
    }
    write!(f, ")")
}

impl Interp {
    pub fn show(&self, val: Ref) -> Show<'_> {
        Show { it: self, val }
    }

    pub fn print(&self, val: Ref) -> String {
        self.show(val).to_string()
    }
}
