// KESTREL, a small Lisp runtime.

// SPDX-FileCopyrightText: © 2021 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// KESTREL is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/lisp/core.rs

// Object model. Constructors, predicates, and accessors for every
// heap object kind, plus lexical closures and fixnum arithmetic.
// Accessors used by language code return typed errors; internal ones
// assert their preconditions.

// <>

use super::types::*;
use super::{Error, Interp};

impl Interp {
    // ***********************************
    // * Constructors
    // ***********************************

    pub fn cons(&mut self, car: Ref, cdr: Ref) -> Ref {
        self.alloc(Obj::Cons { car, cdr })
    }

    pub fn string(&mut self, bytes: &[u8]) -> Ref {
        self.alloc(Obj::String(Box::from(bytes)))
    }

    /// Returns the unique symbol with this name, creating it if needed
    pub fn intern(&mut self, name: &str) -> Ref {
        if let Some(sym) = self.symtab.lookup_by_name(name) {
            return sym;
        }

        let sym = self.alloc(Obj::Symbol {
            value: UNBOUND,
            function: UNBOUND,
            name: Box::from(name),
        });
        self.symtab.insert(name, sym);

        if cfg!(feature = "memdbg") {
            log::debug!("interned {name} as {:?}", sym);
        }

        sym
    }

    pub(crate) fn function(&mut self, func: Function) -> Ref {
        self.alloc(Obj::Function(func))
    }

    /// Builds a builtin function object around native code
    pub fn builtin(&mut self, code: NativeFn, arity: u16, rest: bool) -> Ref {
        self.function(Function {
            kind: FnKind::Builtin,
            arity,
            rest,
            code: Code::Native(code),
        })
    }

    pub(crate) fn lambda(
        &mut self,
        formals: Ref,
        body: Ref,
        closure: Ref,
        arity: u16,
        rest: bool,
    ) -> Ref {
        self.function(Function {
            kind: FnKind::Lambda,
            arity,
            rest,
            code: Code::Lambda {
                formals,
                body,
                closure,
            },
        })
    }

    // ***********************************
    // * Predicates
    // ***********************************

    #[inline(always)]
    pub fn cons_p(&self, val: Ref) -> bool {
        val.low_tag() == Some(LowTag::List)
    }

    #[inline(always)]
    pub fn function_p(&self, val: Ref) -> bool {
        val.low_tag() == Some(LowTag::Function)
    }

    #[inline(always)]
    pub fn cont_p(&self, val: Ref) -> bool {
        val.low_tag() == Some(LowTag::Continuation)
    }

    #[inline(always)]
    pub fn symbol_p(&self, val: Ref) -> bool {
        val.low_tag() == Some(LowTag::Other)
            && self.reg.get(val).widetag() == Some(Widetag::Symbol)
    }

    #[inline(always)]
    pub fn string_p(&self, val: Ref) -> bool {
        val.low_tag() == Some(LowTag::Other)
            && self.reg.get(val).widetag() == Some(Widetag::String)
    }

    /// Determines whether a value is a proper list
    pub fn list_p(&self, mut val: Ref) -> bool {
        while self.cons_p(val) {
            val = self.cdr_unchecked(val);
        }
        val == NIL
    }

    pub fn macro_p(&self, val: Ref) -> bool {
        self.function_p(val) && self.function_get(val).kind == FnKind::Macro
    }

    // ***********************************
    // * Lists
    // ***********************************

    /// First element of a list; nil for nil
    pub fn car(&self, val: Ref) -> Result<Ref, Error> {
        match val {
            NIL => Ok(NIL),
            v if self.cons_p(v) => Ok(self.car_unchecked(v)),
            _ => Err(Error::NotAList),
        }
    }

    /// Rest of a list; nil for nil
    pub fn cdr(&self, val: Ref) -> Result<Ref, Error> {
        match val {
            NIL => Ok(NIL),
            v if self.cons_p(v) => Ok(self.cdr_unchecked(v)),
            _ => Err(Error::NotAList),
        }
    }

    #[inline(always)]
    pub(crate) fn car_unchecked(&self, cell: Ref) -> Ref {
        match self.reg.get(cell) {
            Obj::Cons { car, .. } => *car,
            _ => panic!("car of non-cons {:?}", cell),
        }
    }

    #[inline(always)]
    pub(crate) fn cdr_unchecked(&self, cell: Ref) -> Ref {
        match self.reg.get(cell) {
            Obj::Cons { cdr, .. } => *cdr,
            _ => panic!("cdr of non-cons {:?}", cell),
        }
    }

    pub(crate) fn set_cdr(&mut self, cell: Ref, val: Ref) {
        match self.reg.get_mut(cell) {
            Obj::Cons { cdr, .. } => *cdr = val,
            _ => panic!("set_cdr of non-cons {:?}", cell),
        }
    }

    /// Counts the elements of a proper list
    pub fn length(&self, mut list: Ref) -> Result<usize, Error> {
        let mut len = 0;
        while list != NIL {
            if !self.cons_p(list) {
                return Err(Error::NotAList);
            }
            len += 1;
            list = self.cdr_unchecked(list);
        }
        Ok(len)
    }

    // ***********************************
    // * Symbols, strings, functions
    // ***********************************

    pub fn symbol_name(&self, sym: Ref) -> Result<&str, Error> {
        if !self.symbol_p(sym) {
            return Err(Error::NotASymbol);
        }
        match self.reg.get(sym) {
            Obj::Symbol { name, .. } => Ok(name),
            _ => unreachable!(),
        }
    }

    pub fn symbol_value(&self, sym: Ref) -> Result<Ref, Error> {
        if !self.symbol_p(sym) {
            return Err(Error::NotASymbol);
        }
        match self.reg.get(sym) {
            Obj::Symbol { value, .. } => Ok(*value),
            _ => unreachable!(),
        }
    }

    /// Contents of a symbol's function cell, UNBOUND if empty
    pub fn symbol_function(&self, sym: Ref) -> Result<Ref, Error> {
        if !self.symbol_p(sym) {
            return Err(Error::NotASymbol);
        }
        match self.reg.get(sym) {
            Obj::Symbol { function, .. } => Ok(*function),
            _ => unreachable!(),
        }
    }

    pub fn set_symbol_value(&mut self, sym: Ref, val: Ref) -> Result<(), Error> {
        if !self.symbol_p(sym) {
            return Err(Error::NotASymbol);
        }
        if let Obj::Symbol { value, .. } = self.reg.get_mut(sym) {
            *value = val;
        }
        Ok(())
    }

    /// Fills a symbol's function cell; special forms stay put
    pub fn set_symbol_function(&mut self, sym: Ref, func: Ref) -> Result<(), Error> {
        let old = self.symbol_function(sym)?;
        if !self.function_p(func) {
            return Err(Error::NotAFunction);
        }
        if self.function_p(old) && self.function_get(old).kind == FnKind::SpecialForm {
            return Err(Error::InvalidFunction(format!(
                "cannot redefine special form {}",
                self.symbol_name(sym)?
            )));
        }

        if let Obj::Symbol { function, .. } = self.reg.get_mut(sym) {
            *function = func;
        }
        Ok(())
    }

    pub fn string_get(&self, val: Ref) -> Result<&[u8], Error> {
        if !self.string_p(val) {
            return Err(Error::NotAString);
        }
        match self.reg.get(val) {
            Obj::String(bytes) => Ok(bytes),
            _ => unreachable!(),
        }
    }

    #[inline(always)]
    pub(crate) fn function_get(&self, func: Ref) -> Function {
        match self.reg.get(func) {
            Obj::Function(f) => *f,
            _ => panic!("not a function object {:?}", func),
        }
    }

    pub fn check_function(&self, val: Ref) -> Result<Function, Error> {
        if self.function_p(val) {
            Ok(self.function_get(val))
        } else {
            Err(Error::NotAFunction)
        }
    }

    pub fn check_symbol(&self, val: Ref) -> Result<Ref, Error> {
        if self.symbol_p(val) {
            Ok(val)
        } else {
            Err(Error::NotASymbol)
        }
    }

    pub fn check_list(&self, val: Ref) -> Result<Ref, Error> {
        if self.list_p(val) {
            Ok(val)
        } else {
            Err(Error::NotAList)
        }
    }

    /// Turns a lambda into a macro in place
    pub(crate) fn make_macro(&mut self, func: Ref) -> Result<Ref, Error> {
        let f = self.check_function(func)?;
        if f.kind != FnKind::Lambda && f.kind != FnKind::Macro {
            return Err(Error::InvalidFunction(
                "only interpreted functions can become macros".to_string(),
            ));
        }
        if let Obj::Function(f) = self.reg.get_mut(func) {
            f.kind = FnKind::Macro;
        }
        Ok(func)
    }

    /// Errors unless `count` arguments suit this function
    pub(crate) fn check_arity(&self, func: &Function, count: usize) -> Result<(), Error> {
        let arity = func.arity as usize;
        if count == arity || (func.rest && count > arity) {
            Ok(())
        } else {
            Err(Error::ArgumentError(count))
        }
    }

    // ***********************************
    // * Continuation frames
    // ***********************************

    pub(crate) fn cont_get(&self, frame: Ref) -> Cont {
        match self.reg.get(frame) {
            Obj::Cont(c) => *c,
            _ => panic!("not a frame {:?}", frame),
        }
    }

    pub(crate) fn cont_get_mut(&mut self, frame: Ref) -> &mut Cont {
        match self.reg.get_mut(frame) {
            Obj::Cont(c) => c,
            _ => panic!("not a frame {:?}", frame),
        }
    }

    // ***********************************
    // * Closures
    // ***********************************

    /// Extends a closure with one binding, leaving the original intact
    pub fn bind(&mut self, closure: Ref, sym: Ref, val: Ref) -> Ref {
        self.pin(closure);
        let binding = self.cons(sym, val);
        let closure = self.unpin();
        self.cons(binding, closure)
    }

    /// Finds the innermost binding of a symbol, falling back on its
    /// value cell
    pub fn lookup(&self, mut closure: Ref, sym: Ref) -> Result<Ref, Error> {
        while self.cons_p(closure) {
            let binding = self.car_unchecked(closure);
            if self.car_unchecked(binding) == sym {
                return Ok(self.cdr_unchecked(binding));
            }
            closure = self.cdr_unchecked(closure);
        }

        match self.symbol_value(sym)? {
            UNBOUND => Err(Error::UnboundVariable(self.symbol_name(sym)?.to_string())),
            val => Ok(val),
        }
    }

    // ***********************************
    // * Comparison and arithmetic
    // ***********************************

    /// Structural equality: same shape, same atoms, same string bytes
    pub fn equal(&self, mut a: Ref, mut b: Ref) -> bool {
        loop {
            if a == b {
                return true;
            }
            if self.cons_p(a) && self.cons_p(b) {
                if !self.equal(self.car_unchecked(a), self.car_unchecked(b)) {
                    return false;
                }
                a = self.cdr_unchecked(a);
                b = self.cdr_unchecked(b);
                continue;
            }
            return match (self.string_get(a), self.string_get(b)) {
                (Ok(x), Ok(y)) => x == y,
                _ => false,
            };
        }
    }

    pub fn check_int(&self, val: Ref) -> Result<i64, Error> {
        if val.fixnum_p() {
            Ok(val.fixnum_get())
        } else {
            Err(Error::NotAnInteger)
        }
    }
}

/// Wraps an arithmetic result back into a fixnum
fn fixnum_result(val: Option<i64>) -> Result<Ref, Error> {
    match val {
        Some(n) => Ref::fixnum(n).map_err(|_| Error::BignumsUnsupported),
        None => Err(Error::BignumsUnsupported),
    }
}

pub fn add(a: i64, b: i64) -> Result<Ref, Error> {
    fixnum_result(a.checked_add(b))
}

pub fn sub(a: i64, b: i64) -> Result<Ref, Error> {
    fixnum_result(a.checked_sub(b))
}

pub fn mul(a: i64, b: i64) -> Result<Ref, Error> {
    fixnum_result(a.checked_mul(b))
}

/// Truncating division
pub fn div(a: i64, b: i64) -> Result<Ref, Error> {
    if b == 0 {
        return Err(Error::DivisionByZero);
    }
    fixnum_result(a.checked_div(b))
}
