// KESTREL, a small Lisp runtime.

// SPDX-FileCopyrightText: © 2021 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// KESTREL is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/lisp/mod.rs

// The interpreter context. Owns the heap, the symbol table, and the
// evaluator registers, and knows how to find every root when the
// heap asks for a collection.

// <>

//! A small Lisp with tagged references, a copying collector, and a
//! continuation-passing evaluator
//!
//! Every operation goes through an [`Interp`], which owns all state;
//! any number of interpreters may coexist independently.

pub mod core;
pub mod eval;
pub mod memmgt;
pub mod parser;
pub mod printer;
pub mod stdenv;
pub mod symtab;
pub mod types;

pub use memmgt::GcStats;
pub use printer::Show;
pub use types::{Ref, NIL, TRUE, UNBOUND};

use memmgt::Region;
use symtab::SymbolTable;
use types::Obj;

use std::fs;
use std::mem;

/// Errors any evaluation may surface to its caller
///
/// Each aborts the current top level evaluation; none is recovered
/// inside the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("not an integer")]
    NotAnInteger,
    #[error("not a list")]
    NotAList,
    #[error("not a symbol")]
    NotASymbol,
    #[error("not a string")]
    NotAString,
    #[error("not a function")]
    NotAFunction,
    #[error("wrong number of arguments: {0}")]
    ArgumentError(usize),
    #[error("unbound variable: {0}")]
    UnboundVariable(String),
    #[error("undefined function: {0}")]
    UndefinedFunction(String),
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("unterminated list")]
    UnterminatedList,
    #[error("unterminated string")]
    UnterminatedString,
    #[error("unexpected end of input")]
    EndOfInput,
    #[error("invalid function: {0}")]
    InvalidFunction(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer out of range: {0}")]
    OutOfRange(i64),
    #[error("bignums are unsupported")]
    BignumsUnsupported,
    #[error("{0}")]
    Io(String),
}

/// Interpreter construction parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Initial zone size in bytes
    pub zone_size: usize,
    /// Zones never grow past this; needing more is fatal
    pub max_zone_size: usize,
    /// Whether to load `defmacro` and `defn`
    pub prelude: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            zone_size: 64 * 1024,
            max_zone_size: 256 * 1024 * 1024,
            prelude: true,
        }
    }
}

/// Handle to an embedder held reference; see [`Interp::protect`]
#[derive(Debug)]
pub struct Rooted(usize);

/// Symbols the interpreter itself needs to recognize
struct Syms {
    quote: Ref,
    amp: Ref,
    progn: Ref,
}

/// One complete, independent interpreter instance
pub struct Interp {
    reg: Region,
    symtab: SymbolTable,
    syms: Syms,

    /// Current continuation frame
    cont: Ref,
    /// Expression being evaluated, or value being returned
    expr: Ref,
    /// Lexical bindings for `expr`
    env: Ref,
    /// Low when `expr` has already been fully macroexpanded
    expand: bool,

    /// Temporaries staged across an allocation
    pins: Vec<Ref>,
    /// References held by the embedder; UNBOUND marks a free slot
    protected: Vec<Ref>,
    free_slots: Vec<usize>,
}

impl Default for Interp {
    fn default() -> Self {
        Self::new()
    }
}

impl Interp {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let mut it = Self {
            reg: Region::new(config.zone_size, config.max_zone_size),
            symtab: SymbolTable::new(),
            syms: Syms {
                quote: NIL,
                amp: NIL,
                progn: NIL,
            },
            cont: NIL,
            expr: NIL,
            env: NIL,
            expand: true,
            pins: Vec::new(),
            protected: Vec::new(),
            free_slots: Vec::new(),
        };

        it.syms.quote = it.intern("quote");
        it.syms.amp = it.intern("&");
        it.syms.progn = it.intern("do");

        stdenv::install(&mut it);

        if config.prelude {
            if let Err(err) = it.interpret(stdenv::PRELUDE) {
                log::error!("prelude failed to load: {err}");
                panic!("prelude failed to load: {err}");
            }
        }

        log::debug!(
            "interpreter ready, {} symbols, {} heap bytes",
            it.symtab.len(),
            it.reg.stats().used
        );

        it
    }

    /// Reads every form in `code` and evaluates them in order at top
    /// level, returning the printed value of the last (`nil` if none)
    pub fn interpret(&mut self, code: &str) -> Result<String, Error> {
        let forms = self.read_all(code)?;
        let todo = self.protect(forms);

        let mut result = Ok(NIL);
        loop {
            let forms = self.rooted(&todo);
            if forms == NIL {
                break;
            }

            let form = self.car_unchecked(forms);
            let rest = self.cdr_unchecked(forms);
            self.set_rooted(&todo, rest);

            result = self.eval(NIL, form);
            if result.is_err() {
                break;
            }
        }

        self.release(todo);
        result.map(|val| self.print(val))
    }

    /// Evaluates an entire file as one `(do ...)` form and returns the
    /// printed result
    pub fn run_file(&mut self, path: &str) -> Result<String, Error> {
        let code = fs::read_to_string(path).map_err(|e| Error::Io(format!("{path}: {e}")))?;
        log::info!("running {path} ({} bytes)", code.len());

        let forms = self.read_all(&code)?;
        if forms == NIL {
            return Ok(self.print(NIL));
        }
        let prog = self.cons(self.syms.progn, forms);
        let val = self.eval(NIL, prog)?;

        Ok(self.print(val))
    }

    /// Keeps `val` alive across collections until released
    pub fn protect(&mut self, val: Ref) -> Rooted {
        match self.free_slots.pop() {
            Some(slot) => {
                self.protected[slot] = val;
                Rooted(slot)
            }
            None => {
                self.protected.push(val);
                Rooted(self.protected.len() - 1)
            }
        }
    }

    /// Current location of a protected reference
    pub fn rooted(&self, root: &Rooted) -> Ref {
        self.protected[root.0]
    }

    pub fn set_rooted(&mut self, root: &Rooted, val: Ref) {
        self.protected[root.0] = val;
    }

    pub fn release(&mut self, root: Rooted) -> Ref {
        let val = mem::replace(&mut self.protected[root.0], UNBOUND);
        self.free_slots.push(root.0);
        val
    }

    /// Forces a full collection
    pub fn collect_garbage(&mut self) {
        self.collect(0);
    }

    pub fn gc_stats(&self) -> GcStats {
        self.reg.stats()
    }

    /// Places an object in the heap, collecting first if necessary
    ///
    /// References held in the object's own fields survive a collection
    /// here; any other reference the caller holds in a local may be
    /// stale afterward and must be reloaded from a root.
    pub(crate) fn alloc(&mut self, mut obj: Obj) -> Ref {
        let size = obj.size();

        if !self.reg.has_room(size) {
            let base = self.pins.len();
            obj.trace(|r| {
                self.pins.push(r);
                r
            });

            self.collect(size);

            let mut pos = base;
            obj.trace(|_| {
                pos += 1;
                self.pins[pos - 1]
            });
            self.pins.truncate(base);
        }

        self.reg.place(obj)
    }

    /// Stages a temporary across an allocation
    #[inline(always)]
    pub(crate) fn pin(&mut self, val: Ref) {
        self.pins.push(val);
    }

    /// Takes back the most recently pinned temporary, as relocated
    #[inline(always)]
    pub(crate) fn unpin(&mut self) -> Ref {
        match self.pins.pop() {
            Some(val) => val,
            None => panic!("pin stack underflow"),
        }
    }

    pub(crate) fn pin_depth(&self) -> usize {
        self.pins.len()
    }

    pub(crate) fn unpin_to(&mut self, depth: usize) {
        self.pins.truncate(depth);
    }

    /// Gathers every root, lets the region relocate them, then puts
    /// each back where it came from
    fn collect(&mut self, need: usize) {
        let mut roots = Vec::with_capacity(
            6 + self.pins.len() + self.protected.len() + self.symtab.len(),
        );

        roots.extend([
            self.cont,
            self.expr,
            self.env,
            self.syms.quote,
            self.syms.amp,
            self.syms.progn,
        ]);
        roots.extend_from_slice(&self.pins);
        roots.extend_from_slice(&self.protected);
        roots.extend(self.symtab.refs());

        self.reg.collect(&mut roots, need);

        let (regs, rest) = roots.split_at(6);
        self.cont = regs[0];
        self.expr = regs[1];
        self.env = regs[2];
        self.syms.quote = regs[3];
        self.syms.amp = regs[4];
        self.syms.progn = regs[5];

        let (pins, rest) = rest.split_at(self.pins.len());
        self.pins.copy_from_slice(pins);

        let (protected, rest) = rest.split_at(self.protected.len());
        self.protected.copy_from_slice(protected);

        for (slot, &new) in self.symtab.refs_mut().zip(rest) {
            *slot = new;
        }
    }
}
