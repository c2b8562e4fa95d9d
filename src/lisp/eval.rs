// KESTREL, a small Lisp runtime.

// SPDX-FileCopyrightText: © 2021 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// KESTREL is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/lisp/eval.rs

// Continuation-passing evaluator. Every pending computation is a
// frame object in the heap; the driver loop either evaluates the
// expression register or hands the value register to the top frame,
// one step at a time, so Lisp recursion never touches the host stack.

// <>

use super::types::*;
use super::{Error, Interp};

use std::mem;

/// What the driver loop does next
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Evaluate `expr` in `env`
    Eval,
    /// Hand `expr` to the top frame as a value
    Return,
    /// The bottom frame has its value
    Done,
}

impl Interp {
    /// Evaluates an expression under a lexical closure
    ///
    /// On error the evaluator registers are cleared, leaving the heap
    /// consistent and the interpreter ready for the next evaluation.
    pub fn eval(&mut self, closure: Ref, expr: Ref) -> Result<Ref, Error> {
        assert_eq!(self.cont, NIL, "evaluator entered twice");
        let depth = self.pin_depth();

        self.env = closure;
        self.expr = expr;
        self.expand = true;
        self.push_frame(Opcode::End, NIL, NIL, NIL);

        let mut action = Action::Eval;
        while action != Action::Done {
            match self.iter_once(action) {
                Ok(next) => action = next,
                Err(err) => {
                    log::debug!("evaluation aborted: {err}");
                    self.reset();
                    self.unpin_to(depth);
                    return Err(err);
                }
            }
        }

        let out = self.expr;
        self.reset();
        Ok(out)
    }

    /// Advances the machine by one step
    pub fn iter_once(&mut self, action: Action) -> Result<Action, Error> {
        match action {
            Action::Eval => self.eval_once(),
            Action::Return => self.resume(),
            Action::Done => Ok(Action::Done),
        }
    }

    fn reset(&mut self) {
        self.cont = NIL;
        self.expr = NIL;
        self.env = NIL;
        self.expand = true;
    }

    // ***********************************
    // * Frame management
    // ***********************************

    /// Pushes a frame which will resume in the current closure
    fn push_frame(&mut self, op: Opcode, val: Ref, todo: Ref, done: Ref) {
        if cfg!(feature = "stkdbg") {
            log::debug!("PUSH: {:?}", op);
        }

        let frame = Cont {
            op,
            saved: self.cont,
            closure: self.env,
            val,
            todo,
            done,
        };
        self.cont = self.alloc(Obj::Cont(frame));
    }

    #[inline(always)]
    fn pop_frame(&mut self) {
        if cfg!(feature = "stkdbg") {
            log::debug!("POP: {:?}", self.frame().op);
        }

        self.cont = self.frame().saved;
    }

    #[inline(always)]
    fn frame(&self) -> Cont {
        self.cont_get(self.cont)
    }

    #[inline(always)]
    fn frame_mut(&mut self) -> &mut Cont {
        let cont = self.cont;
        self.cont_get_mut(cont)
    }

    // ***********************************
    // * Evaluation
    // ***********************************

    /// Starts evaluating the expression register
    fn eval_once(&mut self) -> Result<Action, Error> {
        let expand = mem::replace(&mut self.expand, true);
        let expr = self.expr;

        if self.cons_p(expr) {
            if expand {
                if let Some(mac) = self.macro_call(expr)? {
                    self.push_frame(Opcode::Expand, expr, mac, NIL);
                    return self.expand_once();
                }
            }
            return self.dispatch();
        }

        if self.symbol_p(expr) {
            self.expr = self.lookup(self.env, expr)?;
        }
        Ok(Action::Return)
    }

    /// The macro named by a form's head, if it names one
    fn macro_call(&self, form: Ref) -> Result<Option<Ref>, Error> {
        if !self.cons_p(form) {
            return Ok(None);
        }

        let head = self.car_unchecked(form);
        if !self.symbol_p(head) {
            return Ok(None);
        }

        let func = self.symbol_function(head)?;
        Ok(if self.macro_p(func) { Some(func) } else { None })
    }

    /// Applies the macro in the top frame to the unevaluated arguments
    /// of the form in the top frame
    fn expand_once(&mut self) -> Result<Action, Error> {
        let frame = self.frame();
        let mac = self.function_get(frame.todo);

        let args = self.cdr(frame.val)?;
        self.check_arity(&mac, self.length(args)?)?;

        self.expr = args;
        self.push_frame(Opcode::ApplyFn, frame.todo, NIL, NIL);
        Ok(Action::Return)
    }

    /// Handles a call form which needs no further expansion
    fn dispatch(&mut self) -> Result<Action, Error> {
        let form = self.expr;
        let head = self.car_unchecked(form);

        if self.symbol_p(head) {
            let func = self.resolve_function(head)?;
            return self.dispatch_call(func, form);
        }

        // evaluate the operator, then come back for the arguments
        self.push_frame(Opcode::Head, form, NIL, NIL);
        let form = self.frame().val;
        self.expr = self.car_unchecked(form);
        Ok(Action::Eval)
    }

    /// The function cell of a call head, or else its variable binding
    fn resolve_function(&self, sym: Ref) -> Result<Ref, Error> {
        let func = self.symbol_function(sym)?;
        if func != UNBOUND {
            return Ok(func);
        }

        match self.lookup(self.env, sym) {
            Ok(val) if self.function_p(val) => Ok(val),
            Ok(_) => Err(Error::NotAFunction),
            Err(Error::UnboundVariable(name)) => Err(Error::UndefinedFunction(name)),
            Err(err) => Err(err),
        }
    }

    /// Sets up a call of `func` with the argument forms of `form`
    fn dispatch_call(&mut self, func: Ref, form: Ref) -> Result<Action, Error> {
        let f = self.check_function(func)?;
        let args = self.cdr(form)?;

        if let Code::Special(which) = f.code {
            return self.special_form(which, args);
        }

        let count = self.length(args)?;
        self.check_arity(&f, count)?;

        if count == 0 {
            self.expr = NIL;
            self.push_frame(Opcode::ApplyFn, func, NIL, NIL);
            return Ok(Action::Return);
        }

        self.push_frame(Opcode::ApplyArg, func, args, NIL);
        let todo = self.frame().todo;
        let rest = self.cdr_unchecked(todo);
        self.frame_mut().todo = rest;
        self.expr = self.car_unchecked(todo);
        Ok(Action::Eval)
    }

    fn special_form(&mut self, which: Form, args: Ref) -> Result<Action, Error> {
        let len = self.length(args)?;

        match which {
            Form::Quote => {
                if len != 1 {
                    return Err(Error::ArgumentError(len));
                }
                self.expr = self.car_unchecked(args);
                Ok(Action::Return)
            }
            Form::If => {
                if !(2..=3).contains(&len) {
                    return Err(Error::ArgumentError(len));
                }
                self.expr = args;
                self.push_frame(Opcode::Branch, self.cdr_unchecked(args), NIL, NIL);
                self.expr = self.car_unchecked(self.expr);
                Ok(Action::Eval)
            }
            Form::Do => {
                if len == 0 {
                    return Err(Error::ArgumentError(0));
                }
                self.push_frame(Opcode::DoSeq, args, NIL, NIL);
                self.do_seq()
            }
            Form::Fn => {
                if len == 0 {
                    return Err(Error::ArgumentError(0));
                }
                self.make_lambda(args)
            }
        }
    }

    /// Builds a closure over the current lexical environment
    ///
    /// Formals are copied into a fresh list with any `&` dropped, so
    /// the source form is never rewritten.
    fn make_lambda(&mut self, args: Ref) -> Result<Action, Error> {
        let formals = self.car_unchecked(args);
        if !self.list_p(formals) {
            return Err(Error::InvalidFunction("formals must be a list".to_string()));
        }

        let mut arity: usize = 0;
        let mut rest = false;
        let mut pos = formals;
        while pos != NIL {
            let sym = self.car_unchecked(pos);
            if !self.symbol_p(sym) {
                return Err(Error::InvalidFunction(format!(
                    "formal {} is not a symbol",
                    self.show(sym)
                )));
            }
            if sym == self.syms.amp {
                let tail = self.cdr_unchecked(pos);
                if self.length(tail)? != 1 || !self.symbol_p(self.car_unchecked(tail)) {
                    return Err(Error::InvalidFunction(
                        "must have exactly one symbol after &".to_string(),
                    ));
                }
                rest = true;
                break;
            }
            arity += 1;
            pos = self.cdr_unchecked(pos);
        }

        let arity = u16::try_from(arity)
            .map_err(|_| Error::InvalidFunction("too many formals".to_string()))?;

        // pins: source position, head, tail
        self.expr = args;
        let base = self.pin_depth();
        self.pin(formals);
        self.pin(NIL);
        self.pin(NIL);

        loop {
            let src = self.pins[base];
            if src == NIL {
                break;
            }
            self.pins[base] = self.cdr_unchecked(src);

            let sym = self.car_unchecked(src);
            if sym == self.syms.amp {
                continue;
            }

            let cell = self.cons(sym, NIL);
            if self.pins[base + 1] == NIL {
                self.pins[base + 1] = cell;
            } else {
                let end = self.pins[base + 2];
                self.set_cdr(end, cell);
            }
            self.pins[base + 2] = cell;
        }

        let formals = self.pins[base + 1];
        self.unpin_to(base);

        let body = self.cdr_unchecked(self.expr);
        self.expr = self.lambda(formals, body, self.env, arity, rest);
        Ok(Action::Return)
    }

    // ***********************************
    // * Resumption
    // ***********************************

    /// Hands the value register to the top frame
    fn resume(&mut self) -> Result<Action, Error> {
        let frame = self.frame();
        self.env = frame.closure;

        if cfg!(feature = "stkdbg") {
            log::debug!("RESUME: {:?} with {}", frame.op, self.show(self.expr));
        }

        match frame.op {
            Opcode::End => {
                assert_eq!(frame.saved, NIL);
                self.pop_frame();
                Ok(Action::Done)
            }
            Opcode::Expand | Opcode::MacroExpand => {
                let expansion = self.expr;

                if expansion == frame.val {
                    // fixed point: evaluate (or hand back) without
                    // expanding again
                    self.pop_frame();
                    return Ok(if frame.op == Opcode::Expand {
                        self.expand = false;
                        Action::Eval
                    } else {
                        Action::Return
                    });
                }

                match self.macro_call(expansion)? {
                    Some(mac) => {
                        let top = self.frame_mut();
                        top.val = expansion;
                        top.todo = mac;
                        self.expand_once()
                    }
                    None => {
                        self.pop_frame();
                        Ok(if frame.op == Opcode::Expand {
                            Action::Eval
                        } else {
                            Action::Return
                        })
                    }
                }
            }
            Opcode::Head => {
                let func = self.expr;
                if !self.function_p(func) {
                    return Err(Error::NotAFunction);
                }
                self.pop_frame();
                self.dispatch_call(func, frame.val)
            }
            Opcode::ApplyArg => {
                let done = self.cons(self.expr, frame.done);

                let frame = self.frame();
                if frame.todo == NIL {
                    self.expr = self.nreverse(done);
                    let top = self.frame_mut();
                    top.op = Opcode::ApplyFn;
                    top.done = NIL;
                    return Ok(Action::Return);
                }

                let rest = self.cdr_unchecked(frame.todo);
                let top = self.frame_mut();
                top.done = done;
                top.todo = rest;
                self.expr = self.car_unchecked(frame.todo);
                Ok(Action::Eval)
            }
            Opcode::ApplyFn => self.apply(frame.val),
            Opcode::DoSeq => self.do_seq(),
            Opcode::Branch => {
                self.pop_frame();
                let branches = frame.val;
                self.expr = if self.expr != NIL {
                    self.car_unchecked(branches)
                } else {
                    self.car(self.cdr_unchecked(branches))?
                };
                Ok(Action::Eval)
            }
        }
    }

    /// Reverses a list of cells owned by the evaluator, in place
    fn nreverse(&mut self, mut list: Ref) -> Ref {
        let mut out = NIL;
        while list != NIL {
            let next = self.cdr_unchecked(list);
            self.set_cdr(list, out);
            out = list;
            list = next;
        }
        out
    }

    /// Applies `func` (held by the top frame) to the argument list in
    /// the value register
    fn apply(&mut self, func: Ref) -> Result<Action, Error> {
        let f = self.function_get(func);

        match f.code {
            Code::Native(code) => {
                let args = self.expr;
                let out = code(self, args)?;
                self.pop_frame();
                self.expr = out;
                Ok(Action::Return)
            }
            Code::Intrinsic(Intrinsic::Apply) => {
                let args = self.expr;
                let target = self.car_unchecked(args);
                let list = self.car(self.cdr_unchecked(args))?;

                let g = self.check_function(target)?;
                if matches!(g.code, Code::Special(_)) {
                    return Err(Error::NotAFunction);
                }
                self.check_list(list)?;
                self.check_arity(&g, self.length(list)?)?;

                self.frame_mut().val = target;
                self.expr = list;
                Ok(Action::Return)
            }
            Code::Intrinsic(Intrinsic::MacroExpand) => {
                let form = self.car_unchecked(self.expr);
                match self.macro_call(form)? {
                    Some(mac) => {
                        let top = self.frame_mut();
                        top.op = Opcode::MacroExpand;
                        top.val = form;
                        top.todo = mac;
                        self.expand_once()
                    }
                    None => {
                        self.pop_frame();
                        self.expr = form;
                        Ok(Action::Return)
                    }
                }
            }
            Code::Intrinsic(Intrinsic::MacroExpand1) => {
                let form = self.car_unchecked(self.expr);
                match self.macro_call(form)? {
                    Some(mac) => {
                        let args = self.cdr_unchecked(form);
                        let m = self.function_get(mac);
                        self.check_arity(&m, self.length(args)?)?;

                        self.frame_mut().val = mac;
                        self.expr = args;
                        Ok(Action::Return)
                    }
                    None => {
                        self.pop_frame();
                        self.expr = form;
                        Ok(Action::Return)
                    }
                }
            }
            Code::Special(_) => Err(Error::NotAFunction),
            Code::Lambda {
                formals, closure, ..
            } => {
                // the frame becomes the body's sequence frame, binding
                // formals into a closure extending the captured one
                let args = self.expr;
                let top = self.frame_mut();
                top.closure = closure;
                top.todo = formals;
                top.done = args;

                loop {
                    let frame = self.frame();
                    if frame.todo == NIL {
                        break;
                    }

                    let sym = self.car_unchecked(frame.todo);
                    let last = self.cdr_unchecked(frame.todo) == NIL;
                    let (val, todo, done) = if f.rest && last {
                        (frame.done, NIL, NIL)
                    } else {
                        (
                            self.car_unchecked(frame.done),
                            self.cdr_unchecked(frame.todo),
                            self.cdr_unchecked(frame.done),
                        )
                    };

                    let top = self.frame_mut();
                    top.todo = todo;
                    top.done = done;

                    let env = self.bind(frame.closure, sym, val);
                    self.frame_mut().closure = env;
                }

                // reload: binding may have moved the function
                let func = self.frame().val;
                let body = match self.function_get(func).code {
                    Code::Lambda { body, .. } => body,
                    _ => unreachable!(),
                };

                let top = self.frame_mut();
                top.op = Opcode::DoSeq;
                top.val = body;
                self.do_seq()
            }
        }
    }

    /// Evaluates the next body form of the top frame; the last one
    /// replaces the frame entirely
    fn do_seq(&mut self) -> Result<Action, Error> {
        let frame = self.frame();
        self.env = frame.closure;

        if frame.val == NIL {
            self.pop_frame();
            self.expr = NIL;
            return Ok(Action::Return);
        }

        let form = self.car(frame.val)?;
        let rest = self.cdr(frame.val)?;

        if rest == NIL {
            self.pop_frame();
        } else {
            self.frame_mut().val = rest;
        }

        self.expr = form;
        Ok(Action::Eval)
    }
}
