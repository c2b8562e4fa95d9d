// KESTREL, a small Lisp runtime.

// SPDX-FileCopyrightText: © 2021 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// KESTREL is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/lisp/stdenv.rs

// Standard environment: native builtins, evaluator intrinsics, special
// forms, and the Lisp prelude defining the definition macros.

// <>

use super::core;
use super::types::{Code, FnKind, Form, Function, Intrinsic, NativeFn, Obj, Ref, NIL, TRUE, UNBOUND};
use super::{Error, Interp};

/// Builds a table of native functions from names, fixed arities, and
/// bodies; `[a, b; rest]` also binds the list of remaining arguments
///
/// Arity has been checked before a native runs, so arguments are
/// taken from the list without further checks. A native which
/// allocates must do so last, since any allocation may move every
/// argument it holds.
macro_rules! lisp_fn {
    (@rest) => { false };
    (@rest $rest:ident) => { true };

    ( const $array:ident; $it:ident;
      $( $name:literal $argct:literal [ $($args:ident),* $(; $rest:ident)? ] $body:block )+
    ) => {
        pub const $array: &[(&str, NativeFn, u16, bool)] =
            &[$(($name, |_it: &mut Interp, _args: Ref| -> Result<Ref, Error> {
                #[allow(unused_variables)]
                let $it = _it;

                #[allow(unused_mut)]
                let mut _pos = _args;
                $(
                    let $args = $it.car_unchecked(_pos);
                    _pos = $it.cdr_unchecked(_pos);
                )*
                $( let $rest = _pos; )?

                $body
            },
            $argct,
            lisp_fn!(@rest $($rest)?))),+];
    };
}

lisp_fn! {
    const BUILTINS;
    it;

    "+" 2 [fst, snd] {
        core::add(it.check_int(fst)?, it.check_int(snd)?)
    }

    "-" 2 [fst, snd] {
        core::sub(it.check_int(fst)?, it.check_int(snd)?)
    }

    "*" 2 [fst, snd] {
        core::mul(it.check_int(fst)?, it.check_int(snd)?)
    }

    "/" 2 [fst, snd] {
        core::div(it.check_int(fst)?, it.check_int(snd)?)
    }

    "car" 1 [list] {
        it.car(list)
    }

    "cdr" 1 [list] {
        it.cdr(list)
    }

    "cons" 2 [car, cdr] {
        Ok(it.cons(car, cdr))
    }

    // identity, never structure
    "eq" 2 [fst, snd] {
        Ok(if fst == snd { TRUE } else { NIL })
    }

    "list" 0 [; items] {
        Ok(items)
    }

    "function" 1 [target] {
        if it.function_p(target) {
            return Ok(target);
        }

        let sym = it.check_symbol(target)?;
        match it.symbol_function(sym)? {
            UNBOUND => Err(Error::UndefinedFunction(it.symbol_name(sym)?.to_string())),
            func => Ok(func),
        }
    }

    "macro!" 1 [func] {
        it.make_macro(func)
    }

    "set-function" 2 [sym, func] {
        it.set_symbol_function(sym, func)?;
        Ok(func)
    }

    "set-value" 2 [sym, val] {
        it.set_symbol_value(sym, val)?;
        Ok(val)
    }
}

/// Builtins which hand control back to the evaluator instead of
/// returning a value
const INTRINSICS: &[(&str, Intrinsic, u16)] = &[
    ("apply", Intrinsic::Apply, 2),
    ("macroexpand", Intrinsic::MacroExpand, 1),
    ("macroexpand-1", Intrinsic::MacroExpand1, 1),
];

const SPECIAL_FORMS: &[(&str, Form)] = &[
    ("do", Form::Do),
    ("fn", Form::Fn),
    ("if", Form::If),
    ("quote", Form::Quote),
];

/// Definition macros, written in the language itself
pub const PRELUDE: &str = "
(set-function 'defmacro
  (macro! (fn (name formals & body)
    (list 'set-function (list 'quote name)
          (list 'macro! (cons 'fn (cons formals body)))))))

(defmacro defn (name formals & body)
  (list 'set-function (list 'quote name) (cons 'fn (cons formals body))))
";

/// Fills the function cells of every builtin symbol
pub fn install(it: &mut Interp) {
    for &(name, form) in SPECIAL_FORMS {
        define(
            it,
            name,
            Function {
                kind: FnKind::SpecialForm,
                arity: 0,
                rest: true,
                code: Code::Special(form),
            },
        );
    }

    for &(name, code, arity, rest) in BUILTINS {
        define(
            it,
            name,
            Function {
                kind: FnKind::Builtin,
                arity,
                rest,
                code: Code::Native(code),
            },
        );
    }

    for &(name, which, arity) in INTRINSICS {
        define(
            it,
            name,
            Function {
                kind: FnKind::Builtin,
                arity,
                rest: false,
                code: Code::Intrinsic(which),
            },
        );
    }

    log::debug!(
        "installed {} special forms, {} builtins",
        SPECIAL_FORMS.len(),
        BUILTINS.len() + INTRINSICS.len()
    );
}

/// Writes the function cell directly; special forms can't be installed
/// any other way
fn define(it: &mut Interp, name: &str, func: Function) {
    it.intern(name);
    let func = it.function(func);
    let sym = it.intern(name);

    if let Obj::Symbol { function, .. } = it.reg.get_mut(sym) {
        *function = func;
    }

    if cfg!(feature = "memdbg") {
        log::debug!("defined {name} as {:?}", func);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lisp::Config;

    fn run(it: &mut Interp, code: &str) -> Result<String, Error> {
        it.interpret(code)
    }

    #[test]
    fn arithmetic() {
        let mut it = Interp::new();
        assert_eq!(run(&mut it, "(+ 2 3)"), Ok("5".into()));
        assert_eq!(run(&mut it, "(- 2 3)"), Ok("-1".into()));
        assert_eq!(run(&mut it, "(* -4 3)"), Ok("-12".into()));
        assert_eq!(run(&mut it, "(/ 7 2)"), Ok("3".into()));
        assert_eq!(run(&mut it, "(/ -7 2)"), Ok("-3".into()));
        assert_eq!(run(&mut it, "(+ 536870911 0)"), Ok("536870911".into()));

        assert_eq!(run(&mut it, "(+ 536870911 1)"), Err(Error::BignumsUnsupported));
        assert_eq!(run(&mut it, "(- -536870912 1)"), Err(Error::BignumsUnsupported));
        assert_eq!(run(&mut it, "(* 65536 65536)"), Err(Error::BignumsUnsupported));
        assert_eq!(run(&mut it, "(/ -536870912 -1)"), Err(Error::BignumsUnsupported));
        assert_eq!(run(&mut it, "(/ 1 0)"), Err(Error::DivisionByZero));
        assert_eq!(run(&mut it, "(+ 1 \"2\")"), Err(Error::NotAnInteger));
        assert_eq!(run(&mut it, "(* 'a 2)"), Err(Error::NotAnInteger));
        assert_eq!(run(&mut it, "(+ 1 2 3)"), Err(Error::ArgumentError(3)));
    }

    #[test]
    fn lists() {
        let mut it = Interp::new();
        assert_eq!(run(&mut it, "(car '(1 2))"), Ok("1".into()));
        assert_eq!(run(&mut it, "(cdr '(1 2))"), Ok("(2)".into()));
        assert_eq!(run(&mut it, "(car nil)"), Ok("nil".into()));
        assert_eq!(run(&mut it, "(cdr nil)"), Ok("nil".into()));
        assert_eq!(run(&mut it, "(car 1)"), Err(Error::NotAList));
        assert_eq!(run(&mut it, "(cdr \"s\")"), Err(Error::NotAList));

        assert_eq!(run(&mut it, "(cons 1 2)"), Ok("(1 . 2)".into()));
        assert_eq!(run(&mut it, "(cons 1 nil)"), Ok("(1)".into()));
        assert_eq!(run(&mut it, "(list)"), Ok("nil".into()));
        assert_eq!(run(&mut it, "(list 1 (+ 1 1) 'c)"), Ok("(1 2 c)".into()));
    }

    #[test]
    fn identity() {
        let mut it = Interp::new();
        assert_eq!(run(&mut it, "(eq 'a 'a)"), Ok("true".into()));
        assert_eq!(run(&mut it, "(eq 3 3)"), Ok("true".into()));
        assert_eq!(run(&mut it, "(eq nil ())"), Ok("true".into()));
        assert_eq!(run(&mut it, "(eq 'a 'b)"), Ok("nil".into()));
        // structurally equal, distinct cells
        assert_eq!(run(&mut it, "(eq '(1) '(1))"), Ok("nil".into()));
        assert_eq!(run(&mut it, "(eq \"s\" \"s\")"), Ok("nil".into()));

        run(&mut it, "(set-value 'l '(1 2))").unwrap();
        assert_eq!(run(&mut it, "(eq l l)"), Ok("true".into()));
        assert_eq!(run(&mut it, "(eq (cdr l) (cdr l))"), Ok("true".into()));
    }

    #[test]
    fn symbol_cells() {
        let mut it = Interp::new();

        assert_eq!(run(&mut it, "(set-value 'v 10)"), Ok("10".into()));
        assert_eq!(run(&mut it, "v"), Ok("10".into()));
        assert_eq!(run(&mut it, "(set-value 'v 'other)"), Ok("other".into()));
        assert_eq!(run(&mut it, "v"), Ok("other".into()));
        assert_eq!(run(&mut it, "(set-value 5 10)"), Err(Error::NotASymbol));

        run(&mut it, "(set-function 'inc (fn (x) (+ x 1)))").unwrap();
        assert_eq!(run(&mut it, "(inc 4)"), Ok("5".into()));
        // the cells are independent
        assert_eq!(
            run(&mut it, "inc"),
            Err(Error::UnboundVariable("inc".into()))
        );
        assert_eq!(run(&mut it, "(set-function 'inc 5)"), Err(Error::NotAFunction));
        assert_eq!(
            run(&mut it, "(set-function \"inc\" (fn () 1))"),
            Err(Error::NotASymbol)
        );
    }

    #[test]
    fn special_forms_are_fixed() {
        let mut it = Interp::new();

        for name in ["do", "fn", "if", "quote"] {
            let code = format!("(set-function '{name} (fn () 1))");
            assert_eq!(
                run(&mut it, &code),
                Err(Error::InvalidFunction(format!(
                    "cannot redefine special form {name}"
                )))
            );
        }
        assert_eq!(run(&mut it, "(if nil 1 2)"), Ok("2".into()));

        // builtins may be replaced
        run(&mut it, "(defn car (x) 'mine)").unwrap();
        assert_eq!(run(&mut it, "(car '(1))"), Ok("mine".into()));
    }

    #[test]
    fn function_lookup() {
        let mut it = Interp::new();
        assert_eq!(run(&mut it, "(function 'car)"), Ok("<fn arity:1 rest:NO>".into()));
        assert_eq!(run(&mut it, "(function 'list)"), Ok("<fn arity:0 rest:YES>".into()));
        assert_eq!(run(&mut it, "(function 'apply)"), Ok("<fn arity:2 rest:NO>".into()));
        assert_eq!(run(&mut it, "(function (fn (x) x))"), Ok("<fn arity:1 rest:NO>".into()));
        assert_eq!(
            run(&mut it, "(eq (function 'cons) (function 'cons))"),
            Ok("true".into())
        );
        assert_eq!(
            run(&mut it, "(function 'nothing)"),
            Err(Error::UndefinedFunction("nothing".into()))
        );
        assert_eq!(run(&mut it, "(function 4)"), Err(Error::NotASymbol));
    }

    #[test]
    fn macros_from_lambdas_only() {
        let mut it = Interp::new();

        run(&mut it, "(set-value 'f (fn (x) (list 'quote x)))").unwrap();
        assert_eq!(run(&mut it, "(eq (macro! f) f)"), Ok("true".into()));
        run(&mut it, "(set-function 'q f)").unwrap();
        assert_eq!(run(&mut it, "(q (a b))"), Ok("(a b)".into()));

        assert!(matches!(
            run(&mut it, "(macro! (function 'car))"),
            Err(Error::InvalidFunction(_))
        ));
        assert!(matches!(
            run(&mut it, "(macro! (function 'if))"),
            Err(Error::InvalidFunction(_))
        ));
        assert_eq!(run(&mut it, "(macro! 1)"), Err(Error::NotAFunction));
    }

    #[test]
    fn prelude() {
        let mut it = Interp::new();

        assert_eq!(
            run(&mut it, "(defn sq (x) (* x x)) (sq 12)"),
            Ok("144".into())
        );
        assert_eq!(
            run(&mut it, "(defmacro swap (a b) (list b a)) (swap 3 car)"),
            Err(Error::NotAList)
        );
        assert_eq!(
            run(&mut it, "(swap '(1 2) cdr)"),
            Ok("(2)".into())
        );
        assert_eq!(
            run(&mut it, "(defn many (& xs) xs) (many 1 2)"),
            Ok("(1 2)".into())
        );
    }

    #[test]
    fn without_prelude() {
        let mut it = Interp::with_config(Config {
            prelude: false,
            ..Config::default()
        });

        assert_eq!(
            run(&mut it, "(defn f () 1)"),
            Err(Error::UndefinedFunction("defn".into()))
        );
        assert_eq!(run(&mut it, "(car '(1))"), Ok("1".into()));
    }

    #[test]
    fn tables_are_consistent() {
        for &(name, _, arity, rest) in BUILTINS {
            assert!(!name.is_empty());
            assert!(arity <= 2, "{name}");
            assert_eq!(rest, name == "list", "{name}");
        }

        let it = Interp::new();
        for &(name, _) in SPECIAL_FORMS {
            let sym = it.symtab.lookup_by_name(name).unwrap();
            let func = it.symbol_function(sym).unwrap();
            assert_eq!(it.function_get(func).kind, FnKind::SpecialForm);
        }
    }
}
