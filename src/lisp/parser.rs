// KESTREL, a small Lisp runtime.

// SPDX-FileCopyrightText: © 2021 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// KESTREL is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/lisp/parser.rs

// The reader. Turns source text into heap data, interning symbols as
// it meets them.

// <>

use super::types::{Ref, NIL, TRUE};
use super::{Error, Interp};

use std::iter;
use std::str;

/// Reader state over one source text
pub struct Parser<'a> {
    chars: iter::Peekable<str::Bytes<'a>>,
    /// Accumulator for token and string bytes
    acc: Vec<u8>,
}

impl<'a> Parser<'a> {
    pub fn new(code: &'a str) -> Self {
        Self {
            chars: code.bytes().peekable(),
            acc: Vec::new(),
        }
    }

    /// Reads exactly one datum; `EndOfInput` if none remains
    pub fn read_one(&mut self, it: &mut Interp) -> Result<Ref, Error> {
        let depth = it.pin_depth();
        let out = match self.skip_space() {
            Some(c) => self.read_value(it, c),
            None => Err(Error::EndOfInput),
        };
        it.unpin_to(depth);
        out
    }

    /// Reads every remaining datum into a list
    pub fn read_all(&mut self, it: &mut Interp) -> Result<Ref, Error> {
        let depth = it.pin_depth();
        let out = self.read_seq(it, false);
        it.unpin_to(depth);
        out
    }

    /// Skips whitespace and comments, returning the next byte without
    /// consuming it
    fn skip_space(&mut self) -> Option<u8> {
        loop {
            match *self.chars.peek()? {
                b';' => while !matches!(self.chars.next(), Some(b'\n') | None) {},
                c if c.is_ascii_whitespace() => {
                    self.chars.next();
                }
                c => return Some(c),
            }
        }
    }

    /// Returns a contiguous value parsed from the input stream
    /// The appropriate reader can be deduced from the first character
    fn read_value(&mut self, it: &mut Interp, c: u8) -> Result<Ref, Error> {
        match c {
            b'(' => {
                self.chars.next();
                self.read_seq(it, true)
            }
            b'"' => {
                self.chars.next();
                self.read_string(it)
            }
            b'\'' => {
                self.chars.next();
                self.read_quote(it)
            }
            b')' => Err(Error::InvalidToken(")".to_string())),
            _ => {
                self.read_token();
                self.parse_token(it)
            }
        }
    }

    /// Builds a list front to back, holding its head and tail in the
    /// pin stack while elements are read
    ///
    /// Inside parentheses, consumes the closing `)` and accepts one
    /// dotted tail; at top level, runs until the input is exhausted.
    fn read_seq(&mut self, it: &mut Interp, in_list: bool) -> Result<Ref, Error> {
        let head = it.pin_depth();
        let tail = head + 1;
        it.pin(NIL);
        it.pin(NIL);

        loop {
            let c = match self.skip_space() {
                Some(c) => c,
                None if in_list => return Err(Error::UnterminatedList),
                None => break,
            };

            let val = match c {
                b')' if in_list => {
                    self.chars.next();
                    break;
                }
                b')' => {
                    self.chars.next();
                    return Err(Error::InvalidToken(")".to_string()));
                }
                b'.' if in_list => {
                    self.read_token();
                    if self.acc == b"." {
                        if it.pins[head] == NIL {
                            return Err(Error::InvalidToken(".".to_string()));
                        }
                        let last = self.read_dotted_tail(it)?;
                        let end = it.pins[tail];
                        it.set_cdr(end, last);
                        break;
                    }
                    self.parse_token(it)?
                }
                c => self.read_element(it, c)?,
            };

            let cell = it.cons(val, NIL);
            if it.pins[head] == NIL {
                it.pins[head] = cell;
            } else {
                let end = it.pins[tail];
                it.set_cdr(end, cell);
            }
            it.pins[tail] = cell;
        }

        it.unpin();
        Ok(it.unpin())
    }

    /// A datum inside an open list; running out of input there leaves
    /// the list unterminated
    fn read_element(&mut self, it: &mut Interp, c: u8) -> Result<Ref, Error> {
        self.read_value(it, c).map_err(|err| match err {
            Error::EndOfInput => Error::UnterminatedList,
            err => err,
        })
    }

    /// The datum after a lone `.`, which must be the last in its list
    fn read_dotted_tail(&mut self, it: &mut Interp) -> Result<Ref, Error> {
        let last = match self.skip_space() {
            Some(b')') => return Err(Error::InvalidToken(".".to_string())),
            Some(c) => self.read_element(it, c)?,
            None => return Err(Error::UnterminatedList),
        };

        match self.skip_space() {
            Some(b')') => {
                self.chars.next();
                Ok(last)
            }
            Some(_) => Err(Error::InvalidToken(".".to_string())),
            None => Err(Error::UnterminatedList),
        }
    }

    /// Raw bytes up to the closing quote; no escapes
    fn read_string(&mut self, it: &mut Interp) -> Result<Ref, Error> {
        self.acc.clear();
        loop {
            match self.chars.next() {
                Some(b'"') => break,
                Some(c) => self.acc.push(c),
                None => return Err(Error::UnterminatedString),
            }
        }
        Ok(it.string(&self.acc))
    }

    /// `'x` becomes `(quote x)`
    fn read_quote(&mut self, it: &mut Interp) -> Result<Ref, Error> {
        let val = match self.skip_space() {
            Some(c) => self.read_value(it, c)?,
            None => return Err(Error::EndOfInput),
        };
        let tail = it.cons(val, NIL);
        Ok(it.cons(it.syms.quote, tail))
    }

    /// Collects a bare token; stops at whitespace or before a `)`
    fn read_token(&mut self) {
        self.acc.clear();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_whitespace() || c == b')' {
                break;
            }
            self.acc.push(c);
            self.chars.next();
        }
    }

    /// Classifies the accumulated token
    fn parse_token(&mut self, it: &mut Interp) -> Result<Ref, Error> {
        match &self.acc[..] {
            b"" => return Err(Error::InvalidToken(String::new())),
            b"nil" => return Ok(NIL),
            b"true" => return Ok(TRUE),
            _ => (),
        }

        if integer_p(&self.acc) {
            return process_num(&self.acc);
        }

        if self.acc.iter().all(|&c| ident_char_p(c)) {
            if let Ok(name) = str::from_utf8(&self.acc) {
                return Ok(it.intern(name));
            }
        }

        Err(Error::InvalidToken(
            String::from_utf8_lossy(&self.acc).into_owned(),
        ))
    }
}

/// Optional sign, then one or more decimal digits
fn integer_p(token: &[u8]) -> bool {
    let digits = match token.first() {
        Some(b'+') | Some(b'-') => &token[1..],
        _ => token,
    };
    !digits.is_empty() && digits.iter().all(u8::is_ascii_digit)
}

fn process_num(token: &[u8]) -> Result<Ref, Error> {
    let text = str::from_utf8(token).map_err(|_| Error::InvalidToken(String::new()))?;
    match text.parse::<i64>() {
        Ok(n) => Ref::fixnum(n).map_err(|_| Error::BignumsUnsupported),
        Err(_) => Err(Error::BignumsUnsupported),
    }
}

fn ident_char_p(c: u8) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            b'!' | b'&'
                | b'+'
                | b'?'
                | b'^'
                | b'_'
                | b'-'
                | b'<'
                | b'>'
                | b'$'
                | b'='
                | b'.'
                | b'%'
                | b'*'
                | b'/'
                | b'~'
        )
}

/// Parses exactly one datum from `code`, rejecting anything after it
/// other than whitespace and comments
pub fn parse(it: &mut Interp, code: &str) -> Result<Ref, Error> {
    let mut parser = Parser::new(code);
    let val = parser.read_one(it)?;

    match parser.skip_space() {
        None => Ok(val),
        Some(_) => {
            parser.read_token();
            Err(Error::InvalidToken(
                String::from_utf8_lossy(&parser.acc).into_owned(),
            ))
        }
    }
}

impl Interp {
    /// Reads every datum in `code` into a list
    pub fn read_all(&mut self, code: &str) -> Result<Ref, Error> {
        Parser::new(code).read_all(self)
    }

    /// Reads the first datum in `code`
    pub fn read_one(&mut self, code: &str) -> Result<Ref, Error> {
        Parser::new(code).read_one(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lisp::Config;

    fn interp() -> Interp {
        Interp::with_config(Config {
            zone_size: 512,
            prelude: false,
            ..Config::default()
        })
    }

    fn read(it: &mut Interp, code: &str) -> String {
        let val = parse(it, code).unwrap();
        it.print(val)
    }

    #[test]
    fn atoms() {
        let mut it = interp();

        assert_eq!(parse(&mut it, "nil"), Ok(NIL));
        assert_eq!(parse(&mut it, "true"), Ok(TRUE));
        assert_eq!(parse(&mut it, "42"), Ok(Ref::fixnum(42).unwrap()));
        assert_eq!(parse(&mut it, "-17"), Ok(Ref::fixnum(-17).unwrap()));
        assert_eq!(parse(&mut it, "+8"), Ok(Ref::fixnum(8).unwrap()));

        let sym = parse(&mut it, "set-value!").unwrap();
        assert_eq!(sym, it.intern("set-value!"));

        for name in ["+", "-", "1+", "<=", "a.b", "&", "~x%$^"] {
            let sym = parse(&mut it, name).unwrap();
            assert_eq!(it.symbol_name(sym), Ok(name));
        }

        let s = parse(&mut it, "\"a (string) ; here\"").unwrap();
        assert_eq!(it.string_get(s), Ok(&b"a (string) ; here"[..]));
    }

    #[test]
    fn lists() {
        let mut it = interp();

        assert_eq!(read(&mut it, "()"), "nil");
        assert_eq!(read(&mut it, "(1 2 3)"), "(1 2 3)");
        assert_eq!(read(&mut it, "  ( a (b (c)) ()  d )"), "(a (b (c)) nil d)");
        assert_eq!(read(&mut it, "(a . b)"), "(a . b)");
        assert_eq!(read(&mut it, "(a b . (c d))"), "(a b c d)");
        assert_eq!(read(&mut it, "(a .b)"), "(a .b)");
        assert_eq!(read(&mut it, "'x"), "(quote x)");
        assert_eq!(read(&mut it, "'(1 'b)"), "(quote (1 (quote b)))");
        assert_eq!(read(&mut it, "(a\n; comment (\n b ; last\n)"), "(a b)");
    }

    #[test]
    fn errors() {
        let mut it = interp();

        assert_eq!(parse(&mut it, "(1 2"), Err(Error::UnterminatedList));
        assert_eq!(parse(&mut it, "(1 (2)"), Err(Error::UnterminatedList));
        assert_eq!(parse(&mut it, "\"open"), Err(Error::UnterminatedString));
        assert_eq!(parse(&mut it, ""), Err(Error::EndOfInput));
        assert_eq!(parse(&mut it, "  ; only a comment"), Err(Error::EndOfInput));
        assert_eq!(parse(&mut it, "a[b"), Err(Error::InvalidToken("a[b".into())));
        assert_eq!(parse(&mut it, "#t"), Err(Error::InvalidToken("#t".into())));
        assert_eq!(parse(&mut it, "(. a)"), Err(Error::InvalidToken(".".into())));
        assert_eq!(parse(&mut it, "(a . b c)"), Err(Error::InvalidToken(".".into())));
        assert_eq!(parse(&mut it, "(a . )"), Err(Error::InvalidToken(".".into())));
        assert_eq!(parse(&mut it, "1 2"), Err(Error::InvalidToken("2".into())));
        assert_eq!(it.read_all("a )"), Err(Error::InvalidToken(")".into())));

        assert_eq!(parse(&mut it, "536870911"), Ok(Ref::fixnum(536870911).unwrap()));
        assert_eq!(parse(&mut it, "536870912"), Err(Error::BignumsUnsupported));
        assert_eq!(
            parse(&mut it, "-99999999999999999999999"),
            Err(Error::BignumsUnsupported)
        );

        assert_eq!(parse(&mut it, "(a ')"), Err(Error::InvalidToken(")".into())));
        assert_eq!(parse(&mut it, "')"), Err(Error::InvalidToken(")".into())));
        assert_eq!(parse(&mut it, ")"), Err(Error::InvalidToken(")".into())));
        assert_eq!(parse(&mut it, "(a '"), Err(Error::UnterminatedList));
        assert_eq!(parse(&mut it, "(a (b '"), Err(Error::UnterminatedList));
        assert_eq!(parse(&mut it, "(a . '"), Err(Error::UnterminatedList));
        assert_eq!(parse(&mut it, "'"), Err(Error::EndOfInput));
        assert_eq!(it.interpret("(list 1 '"), Err(Error::UnterminatedList));

        // a failed read leaves nothing pinned
        assert_eq!(it.pin_depth(), 0);
    }

    #[test]
    fn read_all_and_one() {
        let mut it = interp();

        let all = it.read_all("a 1 ; skip\n (b) \"c\"").unwrap();
        assert_eq!(it.print(all), "(a 1 (b) \"c\")");
        assert_eq!(it.read_all("  "), Ok(NIL));

        let mut parser = Parser::new("x (y) z");
        let mut seen = vec![];
        loop {
            match parser.read_one(&mut it) {
                Ok(val) => seen.push(it.print(val)),
                Err(Error::EndOfInput) => break,
                Err(e) => panic!("{e}"),
            }
        }
        assert_eq!(seen, ["x", "(y)", "z"]);
    }

    #[test]
    fn large_input_survives_collection() {
        let mut it = interp();

        let mut code = String::from("(");
        for i in 0..500 {
            code.push_str(&format!("(sym{} {} \"s{}\") ", i % 37, i, i));
        }
        code.push(')');

        let val = parse(&mut it, &code).unwrap();
        assert!(it.gc_stats().collections > 0);
        assert_eq!(it.length(val), Ok(500));
        assert_eq!(
            it.print(it.car(val).unwrap()),
            "(sym0 0 \"s0\")"
        );

        let root = it.protect(val);
        let last = it.read_one("(sym18 499 \"s499\")").unwrap();
        let mut pos = it.release(root);
        while it.cdr(pos).unwrap() != NIL {
            pos = it.cdr(pos).unwrap();
        }
        assert!(it.equal(it.car(pos).unwrap(), last));
    }
}
