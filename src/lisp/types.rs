// KESTREL, a small Lisp runtime.

// SPDX-FileCopyrightText: © 2021 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// KESTREL is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/lisp/types.rs

// Value representation. Defines the tagged reference word which every
// other component passes around, and the closed set of object kinds
// that may live in the heap behind a pointer reference.

// <>

use super::{Error, Interp};

use std::fmt;

/// Generates an enum along with a conversion from its `u8` discriminant
macro_rules! enum_and_tryfrom {
    ($(#[$meta:meta])* $vis:vis enum $name:ident {
        $($(#[$vmeta:meta])* $vname:ident $(= $val:expr)?,)*
    }) => {
        $(#[$meta])*
        $vis enum $name {
            $($(#[$vmeta])* $vname $(= $val)?,)*
        }

        impl std::convert::TryFrom<u8> for $name {
            type Error = ();

            #[inline(always)]
            fn try_from(v: u8) -> Result<Self, Self::Error> {
                match v {
                    $(x if x == $name::$vname as u8 => Ok($name::$vname),)*
                    _ => Err(()),
                }
            }
        }
    }
}

/// Fixnums are 30 bit signed integers
pub const FIXNUM_MAX: i64 = (1 << 29) - 1;
pub const FIXNUM_MIN: i64 = -(1 << 29);

/// Largest object index a pointer reference can carry
pub const MAX_INDEX: usize = (1 << 29) - 1;

const FIXNUM_MASK: u32 = 0b011;
const LOWTAG_MASK: u32 = 0b111;

/// A single machine word naming any runtime value
///
/// Lowtags:
/// - `x00` fixnum (eats two tags, giving 2^30 fixnums)
/// - `x10` other immediate (nil, true, unbound)
/// - `xx1` pointer, the full three bits selecting a `LowTag`
///
/// The remaining bits of a pointer hold the index of the object in the
/// current zone, so a reference is only meaningful for the zone it was
/// issued by; the collector rewrites every reachable one.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Ref(u32);

/// The empty list, and the only false value
pub const NIL: Ref = Ref(0b0010);
pub const TRUE: Ref = Ref(0b0110);
/// Marks an empty storage cell; the reader can never produce it
pub const UNBOUND: Ref = Ref(0b1010);

enum_and_tryfrom! {
    /// Pointer kinds, stored in the low three bits of a pointer reference
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    #[repr(u8)]
    pub enum LowTag {
        Continuation = 0b001,
        List = 0b011,
        Function = 0b101,
        Other = 0b111,
    }
}

enum_and_tryfrom! {
    /// Disambiguates objects behind an `Other` pointer
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    #[repr(u8)]
    pub enum Widetag {
        String,
        Symbol,
    }
}

impl Ref {
    /// Creates a fixnum, refusing values that do not fit in 30 bits
    #[inline(always)]
    pub fn fixnum(val: i64) -> Result<Self, Error> {
        if (FIXNUM_MIN..=FIXNUM_MAX).contains(&val) {
            Ok(Ref((val as i32 as u32) << 2))
        } else {
            Err(Error::OutOfRange(val))
        }
    }

    #[inline(always)]
    pub(super) fn pointer(index: usize, tag: LowTag) -> Self {
        assert!(index <= MAX_INDEX, "object index out of range");
        Ref(((index as u32) << 3) | tag as u32)
    }

    #[inline(always)]
    pub const fn fixnum_p(self) -> bool {
        self.0 & FIXNUM_MASK == 0
    }

    #[inline(always)]
    pub const fn immediate_p(self) -> bool {
        self.0 & FIXNUM_MASK == 0b10
    }

    #[inline(always)]
    pub const fn pointer_p(self) -> bool {
        self.0 & 1 == 1
    }

    /// Returns the pointer kind, or None for fixnums and immediates
    #[inline(always)]
    pub fn low_tag(self) -> Option<LowTag> {
        if self.pointer_p() {
            LowTag::try_from((self.0 & LOWTAG_MASK) as u8).ok()
        } else {
            None
        }
    }

    /// Reads back the value of a fixnum
    #[inline(always)]
    pub fn fixnum_get(self) -> i64 {
        assert!(self.fixnum_p());
        ((self.0 as i32) >> 2) as i64
    }

    #[inline(always)]
    pub(super) fn index(self) -> usize {
        assert!(self.pointer_p());
        (self.0 >> 3) as usize
    }

    /// Raw word, mostly for debug readouts
    #[inline(always)]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            NIL => write!(f, "NIL"),
            TRUE => write!(f, "TRUE"),
            UNBOUND => write!(f, "UNBOUND"),
            r if r.fixnum_p() => write!(f, "Fixnum({})", r.fixnum_get()),
            r => write!(f, "{:?}@{}", r.low_tag(), r.index()),
        }
    }
}

enum_and_tryfrom! {
    /// Determines how a call to a function treats its argument forms
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    #[repr(u8)]
    pub enum FnKind {
        /// Native code, evaluated arguments
        Builtin,
        /// Interpreted body, evaluated arguments
        Lambda,
        /// Interpreted body, unevaluated arguments, result evaluated again
        Macro,
        /// Evaluator logic, unevaluated arguments
        SpecialForm,
    }
}

enum_and_tryfrom! {
    /// The four forms handled directly by the evaluator
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    #[repr(u8)]
    pub enum Form {
        Do,
        Fn,
        If,
        Quote,
    }
}

enum_and_tryfrom! {
    /// Builtins which must drive the evaluator rather than return a value
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    #[repr(u8)]
    pub enum Intrinsic {
        Apply,
        MacroExpand,
        MacroExpand1,
    }
}

enum_and_tryfrom! {
    /// Operation code for a continuation frame; selects what the frame
    /// does with the value handed back to it
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    #[repr(u8)]
    pub enum Opcode {
        /// Bottom of every evaluation; value is the final result
        End,

        /// Original form; expansion of a macro call arrives
        Expand,

        /// Same as Expand, but returns the expansion unevaluated
        MacroExpand,

        /// Argument forms; evaluated operator arrives
        Head,

        /// Function, remaining argument forms, evaluated arguments
        /// (reversed); value of one argument arrives
        ApplyArg,

        /// Function; full argument list arrives
        ApplyFn,

        /// Remaining body forms; value of the last one arrives
        DoSeq,

        /// Both branches; value of the test arrives
        Branch,
    }
}

pub type NativeFn = fn(&mut Interp, Ref) -> Result<Ref, Error>;

/// The body of a function object
#[derive(Clone, Copy)]
pub enum Code {
    Native(NativeFn),
    Intrinsic(Intrinsic),
    Special(Form),
    Lambda { formals: Ref, body: Ref, closure: Ref },
}

/// Function objects share one layout regardless of kind
#[derive(Clone, Copy)]
pub struct Function {
    pub kind: FnKind,
    pub arity: u16,
    pub rest: bool,
    pub code: Code,
}

/// One reified evaluator frame
#[derive(Clone, Copy, Debug)]
pub struct Cont {
    pub op: Opcode,
    /// The frame to resume once this one is done
    pub saved: Ref,
    /// Lexical bindings in effect for this frame
    pub closure: Ref,
    pub val: Ref,
    pub todo: Ref,
    pub done: Ref,
}

/// Every kind of object that can live in the heap
pub enum Obj {
    Cons { car: Ref, cdr: Ref },
    Symbol { value: Ref, function: Ref, name: Box<str> },
    String(Box<[u8]>),
    Function(Function),
    Cont(Cont),
    /// Left behind in an abandoned zone once its object has been copied out
    Moved,
}

/// Object header, counted once for every object
pub const HEAD_LEN: usize = 4;
pub const REF_LEN: usize = 4;
/// All objects are allocated on 8 byte boundaries
pub const ALIGN: usize = 8;

#[inline(always)]
pub const fn align_up(size: usize) -> usize {
    (size + ALIGN - 1) & !(ALIGN - 1)
}

impl Obj {
    /// The pointer kind a reference to this object must carry
    #[inline(always)]
    pub fn low_tag(&self) -> LowTag {
        match self {
            Obj::Cons { .. } => LowTag::List,
            Obj::Function(_) => LowTag::Function,
            Obj::Cont(_) => LowTag::Continuation,
            Obj::Symbol { .. } | Obj::String(_) => LowTag::Other,
            Obj::Moved => unreachable!("moved object has no tag"),
        }
    }

    #[inline(always)]
    pub fn widetag(&self) -> Option<Widetag> {
        match self {
            Obj::Symbol { .. } => Some(Widetag::Symbol),
            Obj::String(_) => Some(Widetag::String),
            _ => None,
        }
    }

    /// Bytes this object occupies in a zone, header and padding included
    pub fn size(&self) -> usize {
        align_up(match self {
            Obj::Cons { .. } => HEAD_LEN + 2 * REF_LEN,
            // value, function, name length, name bytes and terminator
            Obj::Symbol { name, .. } => HEAD_LEN + 3 * REF_LEN + name.len() + 1,
            // length, bytes and terminator
            Obj::String(bytes) => HEAD_LEN + REF_LEN + bytes.len() + 1,
            // kind / arity / rest word, then code or three lambda fields
            Obj::Function(_) => HEAD_LEN + REF_LEN + 3 * REF_LEN,
            Obj::Cont(_) => HEAD_LEN + 5 * REF_LEN,
            Obj::Moved => unreachable!("moved object has no size"),
        })
    }

    /// Passes every reference held by this object through `f`, storing
    /// back whatever it returns
    pub fn trace(&mut self, mut f: impl FnMut(Ref) -> Ref) {
        match self {
            Obj::Cons { car, cdr } => {
                *car = f(*car);
                *cdr = f(*cdr);
            }
            Obj::Symbol {
                value, function, ..
            } => {
                *value = f(*value);
                *function = f(*function);
            }
            Obj::String(_) => (),
            Obj::Function(Function {
                code: Code::Lambda {
                    formals,
                    body,
                    closure,
                },
                ..
            }) => {
                *formals = f(*formals);
                *body = f(*body);
                *closure = f(*closure);
            }
            Obj::Function(_) => (),
            Obj::Cont(cont) => {
                cont.saved = f(cont.saved);
                cont.closure = f(cont.closure);
                cont.val = f(cont.val);
                cont.todo = f(cont.todo);
                cont.done = f(cont.done);
            }
            Obj::Moved => unreachable!("tracing a moved object"),
        }
    }
}
