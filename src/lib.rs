// KESTREL, a small Lisp runtime.

// SPDX-FileCopyrightText: © 2021 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// KESTREL is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/lib.rs

// Crate root.

// <>

//! KESTREL: a Lisp runtime built around a copying collector and a
//! continuation-passing evaluator
//!
//! ```
//! use kestrel::lisp::Interp;
//!
//! let mut it = Interp::new();
//! assert_eq!(it.interpret("(defn sq (x) (* x x)) (sq 7)").unwrap(), "49");
//! ```

pub mod lisp;
