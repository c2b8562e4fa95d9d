// KESTREL, a small Lisp runtime.

// SPDX-FileCopyrightText: © 2021 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// KESTREL is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/lisp/memmgt.rs

// Memory management. A region owns one zone at a time, into which
// objects are bump allocated; when the zone fills up, a copying pass
// moves everything reachable from the roots into a fresh zone and the
// old one is released wholesale.

// <>

use super::types::{Obj, Ref, ALIGN};

use rustc_hash::FxHashMap;

use std::mem;

/// A zone is a contiguous run of object slots with a byte budget
pub struct Zone {
    /// Objects in allocation order; a reference indexes into this
    objs: Vec<Obj>,
    /// Bytes consumed so far
    used: usize,
    /// Byte budget of the zone
    size: usize,
    /// Unique zone identifier (per region)
    id: u32,
}

impl Zone {
    fn new(size: usize, id: u32) -> Self {
        Self {
            objs: Vec::with_capacity(size / (2 * ALIGN)),
            used: 0,
            size,
            id,
        }
    }
}

/// Snapshot of the collector's bookkeeping
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Collections run since the region was created
    pub collections: usize,
    /// Byte budget of the current zone
    pub zone_size: usize,
    /// Bytes in use in the current zone
    pub used: usize,
    /// Objects in the current zone
    pub objects: usize,
}

/// A memory region: the current zone plus the limits on its growth
pub struct Region {
    zone: Zone,
    /// No zone may grow beyond this many bytes
    max_zone_size: usize,
    next_zone_id: u32,
    collections: usize,
    /// High while a copying pass is running
    collecting: bool,
}

impl Region {
    /// Creates a new region with an initial zone of `zone_size` bytes
    pub fn new(zone_size: usize, max_zone_size: usize) -> Self {
        let zone_size = zone_size.max(ALIGN * 8);
        assert!(zone_size <= max_zone_size, "zone larger than its limit");

        if cfg!(feature = "memdbg") {
            log::debug!("creating region, zone size {zone_size}");
        }

        Self {
            zone: Zone::new(zone_size, 0),
            max_zone_size,
            next_zone_id: 1,
            collections: 0,
            collecting: false,
        }
    }

    /// Determines whether `size` more bytes fit in the current zone
    #[inline(always)]
    pub fn has_room(&self, size: usize) -> bool {
        self.zone.used + size <= self.zone.size
    }

    /// Bump allocates an object, returning a reference tagged for its kind
    ///
    /// The caller must have made room first (see `Interp::alloc`)
    pub fn place(&mut self, obj: Obj) -> Ref {
        let size = obj.size();
        assert!(!self.collecting);
        assert!(self.has_room(size), "allocation without room");

        let tag = obj.low_tag();
        let index = self.zone.objs.len();

        self.zone.objs.push(obj);
        self.zone.used += size;

        if cfg!(feature = "memdbg") {
            log::debug!(
                "O {index} BIRTH (z {} s {size:3} t {tag:?})",
                self.zone.id
            );
        }

        Ref::pointer(index, tag)
    }

    /// Follows a pointer reference to its object
    #[inline(always)]
    pub fn get(&self, loc: Ref) -> &Obj {
        match self.zone.objs.get(loc.index()) {
            Some(Obj::Moved) | None => panic!("INVALID reference {:?}", loc),
            Some(obj) => obj,
        }
    }

    #[inline(always)]
    pub fn get_mut(&mut self, loc: Ref) -> &mut Obj {
        match self.zone.objs.get_mut(loc.index()) {
            Some(Obj::Moved) | None => panic!("INVALID reference {:?}", loc),
            Some(obj) => obj,
        }
    }

    pub fn stats(&self) -> GcStats {
        GcStats {
            collections: self.collections,
            zone_size: self.zone.size,
            used: self.zone.used,
            objects: self.zone.objs.len(),
        }
    }

    /// Collects garbage so that `need` more bytes fit, rewriting every
    /// root in place
    ///
    /// The first pass copies into a zone of the same size. If that does
    /// not leave enough room, or leaves the zone crowded, a second pass
    /// copies into a zone at least twice as large. Running out of room
    /// beyond that is fatal: the live set itself cannot fit.
    pub fn collect(&mut self, roots: &mut [Ref], need: usize) {
        assert!(!self.collecting, "collector entered twice");
        self.collecting = true;

        let before = self.zone.used;
        let size = self.zone.size;

        self.evacuate(roots, size);

        let crowded = self.zone.used > size / 4 * 3;
        if !self.has_room(need) || crowded {
            let mut bigger = size * 2;
            while bigger < self.zone.used + need {
                bigger *= 2;
            }

            if bigger <= self.max_zone_size {
                log::info!("growing zone from {size} to {bigger} bytes");
                self.evacuate(roots, bigger);
            }

            if !self.has_room(need) {
                self.exhausted(need);
            }
        }

        self.collections += 1;
        self.collecting = false;

        log::debug!(
            "gc {}: {} -> {} bytes live, zone {} ({} objects)",
            self.collections,
            before,
            self.zone.used,
            self.zone.size,
            self.zone.objs.len()
        );
    }

    /// Breadth first copy of everything reachable from `roots` into a
    /// new zone of `size` bytes
    fn evacuate(&mut self, roots: &mut [Ref], size: usize) {
        let id = self.next_zone_id;
        self.next_zone_id += 1;

        let mut from = mem::replace(&mut self.zone, Zone::new(size, id));
        let to = &mut self.zone;

        // forwarding addresses, keyed by index in the old zone
        let mut fwd: FxHashMap<usize, Ref> = FxHashMap::default();

        for root in roots.iter_mut() {
            *root = forward(to, &mut from, &mut fwd, *root);
        }

        // objects below scan have had their fields rewritten
        let mut scan = 0;
        while scan < to.objs.len() {
            let mut obj = mem::replace(&mut to.objs[scan], Obj::Moved);
            obj.trace(|r| forward(to, &mut from, &mut fwd, r));
            to.objs[scan] = obj;
            scan += 1;
        }

        if cfg!(feature = "memdbg") {
            log::debug!(
                "zone {} released ({} objects), zone {} holds {}",
                from.id,
                from.objs.len(),
                to.id,
                to.objs.len()
            );
        }
    }

    fn exhausted(&self, need: usize) -> ! {
        log::error!(
            "heap exhausted: {} bytes live, {} requested, zone limit {}",
            self.zone.used,
            need,
            self.max_zone_size
        );
        panic!(
            "heap exhausted: {} bytes live, {} requested, zone limit {}",
            self.zone.used, need, self.max_zone_size
        )
    }
}

/// Returns the new location of a reference, copying its object into
/// `to` on first encounter
fn forward(to: &mut Zone, from: &mut Zone, fwd: &mut FxHashMap<usize, Ref>, loc: Ref) -> Ref {
    if !loc.pointer_p() {
        return loc;
    }

    let old = loc.index();
    if let Some(&new) = fwd.get(&old) {
        return new;
    }

    let obj = mem::replace(&mut from.objs[old], Obj::Moved);
    let tag = obj.low_tag();
    assert_eq!(Some(tag), loc.low_tag(), "reference tag disagrees with object");

    let new = Ref::pointer(to.objs.len(), tag);
    to.used += obj.size();
    to.objs.push(obj);
    fwd.insert(old, new);

    new
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lisp::types::{LowTag, NIL, TRUE};

    fn cons(reg: &mut Region, car: Ref, cdr: Ref) -> Ref {
        reg.place(Obj::Cons { car, cdr })
    }

    fn car(reg: &Region, loc: Ref) -> Ref {
        match reg.get(loc) {
            Obj::Cons { car, .. } => *car,
            _ => panic!("not a cons"),
        }
    }

    fn cdr(reg: &Region, loc: Ref) -> Ref {
        match reg.get(loc) {
            Obj::Cons { cdr, .. } => *cdr,
            _ => panic!("not a cons"),
        }
    }

    fn fix(n: i64) -> Ref {
        Ref::fixnum(n).unwrap()
    }

    #[test]
    fn bump_alloc() {
        let mut reg = Region::new(1024, 4096);

        let a = cons(&mut reg, fix(1), NIL);
        let b = reg.place(Obj::String(Box::from(&b"abc"[..])));

        assert_eq!(a.low_tag(), Some(LowTag::List));
        assert_eq!(b.low_tag(), Some(LowTag::Other));
        assert_eq!(reg.stats().used, 16 + 16);
        assert_eq!(reg.stats().objects, 2);
        assert!(reg.has_room(1024 - 32));
        assert!(!reg.has_room(1024 - 31));
    }

    #[test]
    fn collect_preserves_reachable() {
        let mut reg = Region::new(1024, 4096);

        // (1 2 3), with garbage interleaved
        let mut list = NIL;
        for i in (1..=3).rev() {
            cons(&mut reg, fix(100), fix(200));
            list = cons(&mut reg, fix(i), list);
        }
        let text = reg.place(Obj::String(Box::from(&b"kept"[..])));
        let pair = cons(&mut reg, text, TRUE);

        let mut roots = [list, pair, fix(9)];
        reg.collect(&mut roots, 0);

        assert_eq!(reg.stats().objects, 5);
        assert_eq!(reg.stats().collections, 1);
        assert_eq!(roots[2], fix(9));

        let [list, pair, _] = roots;
        assert_eq!(car(&reg, list), fix(1));
        assert_eq!(car(&reg, cdr(&reg, list)), fix(2));
        assert_eq!(car(&reg, cdr(&reg, cdr(&reg, list))), fix(3));
        assert_eq!(cdr(&reg, cdr(&reg, cdr(&reg, list))), NIL);

        assert_eq!(cdr(&reg, pair), TRUE);
        match reg.get(car(&reg, pair)) {
            Obj::String(bytes) => assert_eq!(&bytes[..], b"kept"),
            _ => panic!("string lost"),
        }
    }

    #[test]
    fn collect_cycles_and_sharing() {
        let mut reg = Region::new(1024, 4096);

        let a = cons(&mut reg, fix(1), NIL);
        let b = cons(&mut reg, fix(2), a);
        if let Obj::Cons { cdr, .. } = reg.get_mut(a) {
            *cdr = b;
        }

        let mut roots = [a, b, a];
        reg.collect(&mut roots, 0);

        assert_eq!(reg.stats().objects, 2);
        assert_eq!(roots[0], roots[2]);
        assert_eq!(cdr(&reg, roots[0]), roots[1]);
        assert_eq!(cdr(&reg, roots[1]), roots[0]);
        assert_eq!(car(&reg, roots[1]), fix(2));
    }

    #[test]
    fn grows_when_crowded() {
        let mut reg = Region::new(256, 4096);

        let mut list = NIL;
        for i in 0..14 {
            list = cons(&mut reg, fix(i), list);
        }
        assert_eq!(reg.stats().used, 224);

        let mut roots = [list];
        reg.collect(&mut roots, 64);

        let stats = reg.stats();
        assert_eq!(stats.zone_size, 512);
        assert_eq!(stats.used, 224);
        assert!(reg.has_room(64));

        let mut pos = roots[0];
        for i in (0..14).rev() {
            assert_eq!(car(&reg, pos), fix(i));
            pos = cdr(&reg, pos);
        }
        assert_eq!(pos, NIL);
    }

    #[test]
    #[should_panic(expected = "heap exhausted")]
    fn fatal_when_live_set_too_large() {
        let mut reg = Region::new(256, 256);

        let mut list = NIL;
        for i in 0..16 {
            list = cons(&mut reg, fix(i), list);
        }

        let mut roots = [list];
        reg.collect(&mut roots, 16);
    }
}
