//! Immutable interned strings.
//!
//! Strings carry a precomputed length and FNV-1a hash and are deduplicated
//! through [`InternSet`], a weak open-addressed set: the set never keeps a
//! string alive, and the sweep phase of every collection drops entries
//! whose string was not reached.

use core_types::Value;

use crate::heap::{Header, Heap, ObjectKind};

/// Heap string: header, hash, length, then the bytes inline.
#[repr(C)]
pub struct Str {
    pub(crate) hdr: Header,
    pub(crate) hash: u32,
    pub(crate) len: u32,
}

impl Str {
    /// Intern `s`, allocating only when it is not already present.
    /// Returns null when the allocator fails.
    pub(crate) fn create(heap: &mut Heap, s: &str) -> *mut Str {
        let hash = fnv1a(s.as_bytes());
        if let Some(existing) = heap.interns.lookup(hash, s.as_bytes()) {
            return existing;
        }

        let total = std::mem::size_of::<Str>() + s.len();
        let hdr = heap.alloc_raw(ObjectKind::String, total);
        if hdr.is_null() {
            return std::ptr::null_mut();
        }
        let p = hdr as *mut Str;
        unsafe {
            (*p).hash = hash;
            (*p).len = s.len() as u32;
            std::ptr::copy_nonoverlapping(s.as_ptr(), Str::data(p), s.len());
        }
        heap.interns.insert(p);
        p
    }

    fn data(p: *mut Str) -> *mut u8 {
        unsafe { (p as *mut u8).add(std::mem::size_of::<Str>()) }
    }

    /// The byte contents.
    pub(crate) unsafe fn bytes<'a>(p: *const Str) -> &'a [u8] {
        std::slice::from_raw_parts(Str::data(p as *mut Str), (*p).len as usize)
    }

    /// The contents as UTF-8. Strings are only created from `&str`.
    pub(crate) unsafe fn as_str<'a>(p: *const Str) -> &'a str {
        std::str::from_utf8_unchecked(Str::bytes(p))
    }

    pub(crate) fn value(p: *mut Str) -> Value {
        unsafe { (*p).hdr.value() }
    }
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Weak open-addressed set of interned strings, keyed by hash with linear
/// probing. Entries are raw pointers; liveness is owned by the GC.
pub(crate) struct InternSet {
    slots: Vec<*mut Str>,
    count: usize,
}

impl InternSet {
    pub(crate) fn new() -> InternSet {
        InternSet {
            slots: vec![std::ptr::null_mut(); 64],
            count: 0,
        }
    }

    pub(crate) fn lookup(&self, hash: u32, bytes: &[u8]) -> Option<*mut Str> {
        let mask = self.slots.len() - 1;
        let mut i = hash as usize & mask;
        loop {
            let slot = self.slots[i];
            if slot.is_null() {
                return None;
            }
            unsafe {
                if (*slot).hash == hash && Str::bytes(slot) == bytes {
                    return Some(slot);
                }
            }
            i = (i + 1) & mask;
        }
    }

    pub(crate) fn insert(&mut self, s: *mut Str) {
        if (self.count + 1) * 4 > self.slots.len() * 3 {
            self.grow(self.slots.len() * 2);
        }
        let mask = self.slots.len() - 1;
        let mut i = unsafe { (*s).hash } as usize & mask;
        while !self.slots[i].is_null() {
            i = (i + 1) & mask;
        }
        self.slots[i] = s;
        self.count += 1;
    }

    fn grow(&mut self, new_len: usize) {
        let old = std::mem::replace(&mut self.slots, vec![std::ptr::null_mut(); new_len]);
        self.count = 0;
        for s in old {
            if !s.is_null() {
                self.insert(s);
            }
        }
    }

    /// Drop every entry whose string was not marked this cycle. Runs after
    /// the page sweep but before dead pages are returned, so dead headers
    /// are still readable (and show up as `Free`).
    pub(crate) fn sweep(&mut self, stage: u8) {
        let survivors: Vec<*mut Str> = self
            .slots
            .iter()
            .copied()
            .filter(|&s| {
                !s.is_null()
                    && unsafe { (*s).hdr.kind == ObjectKind::String && (*s).hdr.stage == stage }
            })
            .collect();
        let len = self.slots.len();
        self.slots = vec![std::ptr::null_mut(); len];
        self.count = 0;
        for s in survivors {
            self.insert(s);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }
}
