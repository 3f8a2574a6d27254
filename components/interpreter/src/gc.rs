//! Mark-sweep collection.
//!
//! A collection flips the heap's stage bit, marks everything reachable
//! from the roots (live stack slots, the globals table, the string
//! sentinels and the VM anchor), then sweeps: objects whose stage does not
//! match the new current stage are freed, pages left with no live objects
//! are unlinked and returned to the allocator callback (unless greedy mode
//! retains them), and the weak intern set drops its dead entries.
//!
//! Collection is stop-the-world on the owning thread and is never entered
//! from inside an allocation; the interpreter drives it from safe points
//! when the allocation debt crosses its threshold.

use core_types::Value;

use crate::array::Array;
use crate::function::{Function, Proto};
use crate::heap::{Header, Heap, ObjectKind, Page, CHUNK_SIZE};
use crate::table::Table;

impl Heap {
    /// Run one full mark-sweep cycle. `stack` is the live prefix of the
    /// value stack; `globals` may be null before VM setup finishes.
    pub fn collect(&mut self, stack: &[Value], globals: *mut Table) {
        self.debt = 0;

        unsafe {
            // The initial page starts at one live object: the VM anchor.
            (*self.initial_page).alive_objects = 1;
            let mut p = (*self.initial_page).next;
            while p != self.initial_page {
                (*p).alive_objects = 0;
                p = (*p).next;
            }
        }

        // Flip to the new current stage and mark from the roots. The
        // anchor is stamped directly: it has no references to chase and
        // its page count is the preset 1.
        self.stage ^= 1;
        let stage = self.stage;
        unsafe {
            (*self.anchor).stage = stage;
            for &v in stack {
                tick_value(v, stage);
            }
            if !globals.is_null() {
                tick(globals as *mut Header, stage);
            }
            tick(self.empty_string as *mut Header, stage);
            tick(self.oom_string as *mut Header, stage);
        }

        // Sweep every page whose live count disagrees with its allocation
        // count; fully-dead pages leave the ring.
        let mut dead_pages: Vec<*mut Page> = Vec::new();
        let mut swept = 0usize;
        unsafe {
            let mut p = self.initial_page;
            loop {
                let next = (*p).next;
                if (*p).alive_objects != (*p).num_objects {
                    swept += self.sweep_page(p, stage);
                    if (*p).alive_objects == 0 && !self.greedy {
                        let prev = (*p).prev;
                        (*prev).next = (*p).next;
                        (*(*p).next).prev = prev;
                        dead_pages.push(p);
                    }
                }
                p = next;
                if p == self.initial_page {
                    break;
                }
            }
        }

        // Weak intern sweep runs before dead pages are returned so their
        // headers are still readable.
        self.interns.sweep(stage);

        if !dead_pages.is_empty() {
            self.scrub_free_lists();
            for p in &dead_pages {
                unsafe {
                    (self.alloc_fn)(self.alloc_ctx, *p as *mut u8, (**p).num_pages as usize, false);
                }
            }
        }

        self.collections += 1;
        log::debug!(
            "gc: cycle {} swept {} object(s), released {} page(s), {} interned string(s) live",
            self.collections,
            swept,
            dead_pages.len(),
            self.interns.len()
        );
    }

    /// Free every dead object on one page. Returns how many were freed.
    unsafe fn sweep_page(&mut self, p: *mut Page, stage: u8) -> usize {
        let mut swept = 0;
        let mut cur = (*p).data();
        while cur < (*p).arena_end() {
            let h = cur as *mut Header;
            let step = (*h).num_chunks as usize * CHUNK_SIZE;
            if !(*h).is_free() && (*h).stage != stage {
                self.free(h, true);
                swept += 1;
            }
            cur = cur.add(step);
        }
        swept
    }

    /// Drop free-list entries that point into pages about to be released.
    fn scrub_free_lists(&mut self) {
        unsafe {
            for class in 0..self.free_lists.len() {
                let mut prev: *mut Header = std::ptr::null_mut();
                let mut it = self.free_lists[class];
                while !it.is_null() {
                    let next = (*it).next_free();
                    if (*(*it).page()).alive_objects == 0 {
                        if prev.is_null() {
                            self.free_lists[class] = next;
                        } else {
                            (*prev).set_next_free(next);
                        }
                    } else {
                        prev = it;
                    }
                    it = next;
                }
            }
        }
    }
}

/// Mark one value's referent, if it has one.
pub(crate) unsafe fn tick_value(v: Value, stage: u8) {
    if v.is_gc() {
        tick(v.as_addr() as *mut Header, stage);
    }
}

/// Mark one object and recurse into its owned references. Each reachable
/// object is visited exactly once per cycle: the stage check cuts off
/// re-entry, which is also what makes cyclic tables terminate.
pub(crate) unsafe fn tick(h: *mut Header, stage: u8) {
    debug_assert!(!(*h).is_free(), "marking a freed object");

    if (*h).stage == stage {
        return;
    }
    (*h).stage = stage;

    match (*h).kind {
        ObjectKind::Array => {
            let a = h as *mut Array;
            for &v in Array::elements(a).iter() {
                tick_value(v, stage);
            }
        }
        ObjectKind::Table => {
            let t = h as *const Table;
            for i in 0..(*t).total_slots() as usize {
                let pair = (*t).slot(i);
                if !pair.key.is_none() {
                    tick_value(pair.key, stage);
                    tick_value(pair.value, stage);
                }
            }
        }
        ObjectKind::Function => {
            let f = h as *mut Function;
            if !(*f).proto.is_null() {
                tick((*f).proto as *mut Header, stage);
            }
            if !(*f).environment.is_null() {
                tick((*f).environment as *mut Header, stage);
            }
            let uvals = Function::uval_ptr(f);
            for i in 0..(*f).num_uval as usize {
                tick_value(*uvals.add(i), stage);
            }
        }
        ObjectKind::Proto => {
            let p = h as *const Proto;
            tick((*p).src_chunk as *mut Header, stage);
            tick_value((*p).jit, stage);
            for &k in Proto::kvals(p) {
                tick_value(k, stage);
            }
        }
        _ => {}
    }

    (*(*h).page()).alive_objects += 1;
}
