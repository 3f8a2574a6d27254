//! Fixed-capacity arrays.

use core_types::Value;

use crate::heap::{Header, Heap, ObjectKind};

/// Heap array: header and length, elements inline.
#[repr(C)]
pub struct Array {
    pub(crate) hdr: Header,
    len: u32,
    _reserved: u32,
}

impl Array {
    /// Allocate an array of `len` slots, all `none`. Returns null when the
    /// allocator fails.
    pub(crate) fn create(heap: &mut Heap, len: u32) -> *mut Array {
        let total = std::mem::size_of::<Array>() + len as usize * std::mem::size_of::<Value>();
        let hdr = heap.alloc_raw(ObjectKind::Array, total);
        if hdr.is_null() {
            return std::ptr::null_mut();
        }
        let a = hdr as *mut Array;
        unsafe {
            (*a).len = len;
            let data = Array::data(a);
            for i in 0..len as usize {
                *data.add(i) = Value::none();
            }
        }
        a
    }

    fn data(a: *mut Array) -> *mut Value {
        unsafe { (a as *mut u8).add(std::mem::size_of::<Array>()) as *mut Value }
    }

    pub(crate) fn len(&self) -> u32 {
        self.len
    }

    pub(crate) unsafe fn elements<'a>(a: *mut Array) -> &'a mut [Value] {
        std::slice::from_raw_parts_mut(Array::data(a), (*a).len as usize)
    }

    pub(crate) unsafe fn get(a: *const Array, i: u32) -> Value {
        debug_assert!(i < (*a).len);
        *Array::data(a as *mut Array).add(i as usize)
    }

    pub(crate) unsafe fn set(a: *mut Array, i: u32, v: Value) {
        debug_assert!(i < (*a).len);
        *Array::data(a).add(i as usize) = v;
    }
}
