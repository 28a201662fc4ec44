use crate::common::{assert_send, assert_sync};
use std::ffi::{c_char, CString};
use std::pin::Pin;
use std::ptr;

/// A container which owns a list of strings and exposes them as the
/// null-terminated array of NUL-terminated strings consumed by exec.
pub struct OwningNullTerminatedArray {
    // Note that pointers holds pointers into our pinned strings.
    strings: Pin<Box<[CString]>>,
    pointers: Box<[*const c_char]>,
}

const _: () = assert_send::<OwningNullTerminatedArray>();
const _: () = assert_sync::<OwningNullTerminatedArray>();

impl OwningNullTerminatedArray {
    /// Construct, taking ownership of a list of strings.
    pub fn new(strs: Vec<CString>) -> Self {
        let strings = Pin::from(strs.into_boxed_slice());
        let mut pointers = Vec::with_capacity(1 + strings.len());
        for s in strings.iter() {
            pointers.push(s.as_ptr());
        }
        pointers.push(ptr::null());
        OwningNullTerminatedArray {
            strings,
            pointers: pointers.into_boxed_slice(),
        }
    }

    /// Return the list of pointers, appropriate for argv. Note this returns a
    /// mutable array of const strings, as exec expects; the caller may
    /// rearrange the pointers but not modify the string contents.
    pub fn get(&self) -> *mut *const c_char {
        assert!(
            self.pointers.last().is_some_and(|p| p.is_null()),
            "Should have null terminator"
        );
        self.pointers.as_ptr().cast_mut()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CString> {
        self.strings.iter()
    }
}

/// Safety: the pointers are immutable and point into heap storage that is
/// pinned for the container's lifetime.
unsafe impl Send for OwningNullTerminatedArray {}
unsafe impl Sync for OwningNullTerminatedArray {}
