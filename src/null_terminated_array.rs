use std::ffi::{c_char, CStr, CString};
use std::ptr;

/// A container which exposes a null-terminated array of pointers to strings that it owns, in the
/// shape `execvp()` wants for argv.
///
/// The pointer array is built once, up front, so that a forked child can hand it to exec without
/// allocating.
pub struct OwningNullTerminatedArray {
    // Each CString owns its own heap buffer, so moving the box does not move the bytes the
    // pointers refer to. The strings are never mutated after construction.
    strings: Box<[CString]>,
    pointers: Box<[*const c_char]>,
}

/// Safety: the array is immutable after construction and owns everything it points to.
unsafe impl Send for OwningNullTerminatedArray {}
unsafe impl Sync for OwningNullTerminatedArray {}

impl OwningNullTerminatedArray {
    /// Construct, taking ownership of a list of strings.
    pub fn new(strs: Vec<CString>) -> Self {
        let strings = strs.into_boxed_slice();
        let mut pointers = Vec::with_capacity(strings.len() + 1);
        pointers.extend(strings.iter().map(|s| s.as_ptr()));
        pointers.push(ptr::null());
        OwningNullTerminatedArray {
            strings,
            pointers: pointers.into_boxed_slice(),
        }
    }

    /// Return the list of pointers, appropriate for argv.
    pub fn get(&self) -> *const *const c_char {
        debug_assert!(
            self.pointers.last().is_some_and(|p| p.is_null()),
            "Should have null terminator"
        );
        self.pointers.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Iterate over the strings. This does not allocate and is safe to use after fork.
    pub fn iter(&self) -> impl Iterator<Item = &CStr> {
        self.strings.iter().map(CString::as_c_str)
    }

    /// The first string, if any.
    pub fn first(&self) -> Option<&CStr> {
        self.strings.first().map(CString::as_c_str)
    }
}

impl std::fmt::Debug for OwningNullTerminatedArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.strings.iter()).finish()
    }
}
