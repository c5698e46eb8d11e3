//! Byte buffers for socket transfers.
//!
//! [Buffer] is plain owned storage. [BufferView] is a non-owning
//! (pointer, length) window over caller-owned bytes that an in-flight
//! operation reads from or writes into; `consume` shrinks it from the front
//! as a composed transfer makes progress.
//!
//! A view does not keep its backing storage alive. The storage must outlive
//! every operation holding the view; the composed transfer futures in
//! [crate::futures] guarantee this by moving the storage into the final
//! completion closure, so the bytes live exactly as long as the operation
//! chain that uses them.

use std::slice;

/// Owned byte storage.
pub type Buffer = Vec<u8>;

/// A non-owning window over a contiguous byte range.
#[derive(Debug)]
pub struct BufferView {
    ptr: *mut u8,
    len: usize,
}

// A view is only ever dereferenced on the driver thread, but operations
// holding one are queued through Sync structures.
unsafe impl Send for BufferView {}

impl BufferView {
    /// Create a view over `buf`. The slice's lifetime is not carried: the
    /// caller must keep the storage alive (and unmoved) until the operation
    /// using the view has completed.
    pub fn new(buf: &mut [u8]) -> Self {
        Self {
            ptr: buf.as_mut_ptr(),
            len: buf.len(),
        }
    }

    /// Remaining length of the window.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop `n` bytes from the front of the window.
    ///
    /// Panics if `n` exceeds the remaining length.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len, "consumed past the end of a buffer view");
        self.ptr = unsafe { self.ptr.add(n) };
        self.len -= n;
    }

    /// # Safety
    ///
    /// The backing storage must still be alive and not aliased mutably.
    pub(crate) unsafe fn as_slice(&self) -> &[u8] {
        slice::from_raw_parts(self.ptr, self.len)
    }

    /// # Safety
    ///
    /// The backing storage must still be alive and not aliased.
    pub(crate) unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        slice::from_raw_parts_mut(self.ptr, self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::BufferView;

    #[test]
    fn consume_advances_front() {
        let mut storage = *b"abcdef";
        let mut view = BufferView::new(&mut storage);

        assert_eq!(view.len(), 6);
        view.consume(2);
        assert_eq!(view.len(), 4);
        assert_eq!(unsafe { view.as_slice() }, b"cdef");

        view.consume(4);
        assert!(view.is_empty());
    }

    #[test]
    #[should_panic]
    fn consume_past_end_panics() {
        let mut storage = [0u8; 3];
        let mut view = BufferView::new(&mut storage);
        view.consume(4);
    }

    #[test]
    fn writes_through_view_land_in_storage() {
        let mut storage = [0u8; 4];
        let mut view = BufferView::new(&mut storage);
        view.consume(1);
        unsafe { view.as_mut_slice() }.copy_from_slice(b"xyz");
        assert_eq!(&storage, b"\0xyz");
    }
}
