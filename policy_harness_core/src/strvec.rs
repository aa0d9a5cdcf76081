use crate::error::HarnessError;
use std::ffi::{CStr, CString, c_char};
use std::marker::PhantomData;
use std::ptr;

/// Number of slots added each time a [`StringArray`] runs out of room.
pub const GROWTH_BLOCK: usize = 128;

/// An append-only array of owned C strings that grows in fixed blocks.
///
/// The array tracks a logical capacity that always reserves one slot for the
/// terminator, so that [`StringArray::sentinel_view`] can hand a
/// null-terminated vector to a consumer that expects one. A capacity of zero
/// means the array is absent: nothing has ever been pushed and the view is a
/// null pointer rather than an empty vector.
#[derive(Debug, Default)]
pub struct StringArray {
    entries: Vec<CString>,
    capacity: usize,
}

impl StringArray {
    /// Creates an absent array. No allocation happens until the first push.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a copy of `entry`, or only guarantees presence when `entry` is `None`.
    ///
    /// The copy stops at the first NUL byte, mirroring what a C consumer would see.
    /// On error the array is left exactly as it was before the call.
    pub fn push(&mut self, entry: Option<&[u8]>) -> Result<(), HarnessError> {
        let copy = entry.map(duplicate).transpose()?;

        let needed = self.entries.len() + usize::from(copy.is_some());
        if needed >= self.capacity {
            let requested = self.capacity + GROWTH_BLOCK;
            // Live slots only; the terminator is supplied by the view.
            let additional = (requested - 1).saturating_sub(self.entries.len());
            self.entries
                .try_reserve_exact(additional)
                .map_err(|source| HarnessError::Grow { requested, source })?;
            self.capacity = requested;
        }

        if let Some(copy) = copy {
            self.entries.push(copy);
        }
        Ok(())
    }

    /// Frees every owned string and the backing buffer.
    ///
    /// Releasing an absent array is a no-op.
    pub fn release(&mut self) {
        if !self.is_present() {
            return;
        }
        self.entries = Vec::new();
        self.capacity = 0;
    }

    /// Number of live entries, not counting the terminator.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the array has been pushed to at least once (even with `None`).
    pub fn is_present(&self) -> bool {
        self.capacity > 0
    }

    /// Logical capacity in slots, terminator included.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, index: usize) -> Option<&CStr> {
        self.entries.get(index).map(CString::as_c_str)
    }

    pub fn first(&self) -> Option<&CStr> {
        self.get(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CStr> {
        self.entries.iter().map(CString::as_c_str)
    }

    /// The live entries, or `None` when the array is absent.
    pub fn as_slice(&self) -> Option<&[CString]> {
        self.is_present().then_some(self.entries.as_slice())
    }

    /// Builds a null-terminated pointer vector over the live entries.
    ///
    /// Returns `None` for an absent array, which a C consumer sees as a null
    /// vector. The pointers borrow from `self` and stay valid for the view's
    /// lifetime.
    ///
    /// Rust plugins take [`StringArray::as_slice`] through [`crate::plugin::OpenArgs`]
    /// and [`crate::plugin::CheckArgs`]. This view is what an adapter for a
    /// plugin built against the C entry points would pass as `char *const[]`.
    pub fn sentinel_view(&self) -> Option<SentinelView<'_>> {
        if !self.is_present() {
            return None;
        }
        let mut slots = Vec::with_capacity(self.entries.len() + 1);
        slots.extend(self.entries.iter().map(|entry| entry.as_ptr()));
        slots.push(ptr::null());
        Some(SentinelView {
            slots,
            _borrow: PhantomData,
        })
    }
}

fn duplicate(entry: &[u8]) -> Result<CString, HarnessError> {
    let end = entry.iter().position(|&b| b == 0).unwrap_or(entry.len());
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(end + 1)
        .map_err(|source| HarnessError::Duplicate { len: end, source })?;
    bytes.extend_from_slice(&entry[..end]);
    Ok(CString::new(bytes)?)
}

/// A `char *const[]`-style view of a [`StringArray`], terminated by a null slot.
#[derive(Debug)]
pub struct SentinelView<'a> {
    slots: Vec<*const c_char>,
    _borrow: PhantomData<&'a StringArray>,
}

impl SentinelView<'_> {
    /// Pointer to the first slot, suitable for an `argv`-style parameter.
    pub fn as_ptr(&self) -> *const *const c_char {
        self.slots.as_ptr()
    }

    /// All slots, terminator included.
    pub fn slots(&self) -> &[*const c_char] {
        &self.slots
    }

    /// Number of live slots before the terminator.
    pub fn len(&self) -> usize {
        self.slots.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
