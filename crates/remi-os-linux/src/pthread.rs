use std::cell::RefCell;

use once_cell::unsync::OnceCell;
use remi_core::{RemiCore, RemiError, RemiRead, RemoteAddress};
use zerocopy::IntoBytes as _;

/// Number of machine words scanned when looking for the thread identifier.
pub const PTHREAD_BUFFER_ITEMS: usize = 200;

const WORD_SIZE: usize = size_of::<usize>();

/// Locates the thread identifier inside the target's `struct pthread`.
///
/// The layout of `struct pthread` is private to the C library and differs
/// between builds. The resolver scans a window of a known thread's control
/// block for a value obtained through another channel, and remembers the
/// byte offset of the first match. The layout is a property of the loaded
/// C library, so the offset is resolved once and reused for every thread.
///
/// The scratch buffer is reused by every call. Calls on one resolver must
/// not be reentrant.
pub struct PthreadOffsetResolver {
    scratch: RefCell<[usize; PTHREAD_BUFFER_ITEMS]>,
    offset: OnceCell<usize>,
}

impl Default for PthreadOffsetResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PthreadOffsetResolver {
    /// Creates a resolver with no known offset.
    pub fn new() -> Self {
        Self {
            scratch: RefCell::new([0; PTHREAD_BUFFER_ITEMS]),
            offset: OnceCell::new(),
        }
    }

    /// Creates a resolver with an offset known from elsewhere, such as a
    /// layout table for a specific C library build.
    pub fn with_offset(offset: usize) -> Self {
        Self {
            scratch: RefCell::new([0; PTHREAD_BUFFER_ITEMS]),
            offset: OnceCell::with_value(offset),
        }
    }

    /// Returns the resolved byte offset, if any.
    pub fn offset(&self) -> Option<usize> {
        self.offset.get().copied()
    }

    /// Resolves the byte offset of `expected` within the control block at
    /// `address`.
    ///
    /// Reads [`PTHREAD_BUFFER_ITEMS`] words and picks the first one equal to
    /// `expected`. Once an offset is known, it is returned without reading
    /// the target. A failed scan leaves the resolver unresolved.
    pub fn resolve_offset<Driver>(
        &self,
        core: &RemiCore<Driver>,
        address: RemoteAddress,
        expected: u64,
    ) -> Result<usize, RemiError>
    where
        Driver: RemiRead,
    {
        if expected == 0 {
            return Err(RemiError::InvalidArgument(
                "expected thread identifier must not be zero",
            ));
        }

        if let Some(offset) = self.offset.get() {
            return Ok(*offset);
        }

        let mut scratch = self.scratch.borrow_mut();
        core.read(address, scratch.as_mut_bytes())?;

        let window = &scratch[..];
        let offset = match find_word(window, expected) {
            Some(offset) => offset,
            None => return Err(RemiError::NotFound(size_of_val(window))),
        };

        let candidates = window.iter().filter(|&&word| word as u64 == expected).count();
        if candidates > 1 {
            tracing::warn!(
                %address,
                offset,
                candidates,
                "thread identifier found at multiple offsets, using the first"
            );
        }

        tracing::debug!(%address, offset, "resolved pthread offset");
        Ok(*self.offset.get_or_init(|| offset))
    }

    /// Reads the word at the resolved offset within the control block at
    /// `address`.
    ///
    /// Fails if the offset has not been resolved yet, or if the word would
    /// lie past the end of the address space.
    pub fn read_thread_word<Driver>(
        &self,
        core: &RemiCore<Driver>,
        address: RemoteAddress,
    ) -> Result<u64, RemiError>
    where
        Driver: RemiRead,
    {
        let offset = self
            .offset()
            .ok_or(RemiError::Other("pthread offset is not resolved"))?;

        let field = address
            .checked_add(offset as u64)
            .ok_or(RemiError::AddressOverflow(address))?;

        let mut scratch = self.scratch.borrow_mut();
        core.read(field, scratch[..1].as_mut_bytes())?;
        Ok(scratch[0] as u64)
    }
}

/// Returns the byte offset of the first word in `window` equal to
/// `expected`.
pub fn find_word(window: &[usize], expected: u64) -> Option<usize> {
    window
        .iter()
        .position(|&word| word as u64 == expected)
        .map(|index| index * WORD_SIZE)
}
