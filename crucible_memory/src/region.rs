//! Memory regions and their shared backings.

use crucible_core::Fault;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Fills of at least this many bytes go through a pre-filled scratch
/// buffer in chunks instead of a per-byte loop.
const MEMSET_THRESHOLD: usize = 256;

/// Byte order of a region's multi-byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    /// The platform's native order.
    #[inline]
    pub const fn native() -> Self {
        #[cfg(target_endian = "little")]
        {
            Self::Little
        }
        #[cfg(target_endian = "big")]
        {
            Self::Big
        }
    }

    /// True if this order matches the platform's native order.
    #[inline]
    pub const fn is_native(self) -> bool {
        matches!(
            (self, Self::native()),
            (Self::Big, Self::Big) | (Self::Little, Self::Little)
        )
    }
}

/// The shared allocation behind one or more regions.
///
/// Storage is a boxed slice of `AtomicU64` words so the allocation start
/// is 8-aligned: an access whose *absolute byte position* is aligned for
/// its width is then guaranteed an aligned address, which the ordered
/// access path relies on when reinterpreting bytes as wider atomics.
struct Backing {
    words: Box<[AtomicU64]>,
    len: usize,
}

impl Backing {
    fn new(len: usize) -> Self {
        let word_count = len.div_ceil(8);
        let mut words = Vec::with_capacity(word_count);
        words.resize_with(word_count, || AtomicU64::new(0));
        Self {
            words: words.into_boxed_slice(),
            len,
        }
    }

    #[inline]
    fn bytes_ptr(&self) -> *mut u8 {
        self.words.as_ptr() as *mut u8
    }
}

/// A fixed-length, byte-addressable span of VM memory.
///
/// Created either by [`MemoryRegion::alloc`] (owning a fresh backing) or by
/// [`MemoryRegion::slice`] (a bounded view into an existing backing with
/// offset translation). Cloning a region clones the view, not the bytes.
#[derive(Clone)]
pub struct MemoryRegion {
    backing: Arc<Backing>,
    base: usize,
    len: usize,
    order: ByteOrder,
}

impl MemoryRegion {
    /// Allocates a zeroed region of `len` bytes in native byte order.
    pub fn alloc(len: usize) -> Self {
        Self::alloc_with_order(len, ByteOrder::native())
    }

    /// Allocates a zeroed region of `len` bytes with an explicit order.
    pub fn alloc_with_order(len: usize, order: ByteOrder) -> Self {
        Self {
            backing: Arc::new(Backing::new(len)),
            base: 0,
            len,
            order,
        }
    }

    /// Region length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for zero-length regions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte order of this region's multi-byte values.
    #[inline]
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Produces a bounded view into this region's backing.
    ///
    /// The slice aliases: writes through it are visible through `self` and
    /// every other slice of the same backing.
    pub fn slice(&self, offset: i64, len: usize) -> Result<MemoryRegion, Fault> {
        let pos = self.check(offset, len)?;
        Ok(MemoryRegion {
            backing: Arc::clone(&self.backing),
            base: pos,
            len,
            order: self.order,
        })
    }

    /// True if both regions share one backing allocation.
    #[inline]
    pub fn shares_backing(&self, other: &MemoryRegion) -> bool {
        Arc::ptr_eq(&self.backing, &other.backing)
    }

    /// Bounds-checks an access and returns the absolute byte position.
    #[inline]
    fn check(&self, offset: i64, width: usize) -> Result<usize, Fault> {
        if offset < 0 || (offset as usize).checked_add(width).is_none_or(|end| end > self.len) {
            return Err(Fault::Segfault {
                offset,
                width,
                length: self.len,
            });
        }
        Ok(self.base + offset as usize)
    }

    // =========================================================================
    // Plain access
    // =========================================================================

    #[inline]
    fn read_raw<const W: usize>(&self, offset: i64) -> Result<[u8; W], Fault> {
        let pos = self.check(offset, W)?;
        // Safety: pos..pos+W is in bounds of the backing allocation, which
        // lives as long as the Arc we hold.
        Ok(unsafe { (self.backing.bytes_ptr().add(pos) as *const [u8; W]).read_unaligned() })
    }

    #[inline]
    fn write_raw<const W: usize>(&self, offset: i64, bytes: [u8; W]) -> Result<(), Fault> {
        let pos = self.check(offset, W)?;
        // Safety: pos..pos+W is in bounds; the backing's storage is interior
        // mutable (atomic words), so writing through a shared region is fine.
        unsafe { (self.backing.bytes_ptr().add(pos) as *mut [u8; W]).write_unaligned(bytes) };
        Ok(())
    }

    #[inline]
    fn to_order<const W: usize>(&self, bytes: [u8; W]) -> [u8; W] {
        match self.order {
            order if order.is_native() => bytes,
            _ => {
                let mut swapped = bytes;
                swapped.reverse();
                swapped
            }
        }
    }

    pub fn read_i8(&self, offset: i64) -> Result<i8, Fault> {
        Ok(self.read_raw::<1>(offset)?[0] as i8)
    }

    pub fn read_u8(&self, offset: i64) -> Result<u8, Fault> {
        Ok(self.read_raw::<1>(offset)?[0])
    }

    pub fn read_i16(&self, offset: i64) -> Result<i16, Fault> {
        Ok(i16::from_ne_bytes(self.to_order(self.read_raw::<2>(offset)?)))
    }

    pub fn read_u16(&self, offset: i64) -> Result<u16, Fault> {
        Ok(u16::from_ne_bytes(self.to_order(self.read_raw::<2>(offset)?)))
    }

    pub fn read_i32(&self, offset: i64) -> Result<i32, Fault> {
        Ok(i32::from_ne_bytes(self.to_order(self.read_raw::<4>(offset)?)))
    }

    pub fn read_i64(&self, offset: i64) -> Result<i64, Fault> {
        Ok(i64::from_ne_bytes(self.to_order(self.read_raw::<8>(offset)?)))
    }

    pub fn write_i8(&self, offset: i64, value: i8) -> Result<(), Fault> {
        self.write_raw(offset, [value as u8])
    }

    pub fn write_u8(&self, offset: i64, value: u8) -> Result<(), Fault> {
        self.write_raw(offset, [value])
    }

    pub fn write_i16(&self, offset: i64, value: i16) -> Result<(), Fault> {
        self.write_raw(offset, self.to_order(value.to_ne_bytes()))
    }

    pub fn write_u16(&self, offset: i64, value: u16) -> Result<(), Fault> {
        self.write_raw(offset, self.to_order(value.to_ne_bytes()))
    }

    pub fn write_i32(&self, offset: i64, value: i32) -> Result<(), Fault> {
        self.write_raw(offset, self.to_order(value.to_ne_bytes()))
    }

    pub fn write_i64(&self, offset: i64, value: i64) -> Result<(), Fault> {
        self.write_raw(offset, self.to_order(value.to_ne_bytes()))
    }

    // =========================================================================
    // Ordered access
    // =========================================================================
    //
    // Aligned offsets reinterpret the backing bytes as an atomic of the
    // access width (the allocation start is 8-aligned, so absolute-position
    // alignment implies address alignment). Unaligned offsets fall back to
    // byte-by-byte assembly: each byte load/store is atomic, the whole
    // value is not. Callers that need true atomicity must keep their
    // offsets aligned.

    #[inline]
    fn is_aligned(pos: usize, width: usize) -> bool {
        pos & (width - 1) == 0
    }

    pub fn read_u8_ordered(&self, offset: i64) -> Result<u8, Fault> {
        let pos = self.check(offset, 1)?;
        // Safety: in bounds; a byte is always aligned.
        let cell = unsafe { &*(self.backing.bytes_ptr().add(pos) as *const AtomicU8) };
        Ok(cell.load(Ordering::SeqCst))
    }

    pub fn write_u8_ordered(&self, offset: i64, value: u8) -> Result<(), Fault> {
        let pos = self.check(offset, 1)?;
        // Safety: in bounds; a byte is always aligned.
        let cell = unsafe { &*(self.backing.bytes_ptr().add(pos) as *const AtomicU8) };
        cell.store(value, Ordering::SeqCst);
        Ok(())
    }

    pub fn read_i16_ordered(&self, offset: i64) -> Result<i16, Fault> {
        let pos = self.check(offset, 2)?;
        let raw = if Self::is_aligned(pos, 2) {
            // Safety: in bounds and 2-aligned relative to an 8-aligned base.
            let cell = unsafe { &*(self.backing.bytes_ptr().add(pos) as *const AtomicU16) };
            cell.load(Ordering::SeqCst).to_ne_bytes()
        } else {
            self.assemble::<2>(pos)
        };
        Ok(i16::from_ne_bytes(self.to_order(raw)))
    }

    pub fn write_i16_ordered(&self, offset: i64, value: i16) -> Result<(), Fault> {
        let pos = self.check(offset, 2)?;
        let raw = self.to_order(value.to_ne_bytes());
        if Self::is_aligned(pos, 2) {
            // Safety: in bounds and 2-aligned relative to an 8-aligned base.
            let cell = unsafe { &*(self.backing.bytes_ptr().add(pos) as *const AtomicU16) };
            cell.store(u16::from_ne_bytes(raw), Ordering::SeqCst);
        } else {
            self.disassemble(pos, &raw);
        }
        Ok(())
    }

    pub fn read_i32_ordered(&self, offset: i64) -> Result<i32, Fault> {
        let pos = self.check(offset, 4)?;
        let raw = if Self::is_aligned(pos, 4) {
            // Safety: in bounds and 4-aligned relative to an 8-aligned base.
            let cell = unsafe { &*(self.backing.bytes_ptr().add(pos) as *const AtomicU32) };
            cell.load(Ordering::SeqCst).to_ne_bytes()
        } else {
            self.assemble::<4>(pos)
        };
        Ok(i32::from_ne_bytes(self.to_order(raw)))
    }

    pub fn write_i32_ordered(&self, offset: i64, value: i32) -> Result<(), Fault> {
        let pos = self.check(offset, 4)?;
        let raw = self.to_order(value.to_ne_bytes());
        if Self::is_aligned(pos, 4) {
            // Safety: in bounds and 4-aligned relative to an 8-aligned base.
            let cell = unsafe { &*(self.backing.bytes_ptr().add(pos) as *const AtomicU32) };
            cell.store(u32::from_ne_bytes(raw), Ordering::SeqCst);
        } else {
            self.disassemble(pos, &raw);
        }
        Ok(())
    }

    pub fn read_i64_ordered(&self, offset: i64) -> Result<i64, Fault> {
        let pos = self.check(offset, 8)?;
        let raw = if Self::is_aligned(pos, 8) {
            // Safety: in bounds and 8-aligned relative to an 8-aligned base.
            let cell = unsafe { &*(self.backing.bytes_ptr().add(pos) as *const AtomicU64) };
            cell.load(Ordering::SeqCst).to_ne_bytes()
        } else {
            self.assemble::<8>(pos)
        };
        Ok(i64::from_ne_bytes(self.to_order(raw)))
    }

    pub fn write_i64_ordered(&self, offset: i64, value: i64) -> Result<(), Fault> {
        let pos = self.check(offset, 8)?;
        let raw = self.to_order(value.to_ne_bytes());
        if Self::is_aligned(pos, 8) {
            // Safety: in bounds and 8-aligned relative to an 8-aligned base.
            let cell = unsafe { &*(self.backing.bytes_ptr().add(pos) as *const AtomicU64) };
            cell.store(u64::from_ne_bytes(raw), Ordering::SeqCst);
        } else {
            self.disassemble(pos, &raw);
        }
        Ok(())
    }

    /// Byte-assembled read at an unaligned absolute position.
    fn assemble<const W: usize>(&self, pos: usize) -> [u8; W] {
        let mut raw = [0u8; W];
        for (i, slot) in raw.iter_mut().enumerate() {
            // Safety: pos..pos+W was bounds-checked by the caller.
            let cell = unsafe { &*(self.backing.bytes_ptr().add(pos + i) as *const AtomicU8) };
            *slot = cell.load(Ordering::SeqCst);
        }
        raw
    }

    /// Byte-disassembled write at an unaligned absolute position.
    fn disassemble(&self, pos: usize, raw: &[u8]) {
        for (i, byte) in raw.iter().enumerate() {
            // Safety: pos..pos+raw.len() was bounds-checked by the caller.
            let cell = unsafe { &*(self.backing.bytes_ptr().add(pos + i) as *const AtomicU8) };
            cell.store(*byte, Ordering::SeqCst);
        }
    }

    // =========================================================================
    // Bulk operations
    // =========================================================================

    /// Fills `count` bytes starting at `offset` with `value`.
    pub fn fill(&self, offset: i64, count: usize, value: u8) -> Result<(), Fault> {
        let pos = self.check(offset, count)?;
        if count >= MEMSET_THRESHOLD {
            let scratch = [value; MEMSET_THRESHOLD];
            let mut written = 0;
            while written < count {
                let chunk = (count - written).min(MEMSET_THRESHOLD);
                // Safety: pos+written..+chunk stays inside the checked range.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        scratch.as_ptr(),
                        self.backing.bytes_ptr().add(pos + written),
                        chunk,
                    );
                }
                written += chunk;
            }
        } else {
            for i in 0..count {
                // Safety: pos+i is inside the checked range.
                unsafe { self.backing.bytes_ptr().add(pos + i).write(value) };
            }
        }
        Ok(())
    }

    /// Copies `count` bytes from `self` at `src_offset` into `dst` at
    /// `dst_offset`.
    ///
    /// A single bulk copy normally; when both regions view one backing and
    /// the ranges overlap, the copy is staged through a temporary buffer so
    /// the source is fully read before the destination is touched.
    pub fn copy_to(
        &self,
        src_offset: i64,
        dst: &MemoryRegion,
        dst_offset: i64,
        count: usize,
    ) -> Result<(), Fault> {
        let src_pos = self.check(src_offset, count)?;
        let dst_pos = dst.check(dst_offset, count)?;
        let overlaps = self.shares_backing(dst)
            && src_pos < dst_pos + count
            && dst_pos < src_pos + count;
        if overlaps {
            let mut staged = vec![0u8; count];
            // Safety: both ranges were bounds-checked above.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.backing.bytes_ptr().add(src_pos),
                    staged.as_mut_ptr(),
                    count,
                );
                std::ptr::copy_nonoverlapping(
                    staged.as_ptr(),
                    dst.backing.bytes_ptr().add(dst_pos),
                    count,
                );
            }
        } else {
            // Safety: both ranges were bounds-checked and do not overlap.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.backing.bytes_ptr().add(src_pos),
                    dst.backing.bytes_ptr().add(dst_pos),
                    count,
                );
            }
        }
        Ok(())
    }

    /// Writes a byte slice at `offset`.
    pub fn write_bytes(&self, offset: i64, src: &[u8]) -> Result<(), Fault> {
        let pos = self.check(offset, src.len())?;
        // Safety: the destination range was bounds-checked; `src` is a
        // distinct host allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.backing.bytes_ptr().add(pos), src.len());
        }
        Ok(())
    }

    /// Reads into a byte slice from `offset`.
    pub fn read_bytes(&self, offset: i64, dst: &mut [u8]) -> Result<(), Fault> {
        let pos = self.check(offset, dst.len())?;
        // Safety: the source range was bounds-checked; `dst` is a distinct
        // host allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(self.backing.bytes_ptr().add(pos), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    /// Defines typed scatter/gather for one primitive width.
    ///
    /// Contiguous memcpy when the region's byte order is native, otherwise
    /// an element-wise loop with per-value conversion.
    fn write_typed<T: Copy, const W: usize>(
        &self,
        offset: i64,
        src: &[T],
        to_bytes: fn(T) -> [u8; W],
    ) -> Result<(), Fault> {
        let count = src.len() * W;
        let pos = self.check(offset, count)?;
        if self.order.is_native() {
            // Safety: the destination range was bounds-checked; `src` is a
            // host slice of plain-old-data values.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    src.as_ptr() as *const u8,
                    self.backing.bytes_ptr().add(pos),
                    count,
                );
            }
        } else {
            for (i, value) in src.iter().enumerate() {
                let mut bytes = to_bytes(*value);
                bytes.reverse();
                // Safety: element range is inside the checked span.
                unsafe {
                    (self.backing.bytes_ptr().add(pos + i * W) as *mut [u8; W])
                        .write_unaligned(bytes)
                };
            }
        }
        Ok(())
    }

    fn read_typed<T: Copy, const W: usize>(
        &self,
        offset: i64,
        dst: &mut [T],
        from_bytes: fn([u8; W]) -> T,
    ) -> Result<(), Fault> {
        let count = dst.len() * W;
        let pos = self.check(offset, count)?;
        if self.order.is_native() {
            // Safety: the source range was bounds-checked; `dst` is a host
            // slice of plain-old-data values.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.backing.bytes_ptr().add(pos),
                    dst.as_mut_ptr() as *mut u8,
                    count,
                );
            }
        } else {
            for (i, slot) in dst.iter_mut().enumerate() {
                // Safety: element range is inside the checked span.
                let mut bytes = unsafe {
                    (self.backing.bytes_ptr().add(pos + i * W) as *const [u8; W]).read_unaligned()
                };
                bytes.reverse();
                *slot = from_bytes(bytes);
            }
        }
        Ok(())
    }

    pub fn write_i16s(&self, offset: i64, src: &[i16]) -> Result<(), Fault> {
        self.write_typed(offset, src, i16::to_ne_bytes)
    }

    pub fn read_i16s(&self, offset: i64, dst: &mut [i16]) -> Result<(), Fault> {
        self.read_typed(offset, dst, i16::from_ne_bytes)
    }

    pub fn write_u16s(&self, offset: i64, src: &[u16]) -> Result<(), Fault> {
        self.write_typed(offset, src, u16::to_ne_bytes)
    }

    pub fn read_u16s(&self, offset: i64, dst: &mut [u16]) -> Result<(), Fault> {
        self.read_typed(offset, dst, u16::from_ne_bytes)
    }

    pub fn write_i32s(&self, offset: i64, src: &[i32]) -> Result<(), Fault> {
        self.write_typed(offset, src, i32::to_ne_bytes)
    }

    pub fn read_i32s(&self, offset: i64, dst: &mut [i32]) -> Result<(), Fault> {
        self.read_typed(offset, dst, i32::from_ne_bytes)
    }

    pub fn write_i64s(&self, offset: i64, src: &[i64]) -> Result<(), Fault> {
        self.write_typed(offset, src, i64::to_ne_bytes)
    }

    pub fn read_i64s(&self, offset: i64, dst: &mut [i64]) -> Result<(), Fault> {
        self.read_typed(offset, dst, i64::from_ne_bytes)
    }

    pub fn write_f32s(&self, offset: i64, src: &[f32]) -> Result<(), Fault> {
        self.write_typed(offset, src, f32::to_ne_bytes)
    }

    pub fn read_f32s(&self, offset: i64, dst: &mut [f32]) -> Result<(), Fault> {
        self.read_typed(offset, dst, f32::from_ne_bytes)
    }

    pub fn write_f64s(&self, offset: i64, src: &[f64]) -> Result<(), Fault> {
        self.write_typed(offset, src, f64::to_ne_bytes)
    }

    pub fn read_f64s(&self, offset: i64, dst: &mut [f64]) -> Result<(), Fault> {
        self.read_typed(offset, dst, f64::from_ne_bytes)
    }
}

impl std::fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegion")
            .field("base", &self.base)
            .field("len", &self.len)
            .field("order", &self.order)
            .finish()
    }
}
