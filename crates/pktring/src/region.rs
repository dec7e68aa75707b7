//! Shared mapping: control page plus data region.
//!
//! A [`RingRegion`] owns one `MAP_SHARED` mapping of `CTRL_PAGE_SIZE + S`
//! bytes. The memfd-backed variant can be handed to another process by file
//! descriptor; the anonymous variant is for in-process producer/consumer
//! pairs (tests, benchmarks).
//!
//! The region also implements the two-span codec over the power-of-two data
//! region: every read and write splits into at most two `memcpy`s, the
//! second starting at offset 0 when the record straddles the end.

use std::io;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::ptr;

use crate::layout::{CtrlPage, CTRL_PAGE_SIZE, MAX_RING_ORDER, MIN_RING_ORDER};

/// One shared mapping of the control page and data region.
pub struct RingRegion {
    base: *mut u8,
    map_len: usize,
    data_size: u64,
    /// Backing memfd; `None` for anonymous (in-process) regions.
    fd: Option<OwnedFd>,
}

// SAFETY: the mapping is plain shared memory; all cross-thread access goes
// through the atomics in `CtrlPage` or through the cursor-owned spans of the
// data region.
unsafe impl Send for RingRegion {}
unsafe impl Sync for RingRegion {}

impl RingRegion {
    /// Create a memfd-backed region. The fd can be passed to a consumer in
    /// another process, which maps it with [`RingRegion::from_fd`].
    pub fn create_memfd(ring_order: u32) -> io::Result<Self> {
        let (map_len, data_size) = region_lengths(ring_order)?;

        // SAFETY: the name is a valid NUL-terminated string.
        let fd = unsafe { libc::memfd_create(c"pktring".as_ptr(), libc::MFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: memfd_create succeeded, we own the fd.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        // SAFETY: fd is a valid memfd.
        let ret = unsafe { libc::ftruncate(fd.as_raw_fd(), map_len as libc::off_t) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        let base = map_shared(map_len, fd.as_raw_fd())?;
        let region = Self {
            base,
            map_len,
            data_size,
            fd: Some(fd),
        };
        Ok(region)
    }

    /// Create an anonymous region for an in-process producer/consumer pair.
    pub fn create_anonymous(ring_order: u32) -> io::Result<Self> {
        let (map_len, data_size) = region_lengths(ring_order)?;

        // SAFETY: anonymous shared mapping, no fd involved.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            base: base as *mut u8,
            map_len,
            data_size,
            fd: None,
        })
    }

    /// Map an existing ring from its backing fd (consumer side).
    ///
    /// The data-region size is discovered from the control page and
    /// validated against the fd length, so an attaching consumer needs
    /// nothing beyond the descriptor.
    pub fn from_fd(fd: OwnedFd) -> io::Result<Self> {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: st is a valid out-pointer for fstat.
        let ret = unsafe { libc::fstat(fd.as_raw_fd(), &mut st) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        let map_len = st.st_size as usize;
        if map_len <= CTRL_PAGE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "ring fd too small for control page",
            ));
        }

        let base = map_shared(map_len, fd.as_raw_fd())?;
        let mut region = Self {
            base,
            map_len,
            data_size: 0,
            fd: Some(fd),
        };

        let data_size = region.ctrl().size();
        if !data_size.is_power_of_two()
            || CTRL_PAGE_SIZE + data_size as usize != map_len
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "control page size field disagrees with mapping length",
            ));
        }
        region.data_size = data_size;
        Ok(region)
    }

    /// View of the control page.
    #[inline]
    pub fn ctrl(&self) -> &CtrlPage {
        // SAFETY: the mapping is at least CTRL_PAGE_SIZE bytes, the page is
        // suitably aligned (page-aligned by mmap), and CtrlPage is all
        // atomics, so shared access from both address spaces is sound.
        unsafe { &*(self.base as *const CtrlPage) }
    }

    /// Data-region size `S` in bytes.
    #[inline]
    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    /// Backing memfd, if this region has one.
    pub fn backing_fd(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(|fd| fd.as_fd())
    }

    /// Write `src` into the data region at `cursor`, wrapping at the end.
    ///
    /// Does not touch cursors. The caller must hold a reservation covering
    /// `[cursor, cursor + src.len())`.
    pub fn write_at(&self, cursor: u64, src: &[u8]) {
        let mask = self.data_size - 1;
        let off = (cursor & mask) as usize;
        let first = src.len().min(self.data_size as usize - off);
        // SAFETY: a reservation guarantees exclusive ownership of the span;
        // both spans are in-bounds of the data region.
        unsafe {
            let data = self.base.add(CTRL_PAGE_SIZE);
            ptr::copy_nonoverlapping(src.as_ptr(), data.add(off), first);
            if src.len() > first {
                ptr::copy_nonoverlapping(src.as_ptr().add(first), data, src.len() - first);
            }
        }
    }

    /// Read `dst.len()` bytes from the data region at `cursor`, wrapping at
    /// the end. Does not touch cursors.
    pub fn read_at(&self, cursor: u64, dst: &mut [u8]) {
        let mask = self.data_size - 1;
        let off = (cursor & mask) as usize;
        let first = dst.len().min(self.data_size as usize - off);
        // SAFETY: the consumer owns `[tail, head)` after an acquire load of
        // head; both spans are in-bounds of the data region.
        unsafe {
            let data = self.base.add(CTRL_PAGE_SIZE);
            ptr::copy_nonoverlapping(data.add(off), dst.as_mut_ptr(), first);
            if dst.len() > first {
                ptr::copy_nonoverlapping(data, dst.as_mut_ptr().add(first), dst.len() - first);
            }
        }
    }
}

impl Drop for RingRegion {
    fn drop(&mut self) {
        // SAFETY: base/map_len came from a successful mmap and are unmapped
        // exactly once.
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.map_len);
        }
    }
}

fn region_lengths(ring_order: u32) -> io::Result<(usize, u64)> {
    if !(MIN_RING_ORDER..=MAX_RING_ORDER).contains(&ring_order) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "ring_order out of range",
        ));
    }
    let data_size = 1u64 << ring_order;
    Ok((CTRL_PAGE_SIZE + data_size as usize, data_size))
}

fn map_shared(map_len: usize, fd: libc::c_int) -> io::Result<*mut u8> {
    // SAFETY: fd is valid and sized to map_len by the caller.
    let base = unsafe {
        libc::mmap(
            ptr::null_mut(),
            map_len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if base == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(base as *mut u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_both_backends() {
        let memfd = RingRegion::create_memfd(12).unwrap();
        assert_eq!(memfd.data_size(), 4096);
        assert!(memfd.backing_fd().is_some());

        let anon = RingRegion::create_anonymous(12).unwrap();
        assert_eq!(anon.data_size(), 4096);
        assert!(anon.backing_fd().is_none());
    }

    #[test]
    fn rejects_sub_page_order() {
        assert!(RingRegion::create_anonymous(6).is_err());
    }

    #[test]
    fn write_read_wraps_at_boundary() {
        let region = RingRegion::create_anonymous(12).unwrap();
        let src: Vec<u8> = (0u8..32).collect();

        // Straddle the end: 10 bytes before the boundary, 22 after.
        let cursor = 4096 - 10;
        region.write_at(cursor, &src);

        let mut dst = vec![0u8; 32];
        region.read_at(cursor, &mut dst);
        assert_eq!(dst, src);

        // The wrapped remainder landed at offset 0.
        let mut prefix = vec![0u8; 22];
        region.read_at(4096, &mut prefix); // 4096 & mask == 0
        assert_eq!(prefix, src[10..]);
    }

    #[test]
    fn from_fd_sees_producer_writes() {
        let region = RingRegion::create_memfd(12).unwrap();
        region.ctrl().init(4096, 50, 30);
        region.write_at(0, b"hello ring");

        let dup = region.backing_fd().unwrap().try_clone_to_owned().unwrap();
        let attached = RingRegion::from_fd(dup).unwrap();
        assert_eq!(attached.data_size(), 4096);

        let mut buf = [0u8; 10];
        attached.read_at(0, &mut buf);
        assert_eq!(&buf, b"hello ring");
    }

    #[test]
    fn from_fd_rejects_bad_size_field() {
        let region = RingRegion::create_memfd(12).unwrap();
        region.ctrl().init(8192, 50, 30); // lies about the data size

        let dup = region.backing_fd().unwrap().try_clone_to_owned().unwrap();
        assert!(RingRegion::from_fd(dup).is_err());
    }
}
