//! Eventfd doorbell for producer-to-consumer wakeup.
//!
//! The producer signals by adding to the eventfd counter; the consumer waits
//! for readability and drains the counter. Multiple signals before a drain
//! collapse into a single wakeup (eventfd counter semantics), which is
//! exactly the coalescing the watermark notifier needs: every rising edge
//! eventually wakes a waiting consumer, and edges that pile up before the
//! consumer runs cost one wake.
//!
//! # Usage
//!
//! ```ignore
//! let doorbell = Arc::new(Doorbell::create()?);
//! ring.bind_notifier(Some(doorbell.clone()))?;
//! let mut consumer = ring.attach_consumer(Some(doorbell))?;
//!
//! // Consumer side
//! doorbell.wait().await?;
//! ```

use std::io::{self, ErrorKind};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

/// Wakes the consumer when the ring crosses the hi watermark.
///
/// **Contract:**
/// - `signal()` must never block.
/// - Multiple signals before the consumer wakes are coalesced.
/// - Every rising edge eventually wakes a waiting consumer.
pub trait Notifier: Send + Sync {
    /// Deliver one wakeup to the consumer side.
    fn signal(&self);
}

/// An eventfd-backed doorbell.
///
/// Wrapped in `AsyncFd` so the wait side integrates with the tokio reactor;
/// the signal side is a plain non-blocking write usable from any thread.
pub struct Doorbell {
    async_fd: AsyncFd<OwnedFd>,
}

impl Doorbell {
    /// Create a fresh eventfd doorbell.
    ///
    /// Must be called inside a tokio runtime (the fd is registered with the
    /// reactor).
    pub fn create() -> io::Result<Self> {
        // SAFETY: plain eventfd creation, flags are valid.
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: eventfd succeeded, we own the fd.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            async_fd: AsyncFd::new(owned)?,
        })
    }

    /// Wrap an inherited eventfd (consumer in another process).
    ///
    /// # Safety
    ///
    /// The fd must be a valid, open eventfd created with `EFD_NONBLOCK`.
    pub unsafe fn from_raw_fd(fd: RawFd) -> io::Result<Self> {
        // SAFETY: caller guarantees fd validity.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            async_fd: AsyncFd::new(owned)?,
        })
    }

    /// Wait until the doorbell rings, then drain the wake token.
    ///
    /// Cancellable: dropping the future leaves pending signals intact for
    /// the next waiter; dropping the doorbell closes the channel and drops
    /// pending signals with it.
    pub async fn wait(&self) -> io::Result<()> {
        loop {
            let mut guard = self.async_fd.ready(Interest::READABLE).await?;

            if self.try_drain() {
                return Ok(());
            }

            // Raced with another drain; clear readiness and wait again.
            guard.clear_ready();
        }
    }

    /// Drain any pending wake tokens without blocking.
    pub fn drain(&self) {
        self.try_drain();
    }

    /// Read the counter; true if at least one signal was pending.
    fn try_drain(&self) -> bool {
        let fd = self.async_fd.get_ref().as_raw_fd();
        let mut value: u64 = 0;

        // SAFETY: fd is valid, value is a valid 8-byte out-buffer.
        let ret = unsafe {
            libc::read(
                fd,
                &mut value as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };

        if ret == std::mem::size_of::<u64>() as isize {
            return value > 0;
        }
        let err = io::Error::last_os_error();
        if err.kind() != ErrorKind::WouldBlock {
            tracing::warn!("doorbell drain failed: {}", err);
        }
        false
    }

    /// Raw descriptor, for handing to another process.
    pub fn as_raw_fd(&self) -> RawFd {
        self.async_fd.get_ref().as_raw_fd()
    }
}

impl Notifier for Doorbell {
    fn signal(&self) {
        let fd = self.async_fd.get_ref().as_raw_fd();
        let value: u64 = 1;

        // SAFETY: fd is valid, value is a valid 8-byte buffer.
        let ret = unsafe {
            libc::write(
                fd,
                &value as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };

        if ret < 0 {
            let err = io::Error::last_os_error();
            // EAGAIN means the counter would overflow, which implies a
            // signal is already pending. That satisfies the contract.
            if err.kind() != ErrorKind::WouldBlock {
                tracing::warn!("doorbell signal failed: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_then_wait() {
        let doorbell = Doorbell::create().unwrap();

        doorbell.signal();

        tokio::time::timeout(Duration::from_millis(100), doorbell.wait())
            .await
            .expect("timeout waiting for doorbell")
            .expect("wait failed");
    }

    #[tokio::test]
    async fn signals_coalesce() {
        let doorbell = Doorbell::create().unwrap();

        doorbell.signal();
        doorbell.signal();
        doorbell.signal();

        // One wait drains all three.
        tokio::time::timeout(Duration::from_millis(100), doorbell.wait())
            .await
            .expect("timeout")
            .expect("wait failed");

        // Nothing left: a second wait must block until a fresh signal.
        let pending = tokio::time::timeout(Duration::from_millis(50), doorbell.wait()).await;
        assert!(pending.is_err(), "wait returned without a pending signal");
    }

    #[tokio::test]
    async fn wait_wakes_cross_task() {
        let doorbell = std::sync::Arc::new(Doorbell::create().unwrap());

        let waiter = tokio::spawn({
            let doorbell = doorbell.clone();
            async move { doorbell.wait().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        doorbell.signal();

        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("timeout")
            .expect("waiter panicked")
            .expect("wait failed");
    }
}
