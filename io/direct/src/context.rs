//! Per-thread I/O submission contexts.
//!
//! Every thread that issues disk I/O owns a private submission context,
//! created by [`register_thread`] and torn down by [`deregister_thread`].
//! The context wraps an io_uring instance; if ring setup fails (old
//! kernel, seccomp policy) the context degrades to synchronous
//! `pread`/`pwrite` on the same code path, the same way the teacher
//! drivers fall back from uring to a portable engine.

use std::cell::RefCell;
use std::io;
use std::os::fd::RawFd;

use io_uring::{IoUring, opcode, types};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Cap on simultaneously submitted entries per ring.
pub(crate) const MAX_INFLIGHT: usize = 256;

/// Submission/reap attempts before a request is abandoned.
pub(crate) const IO_RETRIES: usize = 5;

thread_local! {
    static CONTEXT: RefCell<Option<IoContext>> = const { RefCell::new(None) };
}

/// One physical request: `len` bytes at file `offset`, to or from `ptr`.
pub(crate) struct PhysOp {
    pub offset: u64,
    pub len: usize,
    pub ptr: *mut u8,
}

enum Backend {
    Uring(IoUring),
    Sync,
}

pub(crate) struct IoContext {
    backend: Backend,
}

/// Create this thread's submission context.
///
/// Returns [`Error::AlreadyRegistered`] if the thread already has one.
pub fn register_thread() -> Result<()> {
    CONTEXT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            return Err(Error::AlreadyRegistered);
        }
        let backend = match IoUring::new(MAX_INFLIGHT as u32) {
            Ok(ring) => {
                debug!("io_uring context created");
                Backend::Uring(ring)
            }
            Err(e) => {
                warn!("io_uring setup failed ({e}); using synchronous fallback");
                Backend::Sync
            }
        };
        *slot = Some(IoContext { backend });
        Ok(())
    })
}

/// Tear down this thread's submission context.
///
/// Returns [`Error::NotRegistered`] if the thread has none.
pub fn deregister_thread() -> Result<()> {
    CONTEXT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.take().is_none() {
            return Err(Error::NotRegistered);
        }
        Ok(())
    })
}

/// Whether the calling thread holds a submission context.
pub fn thread_registered() -> bool {
    CONTEXT.with(|slot| slot.borrow().is_some())
}

pub(crate) fn with_context<R>(f: impl FnOnce(&mut IoContext) -> Result<R>) -> Result<R> {
    CONTEXT.with(|slot| {
        let mut slot = slot.borrow_mut();
        match slot.as_mut() {
            Some(ctx) => f(ctx),
            None => Err(Error::NotRegistered),
        }
    })
}

impl IoContext {
    /// Execute a list of physical requests against `fd`, batching at most
    /// [`MAX_INFLIGHT`] at a time. Reads tolerate short transfers (end of
    /// file); writes must transfer fully.
    pub(crate) fn execute(&mut self, fd: RawFd, ops: &[PhysOp], is_write: bool) -> Result<()> {
        for batch in ops.chunks(MAX_INFLIGHT) {
            match &mut self.backend {
                Backend::Uring(ring) => submit_and_reap(ring, fd, batch, is_write)?,
                Backend::Sync => sync_batch(fd, batch, is_write)?,
            }
        }
        Ok(())
    }
}

fn submit_and_reap(ring: &mut IoUring, fd: RawFd, batch: &[PhysOp], is_write: bool) -> Result<()> {
    let op_name = if is_write { "write" } else { "read" };
    let mut tries = 0;
    loop {
        let mut push_failed = false;
        {
            let mut sq = ring.submission();
            for (i, op) in batch.iter().enumerate() {
                let entry = if is_write {
                    opcode::Write::new(types::Fd(fd), op.ptr as *const u8, op.len as u32)
                        .offset(op.offset)
                        .build()
                        .user_data(i as u64)
                } else {
                    opcode::Read::new(types::Fd(fd), op.ptr, op.len as u32)
                        .offset(op.offset)
                        .build()
                        .user_data(i as u64)
                };
                // SAFETY: op.ptr stays valid until submit_and_wait returns
                // below; nothing escapes this call.
                if unsafe { sq.push(&entry) }.is_err() {
                    push_failed = true;
                    break;
                }
            }
        }
        if push_failed {
            // SQ smaller than expected; drain whatever got queued and retry.
            let _ = ring.submit_and_wait(0);
            for _ in ring.completion() {}
            tries += 1;
            metrics::IO_RETRY.increment();
            if tries >= IO_RETRIES {
                return Err(Error::RetriesExhausted {
                    op: op_name,
                    attempts: tries,
                });
            }
            continue;
        }

        let mut reaped = 0;
        let mut failed = false;
        while reaped < batch.len() {
            if let Err(e) = ring.submit_and_wait(batch.len() - reaped) {
                warn!("submit_and_wait failed: {e}, try #{}", tries + 1);
                failed = true;
                break;
            }
            for cqe in ring.completion() {
                reaped += 1;
                let res = cqe.result();
                let idx = cqe.user_data() as usize;
                if res < 0 {
                    warn!(
                        "{op_name} at offset {} failed: {}, try #{}",
                        batch[idx].offset,
                        io::Error::from_raw_os_error(-res),
                        tries + 1
                    );
                    failed = true;
                } else if is_write && (res as usize) < batch[idx].len {
                    warn!(
                        "short {op_name} at offset {} ({res} of {}), try #{}",
                        batch[idx].offset,
                        batch[idx].len,
                        tries + 1
                    );
                    failed = true;
                }
            }
        }

        if !failed {
            return Ok(());
        }
        // Drain any stragglers so the next attempt starts clean.
        while reaped < batch.len() {
            if ring.submit_and_wait(batch.len() - reaped).is_err() {
                break;
            }
            for _ in ring.completion() {
                reaped += 1;
            }
        }
        tries += 1;
        metrics::IO_RETRY.increment();
        if tries >= IO_RETRIES {
            return Err(Error::RetriesExhausted {
                op: op_name,
                attempts: tries,
            });
        }
    }
}

fn sync_batch(fd: RawFd, batch: &[PhysOp], is_write: bool) -> Result<()> {
    let op_name = if is_write { "write" } else { "read" };
    for op in batch {
        let mut tries = 0;
        'op: loop {
            let mut done = 0usize;
            while done < op.len {
                let ret = if is_write {
                    // SAFETY: ptr..ptr+len is valid for the duration of
                    // the call per PhysOp construction.
                    unsafe {
                        libc::pwrite(
                            fd,
                            op.ptr.add(done) as *const libc::c_void,
                            op.len - done,
                            (op.offset + done as u64) as libc::off_t,
                        )
                    }
                } else {
                    // SAFETY: as above.
                    unsafe {
                        libc::pread(
                            fd,
                            op.ptr.add(done) as *mut libc::c_void,
                            op.len - done,
                            (op.offset + done as u64) as libc::off_t,
                        )
                    }
                };
                if ret < 0 {
                    let e = io::Error::last_os_error();
                    if e.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    warn!("{op_name} at offset {} failed: {e}, try #{}", op.offset, tries + 1);
                    tries += 1;
                    metrics::IO_RETRY.increment();
                    if tries >= IO_RETRIES {
                        return Err(Error::RetriesExhausted {
                            op: op_name,
                            attempts: tries,
                        });
                    }
                    continue 'op;
                }
                if ret == 0 {
                    // End of file. Reads leave the remainder zeroed;
                    // writes must not come up short.
                    if is_write {
                        return Err(Error::Io(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "write returned zero",
                        )));
                    }
                    break;
                }
                done += ret as usize;
            }
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_deregister() {
        assert!(!thread_registered());
        register_thread().unwrap();
        assert!(thread_registered());
        assert!(matches!(register_thread(), Err(Error::AlreadyRegistered)));
        deregister_thread().unwrap();
        assert!(!thread_registered());
        assert!(matches!(deregister_thread(), Err(Error::NotRegistered)));
    }

    #[test]
    fn test_unregistered_use_fails() {
        let r = with_context(|_| Ok(()));
        assert!(matches!(r, Err(Error::NotRegistered)));
    }
}
