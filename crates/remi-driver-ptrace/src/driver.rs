use std::{
    cell::{Cell, RefCell},
    thread::ThreadId,
};

use nix::unistd::Pid;
use remi_core::{AttachState, ProcessId, RemiInfo, RemoteAddress};

use crate::{
    Error,
    watcher::{Reply, Request, Watcher},
};

/// Ptrace driver for a single Linux process.
pub struct PtraceDriver {
    pid: ProcessId,
    page_size: u64,
    state: Cell<AttachState>,
    watcher: RefCell<Option<Watcher>>,
    transfer: RefCell<Vec<u8>>,
}

impl Drop for PtraceDriver {
    fn drop(&mut self) {
        if self.state.get() == AttachState::Attached {
            if let Err(err) = self.detach() {
                tracing::error!(?err, pid = %self.pid, "Failed to detach from the process");
            }
        }
    }
}

impl PtraceDriver {
    pub fn attach(pid: ProcessId) -> Result<Self, Error> {
        let raw_pid = pid.as_raw().ok_or(Error::InvalidProcessId(pid))?;

        let driver = Self {
            pid,
            page_size: page_size()?,
            state: Cell::new(AttachState::Detached),
            watcher: RefCell::new(None),
            transfer: RefCell::new(Vec::new()),
        };

        driver.transition(AttachState::Attaching)?;

        let result = Watcher::spawn(Pid::from_raw(raw_pid)).and_then(|watcher| {
            watcher.request(Request::Seize)?;
            Ok(watcher)
        });

        match result {
            Ok(watcher) => {
                *driver.watcher.borrow_mut() = Some(watcher);
                driver.transition(AttachState::Attached)?;
                tracing::debug!(%pid, "attached");
                Ok(driver)
            }
            Err(err) => {
                driver.transition(AttachState::Detached)?;
                Err(err)
            }
        }
    }

    pub fn info(&self) -> Result<RemiInfo, Error> {
        Ok(RemiInfo {
            pid: self.pid,
            page_size: self.page_size,
        })
    }

    pub fn state(&self) -> AttachState {
        self.state.get()
    }

    pub fn watcher_thread_id(&self) -> Option<ThreadId> {
        self.watcher
            .borrow()
            .as_ref()
            .and_then(|watcher| watcher.thread_id())
    }

    pub fn pause(&self) -> Result<(), Error> {
        self.request(Request::Interrupt)?;
        Ok(())
    }

    pub fn resume(&self) -> Result<(), Error> {
        self.request(Request::Continue)?;
        Ok(())
    }

    pub fn read_memory(&self, address: RemoteAddress, buffer: &mut [u8]) -> Result<(), Error> {
        if address.checked_add(buffer.len() as u64).is_none() {
            return Err(Error::AddressOverflow(address));
        }

        let mut transfer = std::mem::take(&mut *self.transfer.borrow_mut());
        transfer.clear();
        transfer.resize(buffer.len(), 0);

        match self.request(Request::Peek {
            address,
            buffer: transfer,
        })? {
            Reply::Data(data) => {
                buffer.copy_from_slice(&data);
                *self.transfer.borrow_mut() = data;
                Ok(())
            }
            Reply::Done => Err(Error::WatcherGone),
        }
    }

    pub fn detach(&self) -> Result<(), Error> {
        if self.state.get() == AttachState::Detached {
            return Ok(());
        }

        self.transition(AttachState::Detaching)?;
        let result = self.request_unchecked(Request::Detach);

        // Joins the watcher. If the detach request failed, the kernel
        // releases the tracee when the watcher thread exits.
        self.watcher.borrow_mut().take();
        self.transition(AttachState::Detached)?;
        tracing::debug!(pid = %self.pid, "detached");

        result.map(|_| ())
    }

    fn transition(&self, to: AttachState) -> Result<(), Error> {
        let from = self.state.get();
        if !from.can_transition(to) {
            return Err(Error::Transition { from, to });
        }

        tracing::trace!(pid = %self.pid, ?from, ?to, "attach state transition");
        self.state.set(to);
        Ok(())
    }

    fn request(&self, request: Request) -> Result<Reply, Error> {
        match self.state.get() {
            AttachState::Attached => self.request_unchecked(request),
            state => Err(Error::NotAttached(state)),
        }
    }

    fn request_unchecked(&self, request: Request) -> Result<Reply, Error> {
        match self.watcher.borrow().as_ref() {
            Some(watcher) => watcher.request(request),
            None => Err(Error::WatcherGone),
        }
    }
}

fn page_size() -> Result<u64, Error> {
    // SAFETY: `sysconf` has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }

    Ok(size as u64)
}
