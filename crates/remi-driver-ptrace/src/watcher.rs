use std::{
    thread::{JoinHandle, ThreadId},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use nix::{
    errno::Errno,
    sys::{
        ptrace::{self, AddressType},
        signal::Signal,
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::Pid,
};
use remi_core::RemoteAddress;

use crate::Error;

const WORD_SIZE: usize = size_of::<libc::c_long>();

/// How long the watcher waits for a request before checking on a running
/// tracee.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A request executed on the watcher thread.
pub(crate) enum Request {
    /// Establish the trace relationship without stopping the target.
    Seize,

    /// Stop the target and wait until it is in a ptrace stop.
    Interrupt,

    /// Let a stopped target run again.
    Continue,

    /// Read `buffer.len()` bytes at `address`.
    ///
    /// The buffer travels to the watcher and back so that it can be reused.
    Peek { address: RemoteAddress, buffer: Vec<u8> },

    /// Release the target and stop the watcher.
    Detach,
}

/// A successful reply from the watcher thread.
pub(crate) enum Reply {
    Done,
    Data(Vec<u8>),
}

/// A dedicated thread that owns the trace relationship.
///
/// Ptrace requests are only accepted from the thread that attached, so every
/// request, including memory peeks, is executed there. The controlling thread
/// blocks until the reply arrives, which also keeps attach and detach from
/// interleaving with reads.
///
/// Between requests the watcher also reaps the stops a running tracee enters
/// on its own, such as signal-delivery stops, and lets it continue. Otherwise
/// any signal sent to the target would leave it frozen until the next pause.
pub(crate) struct Watcher {
    requests: Option<Sender<Request>>,
    replies: Receiver<Result<Reply, Error>>,
    thread: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Spawns the watcher thread for the given process.
    pub fn spawn(pid: Pid) -> Result<Self, Error> {
        let (request_tx, request_rx) = crossbeam_channel::bounded(1);
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);

        let thread = std::thread::Builder::new()
            .name(format!("remi-watcher-{pid}"))
            .spawn(move || {
                let tracer = Tracer {
                    pid,
                    seized: false,
                    stopped: false,
                };

                tracer.run(request_rx, reply_tx);
            })?;

        Ok(Self {
            requests: Some(request_tx),
            replies: reply_rx,
            thread: Some(thread),
        })
    }

    /// Returns the identifier of the watcher thread.
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread.as_ref().map(|thread| thread.thread().id())
    }

    /// Sends a request to the watcher and waits for the reply.
    pub fn request(&self, request: Request) -> Result<Reply, Error> {
        let requests = self.requests.as_ref().ok_or(Error::WatcherGone)?;
        requests.send(request).map_err(|_| Error::WatcherGone)?;
        self.replies.recv().map_err(|_| Error::WatcherGone)?
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        // Closing the request channel ends the watcher loop.
        self.requests.take();

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("watcher thread panicked");
            }
        }
    }
}

/// The watcher side of the trace relationship.
struct Tracer {
    pid: Pid,

    /// The tracee is seized and has not been seen exiting.
    seized: bool,

    /// The tracee sits in the stop requested by [`Request::Interrupt`].
    stopped: bool,
}

impl Tracer {
    fn run(mut self, requests: Receiver<Request>, replies: Sender<Result<Reply, Error>>) {
        loop {
            let request = match requests.recv_timeout(IDLE_POLL_INTERVAL) {
                Ok(request) => request,
                Err(RecvTimeoutError::Timeout) => {
                    self.reap_stops();
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let detach = matches!(request, Request::Detach);
            let reply = self.handle(request);

            if replies.send(reply).is_err() || detach {
                break;
            }
        }

        tracing::trace!(pid = %self.pid, "watcher finished");
    }

    fn handle(&mut self, request: Request) -> Result<Reply, Error> {
        match request {
            Request::Seize => self.seize(),
            Request::Interrupt => self.interrupt(),
            Request::Continue => self.resume(),
            Request::Peek {
                address,
                mut buffer,
            } => {
                let pid = self.pid;
                peek_words(address, &mut buffer, |address| {
                    ptrace::read(pid, address.0 as AddressType).map_err(Error::peek)
                })?;
                Ok(Reply::Data(buffer))
            }
            Request::Detach => self.detach(),
        }
    }

    fn seize(&mut self) -> Result<Reply, Error> {
        tracing::trace!(pid = %self.pid, "seize");
        ptrace::seize(self.pid, ptrace::Options::empty()).map_err(Error::attach)?;
        self.seized = true;
        Ok(Reply::Done)
    }

    fn interrupt(&mut self) -> Result<Reply, Error> {
        if self.stopped {
            return Ok(Reply::Done);
        }

        ptrace::interrupt(self.pid).map_err(Error::control)?;
        self.wait_for_stop()?;
        Ok(Reply::Done)
    }

    fn wait_for_stop(&mut self) -> Result<(), Error> {
        loop {
            match waitpid(self.pid, Some(WaitPidFlag::__WALL)) {
                Ok(WaitStatus::PtraceEvent(..)) => {
                    self.stopped = true;
                    return Ok(());
                }
                Ok(WaitStatus::Stopped(_, signal)) => {
                    // Signal-delivery stop. Pass the signal on and keep
                    // waiting for the stop we asked for.
                    ptrace::cont(self.pid, signal).map_err(Error::control)?;
                }
                Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) => {
                    self.seized = false;
                    self.stopped = false;
                    return Err(Error::NoSuchProcess);
                }
                Ok(_) => {}
                Err(Errno::EINTR) => {}
                Err(errno) => return Err(Error::control(errno)),
            }
        }
    }

    /// Lets a running tracee leave the stops it entered since the last
    /// request.
    ///
    /// Signals are passed on as in [`Self::wait_for_stop`]. A group-stop is
    /// kept in effect with `PTRACE_LISTEN`, so a stopped job stays stopped
    /// until it receives `SIGCONT`.
    fn reap_stops(&mut self) {
        if !self.seized || self.stopped {
            return;
        }

        let flags = WaitPidFlag::WNOHANG | WaitPidFlag::__WALL;

        loop {
            let status = match waitpid(self.pid, Some(flags)) {
                Ok(WaitStatus::StillAlive) => return,
                Ok(status) => status,
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    tracing::trace!(pid = %self.pid, %errno, "wait for idle tracee failed");
                    return;
                }
            };

            let result = match status {
                WaitStatus::Stopped(_, signal) => {
                    tracing::trace!(pid = %self.pid, ?signal, "forwarding signal");
                    ptrace::cont(self.pid, signal)
                }
                WaitStatus::PtraceEvent(_, signal, libc::PTRACE_EVENT_STOP)
                    if is_stop_signal(signal) =>
                {
                    tracing::trace!(pid = %self.pid, ?signal, "group-stop");
                    listen(self.pid)
                }
                WaitStatus::PtraceEvent(..) => ptrace::cont(self.pid, None),
                WaitStatus::Exited(..) | WaitStatus::Signaled(..) => {
                    tracing::debug!(pid = %self.pid, "tracee exited");
                    self.seized = false;
                    return;
                }
                _ => Ok(()),
            };

            if let Err(errno) = result {
                tracing::trace!(pid = %self.pid, %errno, "failed to restart idle tracee");
                return;
            }
        }
    }

    fn resume(&mut self) -> Result<Reply, Error> {
        if !self.stopped {
            return Ok(Reply::Done);
        }

        ptrace::cont(self.pid, None).map_err(Error::control)?;
        self.stopped = false;
        Ok(Reply::Done)
    }

    fn detach(&mut self) -> Result<Reply, Error> {
        tracing::trace!(pid = %self.pid, "detach");

        // PTRACE_DETACH only works on a stopped tracee.
        match self.interrupt() {
            Ok(_) => {}
            Err(Error::NoSuchProcess) => return Ok(Reply::Done),
            Err(err) => return Err(err),
        }

        match ptrace::detach(self.pid, None) {
            Ok(()) | Err(Errno::ESRCH) => {
                self.stopped = false;
                Ok(Reply::Done)
            }
            Err(errno) => Err(Error::control(errno)),
        }
    }
}

fn is_stop_signal(signal: Signal) -> bool {
    matches!(
        signal,
        Signal::SIGSTOP | Signal::SIGTSTP | Signal::SIGTTIN | Signal::SIGTTOU
    )
}

/// Restarts a tracee in group-stop without resuming it.
fn listen(pid: Pid) -> nix::Result<()> {
    // SAFETY: PTRACE_LISTEN takes no address or data.
    let result = unsafe {
        libc::ptrace(
            libc::PTRACE_LISTEN,
            pid.as_raw(),
            std::ptr::null_mut::<libc::c_void>(),
            std::ptr::null_mut::<libc::c_void>(),
        )
    };

    Errno::result(result).map(drop)
}

/// Fills `buffer` with the memory at `address`, one machine word at a time.
///
/// `peek` is called with word-aligned addresses only. Unaligned heads and
/// tails are cut out of the covering words.
pub(crate) fn peek_words(
    address: RemoteAddress,
    buffer: &mut [u8],
    mut peek: impl FnMut(RemoteAddress) -> Result<libc::c_long, Error>,
) -> Result<(), Error> {
    let mut aligned = address.align_down(WORD_SIZE as u64);
    let mut skip = address.misalignment(WORD_SIZE as u64) as usize;
    let mut position = 0;

    while position < buffer.len() {
        let word = peek(aligned)?.to_ne_bytes();
        let size = std::cmp::min(WORD_SIZE - skip, buffer.len() - position);

        buffer[position..position + size].copy_from_slice(&word[skip..skip + size]);

        position += size;
        // Only wraps after the last word of the address space.
        aligned = RemoteAddress(aligned.0.wrapping_add(WORD_SIZE as u64));
        skip = 0;
    }

    Ok(())
}
