//! Signal handling for spawned package managers.
//!
//! A [`ProcessSupervisor`] owns the set of running children. While at least
//! one child is tracked anywhere in the process, handlers for the two
//! user-termination signals are installed:
//!
//! - `SIGINT` is absorbed. The child shares our process group and already
//!   receives it, so acting on it here would race the child's own shutdown.
//! - `SIGTERM` is forwarded to every tracked child, since it is usually sent
//!   to our pid alone.
//!
//! Untracking the last child restores the dispositions that were in place
//! before the first one was tracked.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct State {
    children: BTreeSet<u32>,
    registration: Option<imp::Registration>,
}

/// Tracks running children and keeps the signal handlers serving them.
///
/// Clones share state; separately created supervisors are independent.
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor {
    state: Arc<Mutex<State>>,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a running child. The first tracked child registers this
    /// supervisor with the process-wide signal handlers.
    ///
    /// On non-unix platforms this must be called from within a tokio runtime.
    #[must_use = "the child is untracked when the guard is dropped"]
    pub fn track(&self, pid: u32) -> ChildGuard {
        let mut state = self.lock();
        state.children.insert(pid);

        if state.registration.is_none() {
            match imp::register(Arc::downgrade(&self.state)) {
                Ok(registration) => {
                    state.registration = Some(registration);
                    debug!(pid, "Installed signal handlers");
                }
                Err(e) => warn!(error = %e, "Failed to install signal handlers"),
            }
        }

        ChildGuard {
            supervisor: self.clone(),
            pid,
        }
    }

    /// Pids of the children currently tracked.
    #[must_use]
    pub fn active_children(&self) -> Vec<u32> {
        self.lock().children.iter().copied().collect()
    }

    /// Whether this supervisor is registered with the signal handlers.
    #[must_use]
    pub fn handlers_installed(&self) -> bool {
        self.lock().registration.is_some()
    }

    fn untrack(&self, pid: u32) {
        let registration = {
            let mut state = self.lock();
            state.children.remove(&pid);
            if state.children.is_empty() {
                state.registration.take()
            } else {
                None
            }
        };

        if let Some(registration) = registration {
            drop(registration);
            debug!(pid, "Removed signal handlers");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Untracks its child when dropped.
#[derive(Debug)]
pub struct ChildGuard {
    supervisor: ProcessSupervisor,
    pid: u32,
}

impl ChildGuard {
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.supervisor.untrack(self.pid);
    }
}

/// Process-wide handlers installed with `sigaction(2)`.
///
/// The handler only writes the signal number to a pipe. A reader thread
/// drains it and does the actual work outside signal context.
#[cfg(unix)]
mod imp {
    use super::State;
    use std::fs::File;
    use std::io::{self, Read};
    use std::os::fd::{FromRawFd, RawFd};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::{Mutex, MutexGuard, PoisonError, Weak};
    use std::{mem, ptr, thread};
    use tracing::{debug, warn};

    const SIGNALS: [libc::c_int; 2] = [libc::SIGINT, libc::SIGTERM];

    /// Write end of the wakeup pipe, or -1 before the reader starts.
    static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

    static HUB: Mutex<Hub> = Mutex::new(Hub {
        next_id: 0,
        supervisors: Vec::new(),
        previous: None,
    });

    struct Hub {
        next_id: u64,
        supervisors: Vec<(u64, Weak<Mutex<State>>)>,
        /// Dispositions replaced by ours; `Some` while ours are installed.
        previous: Option<[libc::sigaction; 2]>,
    }

    /// One supervisor's membership; dropping the last one restores the
    /// previous dispositions.
    #[derive(Debug)]
    pub(super) struct Registration {
        id: u64,
    }

    pub(super) fn register(state: Weak<Mutex<State>>) -> io::Result<Registration> {
        let mut hub = lock_hub();
        if hub.previous.is_none() {
            start_reader()?;
            hub.previous = Some(install()?);
        }

        hub.next_id += 1;
        let id = hub.next_id;
        hub.supervisors.push((id, state));
        Ok(Registration { id })
    }

    impl Drop for Registration {
        fn drop(&mut self) {
            let mut hub = lock_hub();
            hub.supervisors.retain(|(id, _)| *id != self.id);
            if hub.supervisors.is_empty() {
                if let Some(previous) = hub.previous.take() {
                    restore(&previous);
                }
            }
        }
    }

    fn lock_hub() -> MutexGuard<'static, Hub> {
        HUB.lock().unwrap_or_else(PoisonError::into_inner)
    }

    extern "C" fn on_signal(signo: libc::c_int) {
        let fd = WAKE_FD.load(Ordering::Relaxed);
        let byte = u8::try_from(signo).unwrap_or(0);
        let errno = saved_errno();
        // SAFETY: write(2) is async-signal-safe and `byte` outlives the call.
        // The write end is non-blocking, so a full pipe drops the byte.
        unsafe {
            libc::write(fd, ptr::addr_of!(byte).cast(), 1);
        }
        restore_errno(errno);
    }

    #[cfg(target_os = "linux")]
    fn errno_location() -> *mut libc::c_int {
        // SAFETY: returns the calling thread's errno slot.
        unsafe { libc::__errno_location() }
    }

    #[cfg(target_os = "macos")]
    fn errno_location() -> *mut libc::c_int {
        // SAFETY: returns the calling thread's errno slot.
        unsafe { libc::__error() }
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    fn saved_errno() -> libc::c_int {
        // SAFETY: the slot is valid for the lifetime of the thread.
        unsafe { *errno_location() }
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    fn restore_errno(errno: libc::c_int) {
        // SAFETY: the slot is valid for the lifetime of the thread.
        unsafe { *errno_location() = errno }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn saved_errno() -> libc::c_int {
        0
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn restore_errno(_errno: libc::c_int) {}

    /// Create the wakeup pipe and its reader thread, once per process.
    fn start_reader() -> io::Result<()> {
        if WAKE_FD.load(Ordering::Acquire) >= 0 {
            return Ok(());
        }

        let mut fds: [libc::c_int; 2] = [-1; 2];
        // SAFETY: `fds` has room for the two descriptors pipe(2) writes.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let [read_fd, write_fd] = fds;

        // SAFETY: both descriptors were just created and are owned here.
        let configured = unsafe {
            libc::fcntl(read_fd, libc::F_SETFD, libc::FD_CLOEXEC) == 0
                && libc::fcntl(write_fd, libc::F_SETFD, libc::FD_CLOEXEC) == 0
                && libc::fcntl(write_fd, libc::F_SETFL, libc::O_NONBLOCK) == 0
        };
        if !configured {
            let err = io::Error::last_os_error();
            close_both(read_fd, write_fd);
            return Err(err);
        }

        // SAFETY: the read end is owned by the reader from here on.
        let pipe = unsafe { File::from_raw_fd(read_fd) };
        if let Err(e) = thread::Builder::new()
            .name("pmshim-signals".to_string())
            .spawn(move || read_signals(pipe))
        {
            // SAFETY: the write end was never published.
            unsafe { libc::close(write_fd) };
            return Err(e);
        }

        WAKE_FD.store(write_fd, Ordering::Release);
        Ok(())
    }

    fn close_both(read_fd: RawFd, write_fd: RawFd) {
        // SAFETY: both descriptors are owned by the caller and not yet shared.
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }

    fn read_signals(mut pipe: File) {
        let mut buf = [0u8; 32];
        loop {
            let n = match pipe.read(&mut buf) {
                Ok(0) => return,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Signal pipe failed");
                    return;
                }
            };
            for &signo in &buf[..n] {
                handle(libc::c_int::from(signo));
            }
        }
    }

    fn handle(signo: libc::c_int) {
        if signo != libc::SIGTERM {
            debug!("SIGINT received; left to the child");
            return;
        }

        // Copy the members out so no supervisor lock is taken under the hub
        let supervisors: Vec<Weak<Mutex<State>>> = lock_hub()
            .supervisors
            .iter()
            .map(|(_, state)| state.clone())
            .collect();

        for state in supervisors.iter().filter_map(Weak::upgrade) {
            let children: Vec<u32> = state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .children
                .iter()
                .copied()
                .collect();
            for pid in children {
                debug!(pid, "Forwarding SIGTERM");
                send_term_signal(pid);
            }
        }
    }

    fn install() -> io::Result<[libc::sigaction; 2]> {
        // SAFETY: an all-zero sigaction is a valid value to be overwritten.
        let mut previous: [libc::sigaction; 2] = unsafe { mem::zeroed() };

        for (i, signo) in SIGNALS.iter().enumerate() {
            // SAFETY: zeroed means no flags and an empty mask before we set
            // them; both pointers are valid for the duration of the call.
            let installed = unsafe {
                let mut action: libc::sigaction = mem::zeroed();
                action.sa_sigaction = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
                action.sa_flags = libc::SA_RESTART;
                libc::sigemptyset(&mut action.sa_mask);
                libc::sigaction(*signo, &action, &mut previous[i])
            };
            if installed != 0 {
                let err = io::Error::last_os_error();
                restore(&previous[..i]);
                return Err(err);
            }
        }

        Ok(previous)
    }

    fn restore(previous: &[libc::sigaction]) {
        for (signo, action) in SIGNALS.iter().zip(previous) {
            // SAFETY: `action` was filled in by sigaction(2) for this signal.
            if unsafe { libc::sigaction(*signo, action, ptr::null_mut()) } != 0 {
                warn!(
                    signo,
                    error = %io::Error::last_os_error(),
                    "Failed to restore signal disposition"
                );
            }
        }
    }

    fn send_term_signal(pid: u32) {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return;
        };
        // SAFETY: kill(2) has no memory-safety preconditions; the pid belongs
        // to a child we spawned and have not reaped yet.
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
    }
}

/// Ctrl-C is delivered to every console process; absorb it while children run.
#[cfg(not(unix))]
mod imp {
    use super::State;
    use std::io;
    use std::sync::{Mutex, Weak};
    use tokio::task::JoinHandle;
    use tracing::debug;

    #[derive(Debug)]
    pub(super) struct Registration(JoinHandle<()>);

    pub(super) fn register(_state: Weak<Mutex<State>>) -> io::Result<Registration> {
        Ok(Registration(tokio::spawn(async {
            while tokio::signal::ctrl_c().await.is_ok() {
                debug!("Ctrl-C received; left to the child");
            }
        })))
    }

    impl Drop for Registration {
        fn drop(&mut self) {
            self.0.abort();
        }
    }
}
