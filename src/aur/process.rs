/*
 * aurlink - Asynchronous AUR client.
 * Copyright (C) 2025  compiledkernel-idk and aurlink contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! git child processes for clone/update requests.
//!
//! Children are spawned with `std::process::Command` and watched through a
//! pidfd registered with the notifier's reactor, so exit is reported through
//! the same event channel as network transfers without installing any
//! process-wide SIGCHLD handler.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use super::notifier::{Event, Notifier, WatchId};
use super::response::CloneOperation;

/// Exit status of a child whose program could not be executed
const EXEC_FAILED: i32 = 127;

/// How a watched child terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildStatus {
    Exited(i32),
    Signaled(i32),
}

impl ChildStatus {
    /// Numeric status handed to callbacks, shell style for signals
    pub fn code(&self) -> i32 {
        match *self {
            ChildStatus::Exited(code) => code,
            ChildStatus::Signaled(signo) => 128 + signo,
        }
    }

    /// Empty on success
    pub fn message(&self) -> String {
        match *self {
            ChildStatus::Exited(0) => String::new(),
            ChildStatus::Exited(code) => {
                format!("git exited with unexpected exit status {}", code)
            }
            ChildStatus::Signaled(signo) => format!("git was terminated by signal {}", signo),
        }
    }
}

impl CloneOperation {
    /// Update when the target already is a git checkout
    pub fn detect(workdir: &Path, reponame: &str) -> Self {
        if workdir.join(reponame).join(".git").exists() {
            CloneOperation::Update
        } else {
            CloneOperation::Clone
        }
    }

    /// Full argument vector, `git` first
    pub fn argv(&self, reponame: &str, url: &str) -> Vec<OsString> {
        let args = match self {
            CloneOperation::Update => vec!["git", "-C", reponame, "pull", "--quiet", "--ff-only"],
            CloneOperation::Clone => vec!["git", "clone", "--quiet", url],
        };
        args.into_iter().map(OsString::from).collect()
    }
}

struct Watch {
    pid: libc::pid_t,
    abort: AbortHandle,
}

/// Children the engine is currently waiting on
pub(crate) struct ProcessTable {
    program: PathBuf,
    workdir: PathBuf,
    next_id: u64,
    watches: HashMap<WatchId, Watch>,
    /// Cancelled children that were left running
    detached: Vec<libc::pid_t>,
}

impl ProcessTable {
    pub fn new(program: PathBuf, workdir: PathBuf) -> Self {
        Self {
            program,
            workdir,
            next_id: 0,
            watches: HashMap::new(),
            detached: Vec::new(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Start the child and register its exit watcher.
    ///
    /// `argv[0]` is replaced by the configured program. Only failures to
    /// create the child come back here. When the program cannot be
    /// executed the child counts as having exited with status 127, which
    /// is reported through the notifier like any other exit.
    pub fn spawn(&mut self, notifier: &Notifier, argv: &[OsString]) -> io::Result<WatchId> {
        let mut command = Command::new(&self.program);
        command
            .args(argv.iter().skip(1))
            .current_dir(&self.workdir)
            .stdin(Stdio::null());

        self.next_id += 1;
        let id = WatchId(self.next_id);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) if is_fork_failure(&e) => return Err(e),
            Err(e) => {
                debug!("cannot execute {}: {}", self.program.display(), e);
                let _ = notifier.sender().send(Event::ChildExited {
                    id,
                    status: ChildStatus::Exited(EXEC_FAILED),
                });
                return Ok(id);
            }
        };
        let pid = child.id() as libc::pid_t;
        // Dropping `Child` neither waits nor kills; the watcher reaps it.
        drop(child);

        let sender = notifier.sender();
        let abort = notifier.spawn(async move {
            let event = match wait_for_exit(pid).await {
                Ok(status) => Event::ChildExited { id, status },
                Err(error) => Event::WatchFailed { id, error },
            };
            let _ = sender.send(event);
        });

        debug!("spawned {:?} as pid {} ({:?})", argv, pid, id);
        self.watches.insert(id, Watch { pid, abort });
        Ok(id)
    }

    /// Forget a watcher whose child has been reaped
    pub fn release(&mut self, id: WatchId) {
        self.watches.remove(&id);
    }

    /// Stop watching without touching the child
    pub fn detach(&mut self, id: WatchId) {
        if let Some(watch) = self.watches.remove(&id) {
            watch.abort.abort();
            trace!("detached pid {}", watch.pid);
            self.detached.push(watch.pid);
        }
    }

    /// Reap detached children that have already exited. Never blocks.
    pub fn reap_detached(&mut self) {
        self.detached.retain(|&pid| {
            let mut status = 0;
            // SAFETY: plain syscall on a pid we spawned.
            let rc = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
            rc == 0
        });
    }

    pub fn detached(&self) -> usize {
        self.detached.len()
    }
}

/// Errors that mean no child was created, as opposed to a child that
/// failed to execute its program.
fn is_fork_failure(error: &io::Error) -> bool {
    matches!(
        error.raw_os_error(),
        Some(libc::EAGAIN) | Some(libc::ENOMEM) | Some(libc::EMFILE) | Some(libc::ENFILE)
    )
}

fn pidfd_open(pid: libc::pid_t) -> io::Result<OwnedFd> {
    // SAFETY: pidfd_open takes a pid and flags and returns a new fd or -1.
    let fd = unsafe { libc::syscall(libc::SYS_pidfd_open, pid, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: the kernel just handed us this descriptor.
    Ok(unsafe { OwnedFd::from_raw_fd(fd as libc::c_int) })
}

/// Non-blocking reap through the pidfd; `WouldBlock` while still running.
fn reap(pidfd: &OwnedFd) -> io::Result<ChildStatus> {
    // SAFETY: a zeroed siginfo_t is a valid out-parameter for waitid.
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    let rc = unsafe {
        libc::waitid(
            libc::P_PIDFD,
            pidfd.as_raw_fd() as libc::id_t,
            &mut info,
            libc::WEXITED | libc::WNOHANG,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: waitid filled in the child fields (si_pid stays 0 otherwise).
    let (pid, status) = unsafe { (info.si_pid(), info.si_status()) };
    if pid == 0 {
        return Err(io::ErrorKind::WouldBlock.into());
    }

    Ok(match info.si_code {
        libc::CLD_EXITED => ChildStatus::Exited(status),
        _ => ChildStatus::Signaled(status),
    })
}

async fn wait_for_exit(pid: libc::pid_t) -> io::Result<ChildStatus> {
    let pidfd = AsyncFd::with_interest(pidfd_open(pid)?, Interest::READABLE)?;
    loop {
        let mut ready = pidfd.readable().await?;
        match ready.try_io(|fd| reap(fd.get_ref())) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}
