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

//! Scoped SIGCHLD blocking for the thread that owns the engine.
//!
//! Child exit is observed through pidfds, so SIGCHLD is never needed for
//! delivery. Blocking it keeps a foreign SIGCHLD handler from running on
//! the engine thread (and reaping our children) while the guard is alive.

use std::io;
use std::mem::MaybeUninit;

pub(crate) struct ChildSignalGuard {
    saved: libc::sigset_t,
}

impl ChildSignalGuard {
    pub fn block() -> io::Result<Self> {
        let mut saved = MaybeUninit::<libc::sigset_t>::uninit();
        // SAFETY: both sets are valid for writes and initialized by
        // sigemptyset/pthread_sigmask before being read.
        let rc = unsafe {
            let mut set = MaybeUninit::<libc::sigset_t>::uninit();
            libc::sigemptyset(set.as_mut_ptr());
            libc::sigaddset(set.as_mut_ptr(), libc::SIGCHLD);
            libc::pthread_sigmask(libc::SIG_BLOCK, set.as_ptr(), saved.as_mut_ptr())
        };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(Self {
            saved: unsafe { saved.assume_init() },
        })
    }
}

impl Drop for ChildSignalGuard {
    fn drop(&mut self) {
        // SAFETY: `saved` was filled in by pthread_sigmask in `block`.
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.saved, std::ptr::null_mut());
        }
    }
}

#[cfg(test)]
pub(crate) fn sigchld_blocked() -> bool {
    let mut current = MaybeUninit::<libc::sigset_t>::uninit();
    unsafe {
        libc::pthread_sigmask(libc::SIG_BLOCK, std::ptr::null(), current.as_mut_ptr());
        libc::sigismember(current.as_ptr(), libc::SIGCHLD) == 1
    }
}
