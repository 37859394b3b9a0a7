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

//! Single-threaded event notifier.
//!
//! A current-thread tokio runtime provides socket readiness (its I/O
//! driver), deadline timers (its time driver) and fd-based child exit
//! watching. Spawned tasks only make progress while [`Notifier::run_once`]
//! is blocked, i.e. inside the engine's wait loop, and report back through
//! one event channel that the engine drains.

use std::future::Future;
use std::io;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::task::AbortHandle;

use super::process::ChildStatus;
use super::transport::TransferOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct TransferId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct WatchId(pub u64);

/// Something finished while the loop was running
#[derive(Debug)]
pub(crate) enum Event {
    TransferDone {
        id: TransferId,
        outcome: TransferOutcome,
    },
    ChildExited {
        id: WatchId,
        status: ChildStatus,
    },
    /// The exit watcher could not be registered; fatal for the engine
    WatchFailed {
        id: WatchId,
        error: io::Error,
    },
}

/// Why `run_once` returned without an event
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Stopped {
    Exited(i32),
    Disconnected,
}

pub(crate) struct Notifier {
    runtime: Runtime,
    sender: UnboundedSender<Event>,
    events: UnboundedReceiver<Event>,
    exit_code: Option<i32>,
}

impl Notifier {
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let (sender, events) = mpsc::unbounded_channel();
        Ok(Self {
            runtime,
            sender,
            events,
            exit_code: None,
        })
    }

    pub fn sender(&self) -> UnboundedSender<Event> {
        self.sender.clone()
    }

    /// Queue a task; it first runs on the next `run_once`.
    pub fn spawn<F>(&self, future: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(future).abort_handle()
    }

    /// Block until one event is available or an exit was requested.
    pub fn run_once(&mut self) -> Result<Event, Stopped> {
        if let Some(code) = self.exit_code {
            return Err(Stopped::Exited(code));
        }
        let events = &mut self.events;
        self.runtime
            .block_on(events.recv())
            .ok_or(Stopped::Disconnected)
    }

    /// Next already-delivered event, without blocking.
    pub fn try_next(&mut self) -> Option<Event> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Ask the loop to stop. The first requested code sticks.
    pub fn exit(&mut self, code: i32) {
        if self.exit_code.is_none() {
            self.exit_code = Some(code);
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_spawned_task_delivers_event() {
        let mut notifier = Notifier::new().unwrap();
        let sender = notifier.sender();
        notifier.spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = sender.send(Event::ChildExited {
                id: WatchId(3),
                status: ChildStatus::Exited(0),
            });
        });

        match notifier.run_once() {
            Ok(Event::ChildExited { id, status }) => {
                assert_eq!(id, WatchId(3));
                assert_eq!(status, ChildStatus::Exited(0));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(notifier.try_next().is_none());
    }

    #[test]
    fn test_aborted_task_never_reports() {
        let mut notifier = Notifier::new().unwrap();
        let sender = notifier.sender();
        let handle = notifier.spawn(async move {
            let _ = sender.send(Event::ChildExited {
                id: WatchId(1),
                status: ChildStatus::Exited(0),
            });
        });
        handle.abort();

        let sender = notifier.sender();
        notifier.spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = sender.send(Event::ChildExited {
                id: WatchId(2),
                status: ChildStatus::Exited(0),
            });
        });

        match notifier.run_once() {
            Ok(Event::ChildExited { id, .. }) => assert_eq!(id, WatchId(2)),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_exit_code_is_sticky() {
        let mut notifier = Notifier::new().unwrap();
        assert_eq!(notifier.exit_code(), 0);
        notifier.exit(1);
        notifier.exit(5);
        assert_eq!(notifier.exit_code(), 1);
        assert_eq!(notifier.run_once().unwrap_err(), Stopped::Exited(1));
    }
}
