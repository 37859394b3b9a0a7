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

//! Multiplexed request engine.
//!
//! Callers queue RPC, raw, tarball and clone requests, then block in
//! [`RequestEngine::wait`]. Network transfers and git children run
//! concurrently on the calling thread and every result is handed to its
//! callback exactly once, from inside `wait`. Cancelled requests never
//! reach their callback.
//!
//! Callbacks return an `i32`: zero or positive to continue, negative to
//! abort. An abort cancels everything still pending and becomes the
//! return value of `wait`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use super::debug::{DebugLevel, Tracer};
use super::notifier::{Event, Notifier, Stopped, TransferId, WatchId};
use super::process::{ChildStatus, ProcessTable};
use super::request::{CloneRequest, HttpRequest, RawRequest, RpcRequest};
use super::response::{
    CloneOperation, CloneResponse, RawCallback, RawResponse, Response, ResponseHandler,
    RpcCallback, RpcResponse,
};
use super::signals::ChildSignalGuard;
use super::transport::{Multiplexer, TransferKind, TransferOutcome};
use crate::error::{AurError, AurResult};

/// Construction-time settings
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub debug: DebugLevel,
    /// Program run for clone/update requests
    pub git_program: PathBuf,
    /// Directory clones land in and updates are looked up in
    pub workdir: PathBuf,
    /// Honour HTTP(S)_PROXY from the environment
    pub use_proxy: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            debug: DebugLevel::None,
            git_program: PathBuf::from("git"),
            workdir: PathBuf::from("."),
            use_proxy: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ActiveRequest {
    Transfer(TransferId),
    Process(WatchId),
}

pub struct RequestEngine {
    baseurl: String,
    multiplexer: Multiplexer,
    processes: ProcessTable,
    active: BTreeMap<ActiveRequest, ResponseHandler>,
    notifier: Notifier,
    // Dropped last so the mask is restored after the runtime is gone.
    _sigchld: ChildSignalGuard,
}

impl RequestEngine {
    pub fn with_options(baseurl: impl Into<String>, options: EngineOptions) -> AurResult<Self> {
        let baseurl = baseurl.into();

        let sigchld = ChildSignalGuard::block().map_err(|source| AurError::Registration {
            what: "SIGCHLD mask",
            source,
        })?;

        let tracer = Tracer::new(&options.debug).map_err(|e| match &options.debug {
            DebugLevel::Requests(path) => {
                AurError::filesystem(path.display().to_string(), "cannot open request trace", e)
            }
            _ => AurError::Registration {
                what: "request tracer",
                source: e,
            },
        })?;

        let notifier = Notifier::new().map_err(|source| AurError::Registration {
            what: "event loop",
            source,
        })?;

        let multiplexer = Multiplexer::new(tracer, options.use_proxy)
            .map_err(|e| AurError::network(baseurl.clone(), e.to_string()))?;

        debug!("request engine ready for {} ({:?})", baseurl, options.debug);

        Ok(Self {
            baseurl,
            multiplexer,
            processes: ProcessTable::new(options.git_program, options.workdir),
            active: BTreeMap::new(),
            notifier,
            _sigchld: sigchld,
        })
    }

    /// Requests (transfers and processes) still in flight
    pub fn active_requests(&self) -> usize {
        self.active.len()
    }

    pub fn queue_rpc_request<F>(&mut self, request: &RpcRequest, callback: F)
    where
        F: Fn(Response<RpcResponse>) -> i32 + 'static,
    {
        let callback: RpcCallback = Rc::new(callback);
        self.queue_http_request(request, TransferKind::Rpc, || {
            ResponseHandler::rpc(callback.clone())
        });
    }

    pub fn queue_raw_request<F>(&mut self, request: &RawRequest, callback: F)
    where
        F: Fn(Response<RawResponse>) -> i32 + 'static,
    {
        let callback: RawCallback = Rc::new(callback);
        self.queue_http_request(request, TransferKind::Raw, || {
            ResponseHandler::raw(callback.clone())
        });
    }

    /// Like [`queue_raw_request`](Self::queue_raw_request), but asks the
    /// server not to compress the already compressed payload.
    pub fn queue_tarball_request<F>(&mut self, request: &RawRequest, callback: F)
    where
        F: Fn(Response<RawResponse>) -> i32 + 'static,
    {
        let callback: RawCallback = Rc::new(callback);
        self.queue_http_request(request, TransferKind::Tarball, || {
            ResponseHandler::raw(callback.clone())
        });
    }

    /// One transfer per locator; the callback fires once per transfer.
    fn queue_http_request(
        &mut self,
        request: &dyn HttpRequest,
        kind: TransferKind,
        make_handler: impl Fn() -> ResponseHandler,
    ) {
        for url in request.build(&self.baseurl) {
            let id = self.multiplexer.add(&self.notifier, &url, kind);
            self.active.insert(ActiveRequest::Transfer(id), make_handler());
        }
    }

    /// Clone the repository, or fast-forward it if it is already checked
    /// out. When no child process can be created the callback runs before
    /// this returns, with a negated errno as status. A git that cannot be
    /// executed is reported from `wait` as exit status 127.
    pub fn queue_clone_request<F>(&mut self, request: &CloneRequest, callback: F)
    where
        F: Fn(Response<CloneResponse>) -> i32 + 'static,
    {
        let operation = CloneOperation::detect(self.processes.workdir(), request.reponame());
        let handler = ResponseHandler::clone_op(operation, Rc::new(callback));

        let url = request
            .build(&self.baseurl)
            .into_iter()
            .next()
            .unwrap_or_default();
        let argv = operation.argv(request.reponame(), &url);

        match self.processes.spawn(&self.notifier, &argv) {
            Ok(id) => {
                self.active.insert(ActiveRequest::Process(id), handler);
            }
            Err(source) => self.spawn_failed(request.reponame(), handler, source),
        }
    }

    /// No child could be created: report it before returning to the caller.
    fn spawn_failed(&mut self, reponame: &str, handler: ResponseHandler, source: std::io::Error) {
        let err = AurError::Spawn { source };
        warn!("{} of {}: {}", handler.kind(), reponame, err);
        let r = handler.run(err.errno(), err.to_string());
        if r < 0 {
            self.abort(r);
        }
    }

    /// Run until every queued request has completed or the engine was
    /// cancelled. Returns 0 on normal completion, -1 after `cancel_all`,
    /// or the negative status of whatever aborted the loop.
    pub fn wait(&mut self) -> i32 {
        while !self.active.is_empty() {
            let event = match self.notifier.run_once() {
                Ok(event) => event,
                Err(Stopped::Exited(code)) => {
                    debug!("event loop exited with code {}", code);
                    break;
                }
                Err(Stopped::Disconnected) => {
                    warn!("event loop lost its event source");
                    break;
                }
            };
            if self.check_finished(event) < 0 {
                break;
            }
        }

        -self.notifier.exit_code()
    }

    /// Drop every pending request without invoking its callback and stop
    /// the event loop. Running git children are left alone.
    pub fn cancel_all(&mut self) {
        while let Some((request, handler)) = self.active.pop_first() {
            self.cancel(request);
            trace!("cancelled {:?} ({:?})", request, handler);
        }
        self.notifier.exit(1);
    }

    fn cancel(&mut self, request: ActiveRequest) {
        match request {
            ActiveRequest::Transfer(id) => {
                self.multiplexer.remove(id);
            }
            ActiveRequest::Process(id) => self.processes.detach(id),
        }
    }

    fn abort(&mut self, status: i32) {
        warn!(
            "aborting {} pending request(s) with status {}",
            self.active.len(),
            status
        );
        self.notifier.exit(-status);
        self.cancel_all();
    }

    /// Dispatch `first` and everything else already finished.
    fn check_finished(&mut self, first: Event) -> i32 {
        let mut next = Some(first);
        while let Some(event) = next {
            let r = self.dispatch(event);
            if r < 0 {
                self.abort(r);
                return r;
            }
            next = self.notifier.try_next();
        }
        0
    }

    fn dispatch(&mut self, event: Event) -> i32 {
        match event {
            Event::TransferDone { id, outcome } => self.finish_transfer(id, outcome),
            Event::ChildExited { id, status } => self.finish_child(id, status),
            Event::WatchFailed { id, error } => {
                self.processes.detach(id);
                self.active.remove(&ActiveRequest::Process(id));
                let err = AurError::Registration {
                    what: "child exit watcher",
                    source: error,
                };
                warn!("{}", err);
                err.errno()
            }
        }
    }

    fn finish_transfer(&mut self, id: TransferId, outcome: TransferOutcome) -> i32 {
        self.multiplexer.finish(id);

        // Finished while a cancellation was in progress.
        let mut handler = match self.active.remove(&ActiveRequest::Transfer(id)) {
            Some(handler) => handler,
            None => {
                trace!("discarding outcome of {:?}", id);
                return 0;
            }
        };

        let error = outcome.error_message();
        debug!(
            "{:?} finished: status {} ({} bytes){}",
            id,
            outcome.status,
            outcome.body.len(),
            if error.is_empty() { "" } else { ", failed" }
        );

        handler.append(&outcome.body);
        handler.run(i32::from(outcome.status), error)
    }

    fn finish_child(&mut self, id: WatchId, status: ChildStatus) -> i32 {
        self.processes.release(id);

        let handler = match self.active.remove(&ActiveRequest::Process(id)) {
            Some(handler) => handler,
            None => {
                trace!("discarding exit of {:?}", id);
                return 0;
            }
        };

        debug!("{:?} ({}) exited: {:?}", id, handler.kind(), status);
        handler.run(status.code(), status.message())
    }
}

impl Drop for RequestEngine {
    fn drop(&mut self) {
        if !self.active.is_empty() {
            self.cancel_all();
        }
        self.processes.reap_detached();
        if self.processes.detached() > 0 {
            debug!(
                "{} git process(es) still running at shutdown",
                self.processes.detached()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aur::signals::sigchld_blocked;
    use std::cell::RefCell;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn engine(baseurl: &str) -> RequestEngine {
        RequestEngine::with_options(
            baseurl,
            EngineOptions {
                use_proxy: false,
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn http_response(status_line: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        )
    }

    fn read_head(stream: &mut TcpStream) -> String {
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => head.extend_from_slice(&buf[..n]),
            }
        }
        String::from_utf8_lossy(&head).into_owned()
    }

    /// Serves one canned response per connection, reporting each request head.
    fn serve(responses: Vec<String>) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for response in responses {
                let (mut stream, _) = match listener.accept() {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let _ = tx.send(read_head(&mut stream));
                let _ = stream.write_all(response.as_bytes());
            }
        });
        (format!("http://{}", addr), rx)
    }

    /// Answers requests for `/fast`; every other request is left hanging.
    fn serve_fast_only(response: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let mut stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => return,
                };
                let response = response.clone();
                thread::spawn(move || {
                    if read_head(&mut stream).starts_with("GET /fast ") {
                        let _ = stream.write_all(response.as_bytes());
                    } else {
                        thread::sleep(Duration::from_secs(5));
                    }
                });
            }
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_wait_without_requests() {
        let mut engine = engine("http://127.0.0.1:1");
        assert_eq!(engine.active_requests(), 0);
        assert_eq!(engine.wait(), 0);
    }

    #[test]
    fn test_rpc_request_delivered_once() {
        let body = r#"{"version":5,"type":"multiinfo","resultcount":1,"results":[
            {"ID":1,"Name":"auracle-git","PackageBase":"auracle-git","PackageBaseID":1,"Version":"r1-1"}]}"#;
        let (base, requests) = serve(vec![http_response("200 OK", body)]);

        let mut engine = engine(&base);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        engine.queue_rpc_request(&RpcRequest::info(["auracle-git"]), move |r| {
            let names: Vec<String> = r.value.parse().unwrap().into_iter().map(|p| p.name).collect();
            sink.borrow_mut().push((r.status, r.error.clone(), names));
            0
        });
        assert_eq!(engine.active_requests(), 1);

        assert_eq!(engine.wait(), 0);
        assert_eq!(engine.active_requests(), 0);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (200, String::new(), vec!["auracle-git".to_string()]));

        let head = requests.recv().unwrap();
        assert!(head.starts_with("GET /rpc/?v=5&type=info&arg"));
        assert!(head.lines().next().unwrap().contains("auracle-git"));
    }

    #[test]
    fn test_http_error_status_passes_through() {
        let (base, _requests) = serve(vec![http_response("503 Service Unavailable", "")]);

        let mut engine = engine(&base);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        engine.queue_raw_request(&RawRequest::for_source_file("pkg", "PKGBUILD"), move |r| {
            sink.borrow_mut().push((r.status, r.error.clone(), r.is_ok()));
            0
        });

        assert_eq!(engine.wait(), 0);
        assert_eq!(*seen.borrow(), vec![(503, String::new(), false)]);
    }

    #[test]
    fn test_connection_failure_reports_message() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut engine = engine(&format!("http://127.0.0.1:{}", port));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        engine.queue_rpc_request(&RpcRequest::info(["x"]), move |r| {
            sink.borrow_mut().push((r.status, r.error.clone()));
            0
        });

        assert_eq!(engine.wait(), 0);
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 0);
        assert!(!seen[0].1.is_empty());
    }

    #[test]
    fn test_batched_request_fires_per_transfer() {
        let names = ["pkg-00", "pkg-01", "pkg-02", "pkg-03"];
        let responses = names
            .iter()
            .map(|_| http_response("200 OK", r#"{"version":5,"type":"multiinfo","resultcount":0,"results":[]}"#))
            .collect();
        let (base, _requests) = serve(responses);

        let request = RpcRequest::info(names).with_max_length(base.len() + 40);
        assert_eq!(request.build(&base).len(), names.len());

        let mut engine = engine(&base);
        let calls = Rc::new(RefCell::new(0));
        let counter = calls.clone();
        engine.queue_rpc_request(&request, move |r| {
            assert_eq!(r.status, 200);
            *counter.borrow_mut() += 1;
            0
        });
        assert_eq!(engine.active_requests(), names.len());

        assert_eq!(engine.wait(), 0);
        assert_eq!(*calls.borrow(), names.len());
    }

    #[test]
    fn test_tarball_request_sends_identity_encoding() {
        let (base, requests) = serve(vec![http_response("200 OK", "tarball-bytes")]);

        let mut engine = engine(&base);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        engine.queue_tarball_request(
            &RawRequest::for_tarball("/cgit/aur.git/snapshot/pkg.tar.gz"),
            move |r| {
                sink.borrow_mut().push(r.value.bytes.clone());
                0
            },
        );

        assert_eq!(engine.wait(), 0);
        assert_eq!(*seen.borrow(), vec![b"tarball-bytes".to_vec()]);

        let head = requests.recv().unwrap().to_ascii_lowercase();
        assert!(head.contains("accept-encoding: identity\r\n"));
    }

    #[test]
    fn test_callback_abort_cancels_the_rest() {
        let base = serve_fast_only(http_response("200 OK", "ok"));

        let mut engine = engine(&base);
        let calls = Rc::new(RefCell::new(Vec::new()));

        let sink = calls.clone();
        engine.queue_raw_request(&RawRequest::new("/hang"), move |_| {
            sink.borrow_mut().push("slow");
            0
        });
        let sink = calls.clone();
        engine.queue_raw_request(&RawRequest::new("/fast"), move |_| {
            sink.borrow_mut().push("fast");
            -libc::EIO
        });

        assert_eq!(engine.wait(), -libc::EIO);
        assert_eq!(engine.active_requests(), 0);
        assert_eq!(*calls.borrow(), vec!["fast"]);
    }

    #[test]
    fn test_cancel_all_drains_and_stops() {
        let base = serve_fast_only(http_response("200 OK", ""));
        let mut engine = engine(&base);
        let calls = Rc::new(RefCell::new(0));
        let counter = calls.clone();
        engine.queue_raw_request(&RawRequest::new("/hang"), move |_| {
            *counter.borrow_mut() += 1;
            0
        });

        engine.cancel_all();
        assert_eq!(engine.active_requests(), 0);
        assert_eq!(engine.multiplexer.running(), 0);

        let started = Instant::now();
        assert_ne!(engine.wait(), 0);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn test_request_trace_file() {
        let dir = tempdir().unwrap();
        let trace = dir.path().join("requests.log");
        let (base, _requests) = serve(vec![http_response("200 OK", "")]);

        let mut engine = RequestEngine::with_options(
            base.as_str(),
            EngineOptions {
                debug: DebugLevel::Requests(trace.clone()),
                use_proxy: false,
                ..Default::default()
            },
        )
        .unwrap();
        engine.queue_raw_request(&RawRequest::new("/traced"), |_| 0);
        assert_eq!(engine.wait(), 0);
        drop(engine);

        let written = std::fs::read_to_string(&trace).unwrap();
        assert!(written.starts_with("GET /traced HTTP/1.1\r\n"));
    }

    fn pending_transfer(engine: &mut RequestEngine) -> Rc<RefCell<u32>> {
        let calls = Rc::new(RefCell::new(0));
        let counter = calls.clone();
        engine.queue_raw_request(&RawRequest::new("/hang"), move |_| {
            *counter.borrow_mut() += 1;
            0
        });
        calls
    }

    #[test]
    fn test_synchronous_spawn_failure_can_abort() {
        let base = serve_fast_only(http_response("200 OK", ""));
        let mut engine = engine(&base);
        let transfer_calls = pending_transfer(&mut engine);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let handler = ResponseHandler::clone_op(
            CloneOperation::Clone,
            Rc::new(move |r: Response<CloneResponse>| {
                sink.borrow_mut().push((r.status, r.error.clone()));
                -libc::EIO
            }),
        );
        engine.spawn_failed("pkg", handler, std::io::Error::from_raw_os_error(libc::EAGAIN));

        {
            let seen = seen.borrow();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].0, -libc::EAGAIN);
            assert!(seen[0].1.starts_with("failed to fork new process for git"));
        }
        assert_eq!(engine.active_requests(), 0);
        assert_eq!(engine.wait(), -libc::EIO);
        assert_eq!(*transfer_calls.borrow(), 0);
    }

    #[test]
    fn test_failed_exit_watch_is_fatal() {
        let base = serve_fast_only(http_response("200 OK", ""));
        let mut engine = engine(&base);
        let transfer_calls = pending_transfer(&mut engine);

        let _ = engine.notifier.sender().send(Event::WatchFailed {
            id: WatchId(42),
            error: std::io::Error::from_raw_os_error(libc::EBADF),
        });

        assert_eq!(engine.wait(), -libc::EBADF);
        assert_eq!(engine.active_requests(), 0);
        assert_eq!(*transfer_calls.borrow(), 0);
    }

    #[test]
    fn test_signal_mask_scoped_to_engine() {
        assert!(!sigchld_blocked());
        let engine = engine("http://127.0.0.1:1");
        assert!(sigchld_blocked());
        drop(engine);
        assert!(!sigchld_blocked());
    }

    fn write_script(path: &std::path::Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn git_engine(program: &std::path::Path, workdir: &std::path::Path) -> RequestEngine {
        RequestEngine::with_options(
            "https://aur.example.org",
            EngineOptions {
                git_program: program.to_path_buf(),
                workdir: workdir.to_path_buf(),
                use_proxy: false,
                ..Default::default()
            },
        )
        .unwrap()
    }

    type CloneLog = Rc<RefCell<Vec<(CloneOperation, i32, String)>>>;

    fn record(log: &CloneLog) -> impl Fn(Response<CloneResponse>) -> i32 + 'static {
        let sink = log.clone();
        move |r| {
            sink.borrow_mut().push((r.value.operation, r.status, r.error.clone()));
            0
        }
    }

    // Every scenario that forks lives in this one test. Scripts are written
    // before anything is spawned so no exec can race an open write handle.
    #[test]
    fn test_clone_requests_with_stub_git() {
        let dir = tempdir().unwrap();
        let workdir = dir.path().join("work");
        std::fs::create_dir_all(&workdir).unwrap();
        let argv_file = dir.path().join("argv");

        let ok_git = dir.path().join("ok-git");
        let failing_git = dir.path().join("failing-git");
        let slow_git = dir.path().join("slow-git");
        let killed_git = dir.path().join("killed-git");
        write_script(
            &ok_git,
            &format!("printf '%s\\n' \"$@\" > '{}'\nexit 0", argv_file.display()),
        );
        write_script(&failing_git, "exit 7");
        write_script(&slow_git, "sleep 2");
        write_script(&killed_git, "kill -9 $$");

        let argv = || -> Vec<String> {
            std::fs::read_to_string(&argv_file)
                .unwrap()
                .lines()
                .map(String::from)
                .collect()
        };

        // Fresh directory: clone.
        let log: CloneLog = Rc::default();
        let mut engine = git_engine(&ok_git, &workdir);
        engine.queue_clone_request(&CloneRequest::new("pkg"), record(&log));
        assert_eq!(engine.active_requests(), 1);
        assert_eq!(engine.wait(), 0);
        assert_eq!(*log.borrow(), vec![(CloneOperation::Clone, 0, String::new())]);
        assert_eq!(argv(), vec!["clone", "--quiet", "https://aur.example.org/pkg"]);
        drop(engine);

        // Existing checkout: update.
        std::fs::create_dir_all(workdir.join("pkg").join(".git")).unwrap();
        let log: CloneLog = Rc::default();
        let mut engine = git_engine(&ok_git, &workdir);
        engine.queue_clone_request(&CloneRequest::new("pkg"), record(&log));
        assert_eq!(engine.wait(), 0);
        assert_eq!(*log.borrow(), vec![(CloneOperation::Update, 0, String::new())]);
        assert_eq!(argv(), vec!["-C", "pkg", "pull", "--quiet", "--ff-only"]);
        drop(engine);

        // Non-zero exit status is reported, not treated as fatal.
        let log: CloneLog = Rc::default();
        let mut engine = git_engine(&failing_git, &workdir);
        engine.queue_clone_request(&CloneRequest::new("other"), record(&log));
        assert_eq!(engine.wait(), 0);
        {
            let log = log.borrow();
            assert_eq!(log.len(), 1);
            assert_eq!(log[0].1, 7);
            assert!(log[0].2.contains('7'));
        }
        drop(engine);

        // A child killed by a signal reports 128 + N.
        let log: CloneLog = Rc::default();
        let mut engine = git_engine(&killed_git, &workdir);
        engine.queue_clone_request(&CloneRequest::new("other"), record(&log));
        assert_eq!(engine.wait(), 0);
        assert_eq!(
            *log.borrow(),
            vec![(
                CloneOperation::Clone,
                128 + libc::SIGKILL,
                format!("git was terminated by signal {}", libc::SIGKILL)
            )]
        );
        drop(engine);

        // A program that cannot be executed exits with 127, reported from wait.
        let log: CloneLog = Rc::default();
        let mut engine = git_engine(&dir.path().join("no-such-git"), &workdir);
        engine.queue_clone_request(&CloneRequest::new("other"), record(&log));
        assert!(log.borrow().is_empty());
        assert_eq!(engine.active_requests(), 1);
        assert_eq!(engine.wait(), 0);
        assert_eq!(
            *log.borrow(),
            vec![(
                CloneOperation::Clone,
                127,
                "git exited with unexpected exit status 127".to_string()
            )]
        );
        drop(engine);

        // A callback aborting on that exit cancels the pending transfer.
        let base = serve_fast_only(http_response("200 OK", ""));
        let mut engine = RequestEngine::with_options(
            base.as_str(),
            EngineOptions {
                git_program: dir.path().join("no-such-git"),
                workdir: workdir.clone(),
                use_proxy: false,
                ..Default::default()
            },
        )
        .unwrap();
        let transfers = Rc::new(RefCell::new(0));
        let counter = transfers.clone();
        engine.queue_raw_request(&RawRequest::new("/hang"), move |_| {
            *counter.borrow_mut() += 1;
            0
        });
        engine.queue_clone_request(&CloneRequest::new("other"), |r| {
            assert_eq!(r.status, 127);
            -libc::EIO
        });
        assert_eq!(engine.wait(), -libc::EIO);
        assert_eq!(engine.active_requests(), 0);
        assert_eq!(*transfers.borrow(), 0);
        drop(engine);

        // Cancelled children are never reported.
        let log: CloneLog = Rc::default();
        let mut engine = git_engine(&slow_git, &workdir);
        engine.queue_clone_request(&CloneRequest::new("third"), record(&log));
        engine.cancel_all();
        assert_eq!(engine.active_requests(), 0);
        let started = Instant::now();
        assert_eq!(engine.wait(), -1);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(log.borrow().is_empty());
    }
}
