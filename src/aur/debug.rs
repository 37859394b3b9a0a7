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

//! Request tracing selected by the debug configuration string.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Environment variable parsed by [`DebugLevel::parse`]
pub const DEBUG_ENV: &str = "AURLINK_DEBUG";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DebugLevel {
    #[default]
    None,
    /// The head of each request as built is written to this file, and
    /// everything traced in `Verbose` mode goes to stderr as well
    Requests(PathBuf),
    /// Request and response lines are traced to stderr
    Verbose,
}

impl DebugLevel {
    /// `requests:<path>` selects file tracing, any other non-empty value
    /// selects verbose tracing, absent or empty disables tracing.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            None | Some("") => DebugLevel::None,
            Some(v) => match v.strip_prefix("requests:") {
                Some(path) => DebugLevel::Requests(PathBuf::from(path)),
                None => DebugLevel::Verbose,
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, DebugLevel::None)
    }
}

/// Per-engine trace sink shared by every transfer task
#[derive(Clone, Default)]
pub(crate) struct Tracer {
    headers: Option<Arc<Mutex<File>>>,
    verbose: bool,
}

impl Tracer {
    pub fn new(level: &DebugLevel) -> io::Result<Self> {
        let tracer = match level {
            DebugLevel::None => Tracer::default(),
            DebugLevel::Requests(path) => Tracer {
                headers: Some(Arc::new(Mutex::new(File::create(path)?))),
                verbose: true,
            },
            DebugLevel::Verbose => Tracer {
                headers: None,
                verbose: true,
            },
        };
        Ok(tracer)
    }

    /// Trace a request as built, before the client adds its own default
    /// headers (`accept`, `accept-encoding`) or picks the protocol version.
    pub fn request(&self, request: &reqwest::Request) {
        if self.headers.is_none() && !self.verbose {
            return;
        }

        let text = format_request_head(request);

        if let Some(file) = &self.headers {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(text.as_bytes());
            }
        }

        if self.verbose {
            for line in text.lines().filter(|l| !l.is_empty()) {
                eprintln!("> {}", line);
            }
        }
    }

    pub fn response(&self, response: &reqwest::Response) {
        if !self.verbose {
            return;
        }
        eprintln!("< {:?} {}", response.version(), response.status());
        for (name, value) in response.headers() {
            eprintln!("< {}: {}", name, value.to_str().unwrap_or("<binary>"));
        }
    }

    pub fn failure(&self, url: &str, detail: &str) {
        if self.verbose {
            eprintln!("* {}: {}", url, detail);
        }
    }
}

/// Renders the request in HTTP/1.1 form whatever version ends up on the wire.
fn format_request_head(request: &reqwest::Request) -> String {
    let url = request.url();
    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut text = format!("{} {} HTTP/1.1\r\n", request.method(), target);
    if let Some(host) = url.host_str() {
        match url.port() {
            Some(port) => text.push_str(&format!("Host: {}:{}\r\n", host, port)),
            None => text.push_str(&format!("Host: {}\r\n", host)),
        }
    }
    for (name, value) in request.headers() {
        text.push_str(&format!(
            "{}: {}\r\n",
            name,
            value.to_str().unwrap_or("<binary>")
        ));
    }
    text.push_str("\r\n");
    text
}
