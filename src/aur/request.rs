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

//! Request descriptions. A request expands into one or more locators for
//! a given base URL; the engine treats those locators as opaque data.

/// Approximate upper bound on the length of a single RPC URL
const MAX_RPC_URL_LENGTH: usize = 4000;

/// Anything the engine can fetch over HTTP
pub trait HttpRequest {
    fn build(&self, baseurl: &str) -> Vec<String>;
}

fn trim_base(baseurl: &str) -> &str {
    baseurl.trim_end_matches('/')
}

/// Field used by an RPC search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchBy {
    Name,
    #[default]
    NameDesc,
    Maintainer,
    Depends,
    MakeDepends,
    OptDepends,
    CheckDepends,
}

impl SearchBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchBy::Name => "name",
            SearchBy::NameDesc => "name-desc",
            SearchBy::Maintainer => "maintainer",
            SearchBy::Depends => "depends",
            SearchBy::MakeDepends => "makedepends",
            SearchBy::OptDepends => "optdepends",
            SearchBy::CheckDepends => "checkdepends",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let by = match value {
            "name" => SearchBy::Name,
            "name-desc" => SearchBy::NameDesc,
            "maintainer" => SearchBy::Maintainer,
            "depends" => SearchBy::Depends,
            "makedepends" => SearchBy::MakeDepends,
            "optdepends" => SearchBy::OptDepends,
            "checkdepends" => SearchBy::CheckDepends,
            _ => return None,
        };
        Some(by)
    }
}

/// Query against the AUR RPC interface
#[derive(Debug, Clone)]
pub struct RpcRequest {
    params: Vec<(&'static str, String)>,
    args: Vec<String>,
    /// Whether args are sent as repeated `arg[]` (info) or a single `arg`
    multi_arg: bool,
    approx_max_length: usize,
}

impl RpcRequest {
    /// Info query for the given package names, batched across as many
    /// URLs as needed to stay under the URL length limit.
    pub fn info<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            params: vec![("v", "5".to_string()), ("type", "info".to_string())],
            args: names.into_iter().map(Into::into).collect(),
            multi_arg: true,
            approx_max_length: MAX_RPC_URL_LENGTH,
        }
    }

    pub fn search(by: SearchBy, term: impl Into<String>) -> Self {
        Self {
            params: vec![
                ("v", "5".to_string()),
                ("type", "search".to_string()),
                ("by", by.as_str().to_string()),
            ],
            args: vec![term.into()],
            multi_arg: false,
            approx_max_length: MAX_RPC_URL_LENGTH,
        }
    }

    #[cfg(test)]
    pub fn with_max_length(mut self, approx_max_length: usize) -> Self {
        self.approx_max_length = approx_max_length;
        self
    }

    fn prefix(&self, baseurl: &str) -> String {
        let query: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();
        format!("{}/rpc/?{}", trim_base(baseurl), query.join("&"))
    }
}

impl HttpRequest for RpcRequest {
    fn build(&self, baseurl: &str) -> Vec<String> {
        let prefix = self.prefix(baseurl);

        if !self.multi_arg {
            return self
                .args
                .iter()
                .map(|arg| format!("{}&arg={}", prefix, urlencoding::encode(arg)))
                .collect();
        }

        let mut urls = Vec::new();
        let mut current = String::new();
        for arg in &self.args {
            let piece = format!("&arg[]={}", urlencoding::encode(arg));
            // Every URL carries at least one argument, even an oversized one.
            if !current.is_empty() && current.len() + piece.len() > self.approx_max_length {
                urls.push(std::mem::take(&mut current));
            }
            if current.is_empty() {
                current.push_str(&prefix);
            }
            current.push_str(&piece);
        }
        if !current.is_empty() {
            urls.push(current);
        }

        urls
    }
}

/// Fetch of a single file served below the base URL
#[derive(Debug, Clone)]
pub struct RawRequest {
    urlpath: String,
}

impl RawRequest {
    pub fn new(urlpath: impl Into<String>) -> Self {
        Self {
            urlpath: urlpath.into(),
        }
    }

    /// A file from a package base's git tree, e.g. its PKGBUILD
    pub fn for_source_file(pkgbase: &str, filename: &str) -> Self {
        Self::new(format!(
            "/cgit/aur.git/plain/{}?h={}",
            filename,
            urlencoding::encode(pkgbase)
        ))
    }

    /// Snapshot tarball; `urlpath` is the package's URLPath
    pub fn for_tarball(urlpath: &str) -> Self {
        Self::new(urlpath)
    }
}

impl HttpRequest for RawRequest {
    fn build(&self, baseurl: &str) -> Vec<String> {
        let sep = if self.urlpath.starts_with('/') { "" } else { "/" };
        vec![format!("{}{}{}", trim_base(baseurl), sep, self.urlpath)]
    }
}

/// Clone (or update) of a package base's git repository
#[derive(Debug, Clone)]
pub struct CloneRequest {
    reponame: String,
}

impl CloneRequest {
    pub fn new(reponame: impl Into<String>) -> Self {
        Self {
            reponame: reponame.into(),
        }
    }

    /// Local directory the repository lives in
    pub fn reponame(&self) -> &str {
        &self.reponame
    }
}

impl HttpRequest for CloneRequest {
    fn build(&self, baseurl: &str) -> Vec<String> {
        vec![format!("{}/{}", trim_base(baseurl), self.reponame)]
    }
}
