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

//! AUR package records as returned by the RPC v5 API.

use serde::Deserialize;

/// AUR RPC API response wrapper
#[derive(Debug, Clone, Deserialize)]
pub struct AurRpcResponse {
    #[serde(default)]
    pub version: u32,
    #[serde(rename = "type")]
    pub response_type: String,
    #[serde(default)]
    pub resultcount: usize,
    #[serde(default)]
    pub results: Vec<AurPackageInfo>,
    pub error: Option<String>,
}

/// AUR package information from RPC API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AurPackageInfo {
    pub name: String,
    pub package_base: String,
    pub version: String,
    pub description: Option<String>,
    #[serde(rename = "URL")]
    pub url: Option<String>,
    #[serde(default)]
    pub num_votes: u32,
    #[serde(default)]
    pub popularity: f64,
    pub out_of_date: Option<u64>,
    pub maintainer: Option<String>,
    #[serde(default)]
    pub first_submitted: u64,
    #[serde(default)]
    pub last_modified: u64,
    #[serde(rename = "URLPath", default)]
    pub url_path: String,

    // Only present in info responses
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub make_depends: Vec<String>,
    #[serde(default)]
    pub opt_depends: Vec<String>,
    #[serde(default)]
    pub check_depends: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub license: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl AurPackageInfo {
    /// Path of the snapshot tarball relative to the AUR base URL
    pub fn snapshot_path(&self) -> String {
        if self.url_path.is_empty() {
            format!("/cgit/aur.git/snapshot/{}.tar.gz", self.package_base)
        } else {
            self.url_path.clone()
        }
    }

    pub fn is_orphan(&self) -> bool {
        self.maintainer.is_none()
    }
}

#[cfg(test)]
pub(crate) fn sample_package(name: &str, base: &str) -> AurPackageInfo {
    AurPackageInfo {
        name: name.to_string(),
        package_base: base.to_string(),
        version: "1.0.0-1".to_string(),
        description: None,
        url: None,
        num_votes: 0,
        popularity: 0.0,
        out_of_date: None,
        maintainer: None,
        first_submitted: 0,
        last_modified: 0,
        url_path: String::new(),
        depends: vec![],
        make_depends: vec![],
        opt_depends: vec![],
        check_depends: vec![],
        conflicts: vec![],
        provides: vec![],
        license: vec![],
        keywords: vec![],
    }
}
