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

//! AUR (Arch User Repository) support module.
//!
//! - Request builders for the RPC, cgit and git endpoints
//! - Typed responses and package records
//! - The multiplexed request engine that runs them

mod debug;
mod engine;
mod notifier;
mod package;
mod process;
mod request;
mod response;
mod signals;
mod transport;

pub use debug::{DebugLevel, DEBUG_ENV};
pub use engine::{EngineOptions, RequestEngine};
pub use package::AurPackageInfo;
pub use request::{CloneRequest, RawRequest, RpcRequest, SearchBy};
pub use response::{CloneResponse, RawResponse, Response, RpcResponse};
