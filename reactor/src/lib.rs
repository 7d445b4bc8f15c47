// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A mio-based multi-threaded reactor: one `Listener` thread accepts and
//! load-balances connections across a pool of `Worker` threads, each of
//! which owns a disjoint slab of sessions and a set of rooms. Sessions
//! move between workers only through the hand-off protocol in
//! [`worker::Worker::begin_handoff`], never by sharing a session across
//! threads directly.

#![deny(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod buffer;
mod error;
pub mod handler;
pub mod listener;
pub mod net;
pub mod room;
pub mod session;
pub mod timer;
pub mod worker;

pub use error::Error;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
