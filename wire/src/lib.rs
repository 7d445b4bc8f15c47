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

#![deny(missing_docs, missing_debug_implementations, rust_2018_idioms, unused_imports)]

//! Low-level wire protocol: cipher pair, frame codec, and handshake layout.
//!
//! This crate has no I/O of its own; it operates on byte slices and a small
//! `ByteSource` seam so that a reactor crate can feed it bytes out of whatever
//! buffer implementation it uses without this crate depending on that buffer.

mod cipher;
mod error;
mod frame;
pub mod handshake;
pub mod opcode;

pub use cipher::{DecryptionContext, EncryptionContext};
pub use error::Error;
pub use frame::{ByteSource, FrameDecoder, FrameEncoder};

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
