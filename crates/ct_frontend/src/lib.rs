// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! The submission front-end of a [Static CT API](https://c2sp.org/static-ct-api)
//! log: HTTP handlers for `add-chain`, `add-pre-chain` and `get-roots`,
//! coordinating chain validation, deduplication, issuer persistence, and
//! sequencing into an append-only log before a Signed Certificate Timestamp
//! is returned.

pub mod config;
pub mod ctlog;
pub mod handlers;
pub mod storage;
pub mod time;

pub use config::AppConfig;
pub use ctlog::Log;
pub use handlers::{router, AppState, HandlerOptions};
