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

//! `rproxy`: a multi-threaded HTTP/1.x reverse proxy core.
//!
//! One accept thread per listening endpoint hands off accepted sockets to a
//! fixed pool of worker threads ([`worker::Worker`]); each worker owns its
//! connection tables, origin pools, and pending queue exclusively, so no
//! lock is taken on the hot path. [`server::Server`] wires the two together
//! from a [`config::Config`]; the `server` binary crate is the only thing
//! that knows how to read that config from a file.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod filter_chain;
pub mod filter_state;
pub mod header_filter;
pub mod host;
pub mod io_handle;
pub mod listener;
pub mod load_balancer;
pub mod net;
pub mod parser;
pub mod pending_queue;
pub mod request;
pub mod router;
pub mod rule;
pub mod server;
pub mod stream_info;
pub mod transport_socket;
pub mod upstream_request;
pub mod vhost;
pub mod watermark;
pub mod worker;
