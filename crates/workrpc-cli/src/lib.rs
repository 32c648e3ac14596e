// Copyright 2025 workrpc Authors
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

//! # workrpc CLI
//!
//! Command-line driver for workrpc, shipping a sample `compute` worker that
//! exercises every native backend end to end.
//!
//! ## Architecture
//!
//! The CLI uses the `argh` crate for argument parsing. The same binary plays
//! both roles: `workrpc worker` serves the compute interface on its
//! stdin/stdout, and `workrpc call` / `workrpc bench` start such a worker
//! (as a child process or a thread) and talk to it through a
//! [`ComputeClient`](compute::ComputeClient).
//!
//! ## Key Commands
//!
//! - `workrpc worker`: Serve the compute interface over stdin/stdout
//! - `workrpc call`: Make one call and print the JSON result
//! - `workrpc bench`: Measure round-trip throughput

pub mod bench;
pub mod compute;
pub mod launch;
