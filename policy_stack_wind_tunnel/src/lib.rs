// Copyright 2026 the Policy Stack Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Criterion benchmarks for the `policy_stack` VM.
//!
//! All content lives in `benches/`; this crate exists to host them.
