// Copyright 2026 the Policy Stack Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Conformance suite for the `policy_stack` VM core.
//!
//! All content lives in `tests/`; this crate exists to host them.
