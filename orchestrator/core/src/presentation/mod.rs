// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`agv-dispatch-core`)
//!
//! HTTP surface that translates external requests into application service
//! calls. Real work is delegated to `crate::application`.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP/SSE (Axum) | Job intake, lock inspection, telemetry ingest and the event stream |

pub mod api;
