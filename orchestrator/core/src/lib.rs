// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # agv-dispatch-core
//!
//! Task dispatch and path-lock arbitration for a fleet of automated guided
//! vehicles. Jobs are matched to vehicles by a weighted recommendation,
//! routed over the site map, and walked checkpoint by checkpoint while the
//! lock manager keeps shared channels mutually exclusive.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, services and HTTP surface of the dispatcher

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
