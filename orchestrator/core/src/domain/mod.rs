// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Layer (`agv-dispatch-core`)
//!
//! Aggregates, value objects and ports of the dispatch core. Nothing in this
//! layer performs I/O.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`map`] | Map graph: nodes, edges, stations |
//! | [`channel`] | Channel configuration rows and the resolved catalog |
//! | [`agv`] | AGV aggregate |
//! | [`task_job`] | TaskJob aggregate, state machine, listing queries |
//! | [`path_lock`] | PathLock entity |
//! | [`route`] | Planned checkpoint sequences |
//! | [`recommendation`] | Vehicle scoring |
//! | [`telemetry`] / [`command`] | Inbound reports and outbound commands |

pub mod agv;
pub mod channel;
pub mod command;
pub mod dispatch_config;
pub mod errors;
pub mod events;
pub mod map;
pub mod path_lock;
pub mod recommendation;
pub mod repository;
pub mod route;
pub mod task_job;
pub mod telemetry;
