// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod command_channel;
pub mod event_bus;
pub mod repositories;
pub mod site_loader;

pub use command_channel::MpscCommandDispatcher;
pub use event_bus::{DomainEvent, EventBus};
