// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Command Channel - in-process CommandDispatcher
//
// Hands outbound vehicle commands to a tokio mpsc channel. The receiving end
// is drained by whichever bridge owns the real transport; tests read it
// directly to assert on issued commands.

use crate::domain::command::{CommandDispatcher, CommandError, DispatchCommand};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Clone)]
pub struct MpscCommandDispatcher {
    sender: mpsc::Sender<DispatchCommand>,
}

impl MpscCommandDispatcher {
    /// Create a dispatcher and the receiver its commands arrive on
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<DispatchCommand>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl CommandDispatcher for MpscCommandDispatcher {
    async fn dispatch(&self, command: DispatchCommand) -> Result<(), CommandError> {
        debug!(agv = %command.agv_code, task_id = %command.task_id, "Dispatching command: {:?}", command.action);
        self.sender
            .send(command)
            .await
            .map_err(|_| CommandError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::command::CommandAction;
    use crate::domain::task_job::TaskJobId;

    #[tokio::test]
    async fn test_commands_arrive_in_order() {
        let (dispatcher, mut receiver) = MpscCommandDispatcher::channel(4);
        let task_id = TaskJobId::new();

        dispatcher
            .dispatch(DispatchCommand::new(
                "AGV01",
                task_id,
                CommandAction::Proceed { from_sequence: 10, to_sequence: 20 },
            ))
            .await
            .unwrap();
        dispatcher
            .dispatch(DispatchCommand::new(
                "AGV01",
                task_id,
                CommandAction::Cancel { reason: "stop".to_string() },
            ))
            .await
            .unwrap();

        assert!(matches!(receiver.recv().await.unwrap().action, CommandAction::Proceed { .. }));
        assert!(matches!(receiver.recv().await.unwrap().action, CommandAction::Cancel { .. }));
    }

    #[tokio::test]
    async fn test_dropped_receiver_reports_closed() {
        let (dispatcher, receiver) = MpscCommandDispatcher::channel(1);
        drop(receiver);

        let result = dispatcher
            .dispatch(DispatchCommand::new(
                "AGV01",
                TaskJobId::new(),
                CommandAction::Cancel { reason: "stop".to_string() },
            ))
            .await;
        assert!(matches!(result, Err(CommandError::Closed)));
    }
}
