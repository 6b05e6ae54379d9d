use std::future::Future;

use foc_core::AgentId;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::control::ControlPlane;
use crate::error::ClientError;
use crate::ClientEvent;

/// An operator-chosen command to run against every selected agent. The
/// secondary inputs (log level, verbosity) are collected once before
/// dispatch and reused for every agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkCommand {
    Kill,
    Status,
    Tps,
    SetLogLevel(String),
    SetNodeVerbosity(u8),
}

impl BulkCommand {
    pub fn label(&self) -> &'static str {
        match self {
            BulkCommand::Kill => "kill",
            BulkCommand::Status => "status",
            BulkCommand::Tps => "tps",
            BulkCommand::SetLogLevel(_) => "set-log-level",
            BulkCommand::SetNodeVerbosity(_) => "set-verbosity",
        }
    }
}

/// Outcome counts of one bulk dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Issue one command per target, strictly sequentially and in the given
/// order. Sequencing keeps target agents from being overwhelmed and makes
/// failure attribution per-agent unambiguous. Each failure is caught,
/// logged, and reported; the loop always runs to completion.
pub async fn dispatch_bulk<F, Fut>(
    command_label: &'static str,
    targets: &[AgentId],
    mut issue: F,
    tx: &mpsc::Sender<ClientEvent>,
) -> DispatchSummary
where
    F: FnMut(AgentId) -> Fut,
    Fut: Future<Output = Result<String, ClientError>>,
{
    let mut summary = DispatchSummary::default();
    for agent_id in targets {
        summary.attempted += 1;
        let outcome = match issue(agent_id.clone()).await {
            Ok(detail) => {
                summary.succeeded += 1;
                info!(
                    event = "command_dispatched",
                    command = command_label,
                    agent_id = %agent_id
                );
                Ok(detail)
            }
            Err(err) => {
                summary.failed += 1;
                warn!(
                    event = "command_dispatch_error",
                    command = command_label,
                    agent_id = %agent_id,
                    error = %err
                );
                Err(err.to_string())
            }
        };
        let _ = tx
            .send(ClientEvent::CommandResult {
                agent_id: agent_id.clone(),
                command: command_label,
                outcome,
            })
            .await;
    }
    summary
}

/// Run a bulk dispatch in the background, streaming per-agent results and
/// finishing with `DispatchDone` so the owner can clear the selection.
pub fn spawn_dispatch(
    control: ControlPlane,
    command: BulkCommand,
    targets: Vec<AgentId>,
    tx: mpsc::Sender<ClientEvent>,
) {
    tokio::spawn(async move {
        let label = command.label();
        let summary = dispatch_bulk(
            label,
            &targets,
            |agent_id| {
                let control = control.clone();
                let command = command.clone();
                async move { run_command(&control, &command, &agent_id).await }
            },
            &tx,
        )
        .await;
        let _ = tx.send(ClientEvent::DispatchDone(summary)).await;
    });
}

async fn run_command(
    control: &ControlPlane,
    command: &BulkCommand,
    agent_id: &str,
) -> Result<String, ClientError> {
    match command {
        BulkCommand::Kill => {
            control.kill_agent(agent_id).await?;
            Ok("killed".to_string())
        }
        BulkCommand::Status => {
            let status = control.agent_status(agent_id).await?;
            Ok(status.to_string())
        }
        BulkCommand::Tps => {
            let tps = control.agent_tps(agent_id).await?;
            Ok(format!("{tps:.2} tps"))
        }
        BulkCommand::SetLogLevel(level) => {
            control.set_log_level(agent_id, level).await?;
            Ok(format!("log level {level}"))
        }
        BulkCommand::SetNodeVerbosity(verbosity) => {
            control.set_node_verbosity(agent_id, *verbosity).await?;
            Ok(format!("verbosity {verbosity}"))
        }
    }
}
