// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Job operations commands
//!
//! Commands: create, cancel, status, list

use anyhow::Result;
use clap::Subcommand;
use colored::{ColoredString, Colorize};
use uuid::Uuid;

use agv_dispatch_core::application::CreateJobRequest;
use agv_dispatch_core::domain::task_job::{JobSortKey, SortDirection, TaskJob, TaskJobStatus, TaskJobType};

use super::{connect, parse_wire};
use crate::daemon::client::JobFilter;

#[derive(Subcommand)]
pub enum JobCommand {
    /// Create a transport job
    Create {
        /// Job type (call_for_loading, send_to_unloading, return_to_waiting, send_to_charge)
        #[arg(long = "type", value_parser = parse_wire::<TaskJobType>)]
        job_type: TaskJobType,

        /// Start station code
        #[arg(long)]
        from: String,

        /// End station code
        #[arg(long)]
        to: String,

        /// Priority, 10 (most urgent) to 50
        #[arg(short, long)]
        priority: Option<i32>,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Cancel a job
    Cancel {
        #[arg(value_name = "JOB_ID")]
        id: Uuid,

        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Show a job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: Uuid,
    },

    /// List jobs
    List {
        /// Only jobs in these states (repeatable)
        #[arg(long, value_parser = parse_wire::<TaskJobStatus>)]
        status: Vec<TaskJobStatus>,

        /// Only jobs assigned to this AGV
        #[arg(long)]
        agv: Option<String>,

        #[arg(long, value_parser = parse_wire::<JobSortKey>)]
        sort: Option<JobSortKey>,

        #[arg(long, value_parser = parse_wire::<SortDirection>)]
        direction: Option<SortDirection>,

        /// Maximum number of results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

pub async fn handle_command(command: JobCommand, host: &str, port: u16) -> Result<()> {
    let client = connect(host, port).await?;

    match command {
        JobCommand::Create {
            job_type,
            from,
            to,
            priority,
            description,
        } => {
            let job = client
                .create_job(&CreateJobRequest {
                    job_type,
                    start_station: from,
                    end_station: to,
                    priority,
                    description,
                })
                .await?;
            println!("{}", format!("✓ Job created: {}", job.id).green());
            print_job(&job);
        }
        JobCommand::Cancel { id, reason } => {
            let job = client.cancel_job(id, reason).await?;
            println!("{}", format!("✓ Job cancelled: {}", job.id).green());
        }
        JobCommand::Status { id } => {
            let job = client.get_job(id).await?;
            print_job(&job);
        }
        JobCommand::List {
            status,
            agv,
            sort,
            direction,
            limit,
        } => {
            let jobs = client
                .list_jobs(&JobFilter {
                    statuses: status,
                    agv,
                    sort,
                    direction,
                    limit: Some(limit),
                })
                .await?;
            if jobs.is_empty() {
                println!("{}", "No jobs found".dimmed());
                return Ok(());
            }
            println!(
                "{:<36}  {:<10}  {:>3}  {:<8}  {:<8}  {:<8}  {:>5}",
                "ID".bold(),
                "STATUS".bold(),
                "PRI".bold(),
                "FROM".bold(),
                "TO".bold(),
                "AGV".bold(),
                "PROG".bold()
            );
            for job in &jobs {
                println!(
                    "{:<36}  {:<10}  {:>3}  {:<8}  {:<8}  {:<8}  {:>4.0}%",
                    job.id.to_string(),
                    colored_status(job.status),
                    job.priority,
                    job.start_station,
                    job.end_station,
                    job.assigned_agv_code.as_deref().unwrap_or("-"),
                    job.progress_percentage
                );
            }
        }
    }
    Ok(())
}

fn colored_status(status: TaskJobStatus) -> ColoredString {
    let label = format!("{:?}", status).to_lowercase();
    match status {
        TaskJobStatus::Pending => label.yellow(),
        TaskJobStatus::Assigned | TaskJobStatus::Executing => label.cyan(),
        TaskJobStatus::Completed => label.green(),
        TaskJobStatus::Cancelled => label.dimmed(),
        TaskJobStatus::Failed => label.red(),
    }
}

fn print_job(job: &TaskJob) {
    println!("{}", "Job:".bold());
    println!("  ID: {}", job.id);
    println!("  Type: {:?}", job.job_type);
    println!("  Status: {}", colored_status(job.status));
    println!("  Priority: {}", job.priority);
    println!("  Route: {} → {}", job.start_station, job.end_station);
    if let Some(agv) = &job.assigned_agv_code {
        println!("  AGV: {}", agv);
    }
    println!("  Progress: {:.0}%", job.progress_percentage);
    if let Some(route) = &job.route {
        let stations: Vec<&str> = route.checkpoints.iter().map(|c| c.station_code.as_str()).collect();
        println!("  Checkpoints: {}", stations.join(" → "));
    }
    if !job.held_channels.is_empty() {
        let held: Vec<String> = job.held_channels.iter().map(|c| c.to_string()).collect();
        println!("  Holding: {}", held.join(", "));
    }
    if let Some(channel) = &job.waiting_on {
        println!("  Waiting on: {}", channel.to_string().yellow());
    }
    if let Some(reason) = &job.failure_reason {
        println!("  Failure: {}", reason.red());
    }
    if let Some(reason) = &job.cancel_reason {
        println!("  Cancelled: {}", reason);
    }
    println!("  Created: {}", job.created_at.to_rfc3339());
}
