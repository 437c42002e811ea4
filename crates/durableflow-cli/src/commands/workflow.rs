// Workflow interaction commands: start/signal/query/update/describe/
// history/list/cancel/terminate, plus signal-with-start.

use crate::client::{CliError, Client};
use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};
use anyhow::Context;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::fs;
use uuid::Uuid;

type Result<T> = std::result::Result<T, CliError>;

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Start a new workflow run
    Start {
        #[arg(long)]
        r#type: String,
        /// Input payload: inline JSON, or `@path/to/file.json`
        #[arg(long)]
        input: Option<String>,
    },

    /// Send a signal to a running workflow
    Signal {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        input: Option<String>,
        /// Idempotency key; a signal with a dedup key already seen is a no-op
        #[arg(long)]
        dedup_key: Option<String>,
    },

    /// Signal a workflow, starting it first if it isn't already running
    SignalWithStart {
        /// Existing run to signal; if absent or closed, starts a new run
        #[arg(long)]
        id: Option<Uuid>,
        #[arg(long)]
        r#type: String,
        /// Input for the new run, if one is started
        #[arg(long)]
        input: Option<String>,
        #[arg(long)]
        name: String,
        #[arg(long)]
        signal_input: Option<String>,
        #[arg(long)]
        dedup_key: Option<String>,
    },

    /// Run a read-only query against a workflow (open or closed)
    Query {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        input: Option<String>,
    },

    /// Submit an update to a running workflow
    Update {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        input: Option<String>,
        #[arg(long, default_value = "completed", value_parser = ["accepted", "completed"])]
        wait: String,
        /// Idempotency key for the update; defaults to a fresh UUID
        #[arg(long)]
        update_id: Option<String>,
    },

    /// Describe a workflow run's current status and outcome
    Describe {
        #[arg(long)]
        id: Uuid,
    },

    /// Fetch a workflow run's event history
    History {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        from: Option<i32>,
        #[arg(long)]
        to: Option<i32>,
    },

    /// List workflow runs matching a filter
    List {
        #[arg(long = "type")]
        workflow_type: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long, default_value = "100")]
        limit: u32,
        #[arg(long, default_value = "0")]
        offset: u32,
    },

    /// Request cancellation of a running workflow
    Cancel {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Forcibly terminate a workflow, bypassing its own cancellation handling
    Terminate {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },
}

fn load_input(input: Option<String>) -> anyhow::Result<serde_json::Value> {
    let Some(raw) = input else {
        return Ok(serde_json::Value::Null);
    };
    let text = match raw.strip_prefix('@') {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?
        }
        None => raw,
    };
    serde_json::from_str(&text).context("input is not valid JSON")
}

#[derive(Debug, Serialize)]
struct StartWorkflowRequest {
    workflow_type: String,
    input: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct SignalWorkflowRequest {
    signal_type: String,
    payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    dedup_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct SignalWithStartRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    workflow_id: Option<Uuid>,
    workflow_type: String,
    input: serde_json::Value,
    signal: SignalWorkflowRequest,
}

#[derive(Debug, Serialize)]
struct UpdateWorkflowRequest {
    update_id: String,
    name: String,
    input: serde_json::Value,
    wait_stage: String,
}

#[derive(Debug, Serialize, Default)]
struct ReasonRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct StartWorkflowResponse {
    workflow_id: Uuid,
}

#[derive(Debug, Deserialize, Serialize)]
struct WorkflowDescription {
    workflow_id: Uuid,
    workflow_type: String,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    closed_at: Option<chrono::DateTime<chrono::Utc>>,
    continued_from_run_id: Option<Uuid>,
    continued_to_run_id: Option<Uuid>,
    result: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Serialize)]
struct WorkflowHistoryResponse {
    events: Vec<(i32, serde_json::Value)>,
}

pub async fn run(command: WorkflowCommand, client: &Client, output: OutputFormat) -> Result<()> {
    match command {
        WorkflowCommand::Start { r#type, input } => start(client, output, r#type, input).await,
        WorkflowCommand::Signal {
            id,
            name,
            input,
            dedup_key,
        } => signal(client, output, id, name, input, dedup_key).await,
        WorkflowCommand::SignalWithStart {
            id,
            r#type,
            input,
            name,
            signal_input,
            dedup_key,
        } => signal_with_start(client, output, id, r#type, input, name, signal_input, dedup_key).await,
        WorkflowCommand::Query { id, name, input } => query(client, output, id, name, input).await,
        WorkflowCommand::Update {
            id,
            name,
            input,
            wait,
            update_id,
        } => update(client, output, id, name, input, wait, update_id).await,
        WorkflowCommand::Describe { id } => describe(client, output, id).await,
        WorkflowCommand::History { id, from, to } => history(client, output, id, from, to).await,
        WorkflowCommand::List {
            workflow_type,
            status,
            prefix,
            limit,
            offset,
        } => list(client, output, workflow_type, status, prefix, limit, offset).await,
        WorkflowCommand::Cancel { id, reason } => cancel(client, output, id, reason).await,
        WorkflowCommand::Terminate { id, reason } => terminate(client, output, id, reason).await,
    }
}

async fn start(
    client: &Client,
    output: OutputFormat,
    workflow_type: String,
    input: Option<String>,
) -> Result<()> {
    let request = StartWorkflowRequest {
        workflow_type,
        input: load_input(input)?,
    };
    let resp: StartWorkflowResponse = client.post("/v1/workflows", &request).await?;

    if output.is_text() {
        println!("{}", resp.workflow_id);
    } else {
        output.print_value(&resp);
    }
    Ok(())
}

async fn signal(
    client: &Client,
    output: OutputFormat,
    id: Uuid,
    name: String,
    input: Option<String>,
    dedup_key: Option<String>,
) -> Result<()> {
    let request = SignalWorkflowRequest {
        signal_type: name,
        payload: load_input(input)?,
        dedup_key,
    };
    client
        .post_empty(&format!("/v1/workflows/{}/signal", id), &request)
        .await?;

    if output.is_text() {
        println!("Signal delivered to {}", id);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn signal_with_start(
    client: &Client,
    output: OutputFormat,
    id: Option<Uuid>,
    workflow_type: String,
    input: Option<String>,
    name: String,
    signal_input: Option<String>,
    dedup_key: Option<String>,
) -> Result<()> {
    let request = SignalWithStartRequest {
        workflow_id: id,
        workflow_type,
        input: load_input(input)?,
        signal: SignalWorkflowRequest {
            signal_type: name,
            payload: load_input(signal_input)?,
            dedup_key,
        },
    };
    let resp: StartWorkflowResponse = client
        .post("/v1/workflows/signal-with-start", &request)
        .await?;

    if output.is_text() {
        println!("{}", resp.workflow_id);
    } else {
        output.print_value(&resp);
    }
    Ok(())
}

async fn query(
    client: &Client,
    output: OutputFormat,
    id: Uuid,
    name: String,
    input: Option<String>,
) -> Result<()> {
    #[derive(Serialize)]
    struct QueryRequest {
        name: String,
        args: serde_json::Value,
    }
    let request = QueryRequest {
        name,
        args: load_input(input)?,
    };
    let result: serde_json::Value = client
        .post(&format!("/v1/workflows/{}/query", id), &request)
        .await?;

    if output.is_text() {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("failed to format result")?
        );
    } else {
        output.print_value(&result);
    }
    Ok(())
}

async fn update(
    client: &Client,
    output: OutputFormat,
    id: Uuid,
    name: String,
    input: Option<String>,
    wait: String,
    update_id: Option<String>,
) -> Result<()> {
    let request = UpdateWorkflowRequest {
        update_id: update_id.unwrap_or_else(|| Uuid::now_v7().to_string()),
        name,
        input: load_input(input)?,
        wait_stage: wait,
    };
    let result: serde_json::Value = client
        .post(&format!("/v1/workflows/{}/update", id), &request)
        .await?;

    if output.is_text() {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("failed to format result")?
        );
    } else {
        output.print_value(&result);
    }
    Ok(())
}

async fn describe(client: &Client, output: OutputFormat, id: Uuid) -> Result<()> {
    let desc: WorkflowDescription = client.get(&format!("/v1/workflows/{}", id)).await?;

    if output.is_text() {
        print_field("ID", &desc.workflow_id.to_string());
        print_field("Type", &desc.workflow_type);
        print_field("Status", &desc.status);
        print_field("Created", &desc.created_at.to_rfc3339());
        if let Some(started) = &desc.started_at {
            print_field("Started", &started.to_rfc3339());
        }
        if let Some(closed) = &desc.closed_at {
            print_field("Closed", &closed.to_rfc3339());
        }
        if let Some(result) = &desc.result {
            print_field("Result", &result.to_string());
        }
        if let Some(error) = &desc.error {
            print_field("Error", &error.to_string());
        }
    } else {
        output.print_value(&desc);
    }
    Ok(())
}

async fn history(
    client: &Client,
    output: OutputFormat,
    id: Uuid,
    from: Option<i32>,
    to: Option<i32>,
) -> Result<()> {
    let mut path = format!("/v1/workflows/{}/history?from_event_id={}", id, from.unwrap_or(0));
    if let Some(to) = to {
        path.push_str(&format!("&to_event_id={}", to));
    }
    let resp: WorkflowHistoryResponse = client.get(&path).await?;

    if output.is_text() {
        for (seq, event) in &resp.events {
            println!("{:>6}  {}", seq, event);
        }
    } else {
        output.print_value(&resp);
    }
    Ok(())
}

async fn list(
    client: &Client,
    output: OutputFormat,
    workflow_type: Option<String>,
    status: Option<String>,
    prefix: Option<String>,
    limit: u32,
    offset: u32,
) -> Result<()> {
    let mut query = vec![format!("limit={}", limit), format!("offset={}", offset)];
    if let Some(t) = &workflow_type {
        query.push(format!("workflow_type={}", urlencoding_escape(t)));
    }
    if let Some(s) = &status {
        query.push(format!("status={}", urlencoding_escape(s)));
    }
    if let Some(p) = &prefix {
        query.push(format!("workflow_id_prefix={}", urlencoding_escape(p)));
    }
    let path = format!("/v1/workflows?{}", query.join("&"));
    let runs: Vec<WorkflowDescription> = client.get(&path).await?;

    if output.is_text() {
        if runs.is_empty() {
            println!("No workflows found");
            return Ok(());
        }
        print_table_header(&[("ID", 36), ("TYPE", 25), ("STATUS", 12), ("CREATED", 25)]);
        for run in &runs {
            print_table_row(&[
                (&run.workflow_id.to_string(), 36),
                (&run.workflow_type, 25),
                (&run.status, 12),
                (&run.created_at.to_rfc3339(), 25),
            ]);
        }
    } else {
        output.print_value(&runs);
    }
    Ok(())
}

async fn cancel(client: &Client, output: OutputFormat, id: Uuid, reason: Option<String>) -> Result<()> {
    client
        .post_empty(&format!("/v1/workflows/{}/cancel", id), &ReasonRequest { reason })
        .await?;

    if output.is_text() {
        println!("Cancellation requested for {}", id);
    }
    Ok(())
}

async fn terminate(
    client: &Client,
    output: OutputFormat,
    id: Uuid,
    reason: Option<String>,
) -> Result<()> {
    client
        .post_empty(&format!("/v1/workflows/{}/terminate", id), &ReasonRequest { reason })
        .await?;

    if output.is_text() {
        println!("Terminated {}", id);
    }
    Ok(())
}

fn urlencoding_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
