// Durableflow CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: Use reqwest for HTTP client (already in workspace).
// Design Decision: Exit codes mirror the API's error taxonomy so scripts
// can branch on failure kind without parsing stderr.

mod client;
mod commands;
mod output;

use clap::Parser;
use commands::workflow::WorkflowCommand;

#[derive(Parser)]
#[command(name = "durableflow")]
#[command(about = "Durableflow CLI - start, signal, query, and inspect workflow runs")]
#[command(version)]
pub struct Cli {
    /// API base URL
    #[arg(
        long,
        env = "DURABLEFLOW_API_URL",
        default_value = "http://localhost:9000"
    )]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    #[command(subcommand)]
    pub command: WorkflowCommand,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = client::Client::new(&cli.api_url);
    let output_format = output::OutputFormat::from_str(&cli.output);

    match commands::workflow::run(cli.command, &client, output_format).await {
        Ok(()) => std::process::exit(client::EXIT_SUCCESS),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}
