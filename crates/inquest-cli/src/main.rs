mod cmd;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "inquest",
    about = "Issue-tracker event pipeline — ingest webhooks, run planning workers, inspect the queue",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true, env = "INQUEST_CONFIG", default_value = "inquest.yaml")]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker pool and the reclaimer until interrupted
    Worker {
        /// Override the configured worker count
        #[arg(long)]
        count: Option<usize>,
    },

    /// Ingest one webhook payload from a file (local stand-in for the
    /// HTTP ingress)
    Ingest {
        /// Integration id the webhook belongs to
        #[arg(long)]
        integration: u64,

        /// External issue id
        #[arg(long)]
        issue: String,

        /// Path to the raw JSON payload ("-" for stdin)
        #[arg(long, default_value = "-")]
        payload: PathBuf,

        /// Header in K=V form, repeatable (e.g. "X-Gitlab-Event=Note Hook")
        #[arg(long = "header", value_name = "K=V")]
        headers: Vec<String>,

        /// Username that triggered the event
        #[arg(long)]
        triggered_by: String,

        /// Comment body for comment-type events
        #[arg(long)]
        comment_body: Option<String>,

        /// Provider comment id
        #[arg(long)]
        comment_id: Option<String>,

        /// Provider discussion/thread id
        #[arg(long)]
        discussion_id: Option<String>,

        /// Issue title (issue-type events)
        #[arg(long)]
        title: Option<String>,

        /// Issue body (issue-type events)
        #[arg(long)]
        body: Option<String>,

        /// Trace id propagated into the queue message
        #[arg(long)]
        trace_id: Option<String>,
    },

    /// Manage integrations
    Integration {
        #[command(subcommand)]
        subcommand: cmd::integration::IntegrationSubcommand,
    },

    /// Inspect the dead-letter log
    Dlq,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Worker { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Worker { count } => cmd::worker::run(&cli.config, count),
        Commands::Ingest {
            integration,
            issue,
            payload,
            headers,
            triggered_by,
            comment_body,
            comment_id,
            discussion_id,
            title,
            body,
            trace_id,
        } => cmd::ingest::run(
            &cli.config,
            cmd::ingest::IngestArgs {
                integration,
                issue,
                payload,
                headers,
                triggered_by,
                comment_body,
                comment_id,
                discussion_id,
                title,
                body,
                trace_id,
            },
            cli.json,
        ),
        Commands::Integration { subcommand } => {
            cmd::integration::run(&cli.config, subcommand, cli.json)
        }
        Commands::Dlq => cmd::dlq::run(&cli.config, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
