//! `inquest integration` — seed and list integrations.

use std::path::Path;

use chrono::Utc;
use clap::Subcommand;
use inquest_core::idgen::IdGenerator;
use inquest_core::model::Integration;
use inquest_core::types::Provider;

use crate::output;

#[derive(Subcommand)]
pub enum IntegrationSubcommand {
    /// Register an integration
    Add {
        /// Provider name (gitlab or github)
        #[arg(long)]
        provider: String,

        /// Workspace the integration belongs to
        #[arg(long)]
        workspace: u64,

        /// Provider-side project id
        #[arg(long)]
        project: u64,

        /// Service-account username the bot posts as
        #[arg(long)]
        bot_username: String,
    },

    /// List integrations
    List,
}

pub fn run(config_path: &Path, subcommand: IntegrationSubcommand, json: bool) -> anyhow::Result<()> {
    let (cfg, store, _queue) = super::open_databases(config_path)?;

    match subcommand {
        IntegrationSubcommand::Add {
            provider,
            workspace,
            project,
            bot_username,
        } => {
            let provider: Provider = provider.parse()?;
            let integration = Integration {
                id: IdGenerator::new(cfg.node_id).next(),
                workspace_id: workspace,
                provider,
                external_project_id: project,
                bot_username,
                enabled: true,
                created_at: Utc::now(),
            };
            store.insert_integration(&integration)?;
            if json {
                output::print_json(&integration)?;
            } else {
                println!("added integration {} ({})", integration.id, integration.provider);
            }
        }
        IntegrationSubcommand::List => {
            let integrations = store.list_integrations()?;
            if json {
                output::print_json(&integrations)?;
            } else {
                let rows = integrations
                    .iter()
                    .map(|i| {
                        vec![
                            i.id.to_string(),
                            i.provider.to_string(),
                            i.workspace_id.to_string(),
                            i.external_project_id.to_string(),
                            i.bot_username.clone(),
                            if i.enabled { "yes".into() } else { "no".into() },
                        ]
                    })
                    .collect();
                output::print_table(
                    &["id", "provider", "workspace", "project", "bot", "enabled"],
                    rows,
                );
            }
        }
    }
    Ok(())
}
