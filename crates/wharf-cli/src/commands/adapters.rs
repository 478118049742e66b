//! Adapters command: the registry types replication can talk to.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use wharf_replication::adapter::{self, FactoryRegistry};
use wharf_replication::model::AdapterPattern;

use super::{print_json, GlobalArgs, OutputFormat};

/// Arguments for the adapters command.
#[derive(Args)]
pub struct AdaptersArgs {
    #[command(subcommand)]
    pub command: AdaptersCommand,
}

/// Adapters subcommands.
#[derive(Subcommand)]
pub enum AdaptersCommand {
    /// List registry types with an adapter
    List,
}

#[derive(Debug, Serialize)]
struct Provider {
    #[serde(rename = "type")]
    registry_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pattern: Option<AdapterPattern>,
}

/// Runs the adapters command.
pub fn run(global: &GlobalArgs, args: &AdaptersArgs) -> Result<()> {
    match args.command {
        AdaptersCommand::List => {
            adapter::register_builtins();
            let providers = providers(&adapter::factories());
            match global.output {
                OutputFormat::Text => print_text(&providers),
                OutputFormat::Json => print_json(&providers)?,
            }
        }
    }
    Ok(())
}

fn providers(factories: &FactoryRegistry) -> Vec<Provider> {
    let mut patterns = factories.list_provider_infos();
    factories
        .list_registry_provider_types()
        .into_iter()
        .map(|registry_type| Provider {
            pattern: patterns.remove(&registry_type),
            registry_type,
        })
        .collect()
}

fn print_text(providers: &[Provider]) {
    for provider in providers {
        let endpoints: Vec<&str> = provider
            .pattern
            .as_ref()
            .and_then(|p| p.endpoint_pattern.as_ref())
            .map(|p| p.endpoints.iter().map(|e| e.value.as_str()).collect())
            .unwrap_or_default();
        if endpoints.is_empty() {
            println!("{}", provider.registry_type);
        } else {
            println!("{:<18} {}", provider.registry_type, endpoints.join(", "));
        }
    }
}
