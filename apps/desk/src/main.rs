use std::sync::Arc;

use anyhow::Result;
use api_client::ContractApiClient;
use clap::{Parser, Subcommand};
use form_core::{validation, ContractFormController};
use storage::DraftStorage;
use tracing::info;

mod config;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long)]
    backend_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the stored draft and the step it resumes at.
    Show,
    /// Run every step's checks against the stored draft.
    Validate,
    /// Delete the stored draft.
    Clear,
    /// Submit the stored draft to the backend.
    Submit,
    /// List the backend's commodities, counterparties and traders.
    Reference,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cli = Cli::parse();
    let mut settings = config::load_settings();
    if let Some(url) = cli.backend_url {
        settings.backend_url = url;
    }
    if let Some(url) = cli.database_url {
        settings.database_url = url;
    }

    let database_url = config::normalize_database_url(&settings.database_url);
    let storage = Arc::new(DraftStorage::new(&database_url).await?);
    let api = Arc::new(ContractApiClient::new(settings.backend_url.clone()));
    info!(backend_url = %settings.backend_url, "contract desk ready");

    let controller = ContractFormController::new(api.clone(), api, storage);

    match cli.command {
        Command::Show => {
            controller.load_draft().await?;
            let step = controller.current_step().await;
            let draft = controller.draft().await;
            println!("step {} ({})", step.index(), step.title());
            println!("{}", serde_json::to_string_pretty(&draft)?);
        }
        Command::Validate => {
            controller.load_draft().await?;
            let errors = validation::check_all(&controller.draft().await);
            if errors.is_empty() {
                println!("draft is ready to submit");
            } else {
                for (field, message) in &errors {
                    println!("{field}: {message}");
                }
                std::process::exit(1);
            }
        }
        Command::Clear => {
            controller.clear_draft().await?;
            println!("draft cleared");
        }
        Command::Submit => {
            controller.load_draft().await?;
            if controller.submit_contract().await? {
                println!("contract submitted");
            } else {
                for (field, message) in &controller.errors().await {
                    println!("{field}: {message}");
                }
                if let Some(message) = controller.last_submit_error().await {
                    println!("backend rejected the contract: {message}");
                }
                std::process::exit(1);
            }
        }
        Command::Reference => {
            controller.load_reference_data().await;
            let data = controller.reference_data().await;
            println!("commodities:");
            for c in &data.commodities {
                println!("  {} {} ({}, default {:?})", c.id.0, c.name, c.category, c.default_unit);
            }
            println!("counterparties:");
            for c in &data.counterparties {
                println!("  {} {} <{}>", c.id.0, c.name, c.email);
            }
            println!("traders:");
            for t in &data.traders {
                println!("  {} {} <{}>", t.id.0, t.name, t.email);
            }
        }
    }

    Ok(())
}
