//! `zarch query`: saved list filters.

use clap::Subcommand;
use zarch_db::queries;

use super::ListFilter;
use crate::manager::Manager;

#[derive(Debug, Subcommand)]
pub enum QueryCommand {
    /// Save a filter set under a name (replaces an existing one)
    Save {
        name: String,
        #[command(flatten)]
        filter: ListFilter,
    },
    /// List saved queries
    List,
    /// Show one saved query
    Show { name: String },
    /// Delete a saved query
    Delete { name: String },
}

pub fn run(cmd: QueryCommand, manager: &Manager) -> anyhow::Result<()> {
    let store = manager.store();
    match cmd {
        QueryCommand::Save { name, filter } => {
            queries::save(store, &name, &serde_json::to_value(&filter)?)?;
            println!("Saved query '{name}'. Run it with `zarch list --query {name}`.");
        }
        QueryCommand::List => {
            let saved = queries::list(store)?;
            if saved.is_empty() {
                println!("No saved queries.");
            }
            for query in saved {
                let last = query
                    .last_used
                    .map(|t| t.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:<24}  used {:>3}x  last {:<10}  {}",
                    query.name, query.use_count, last, query.filters
                );
            }
        }
        QueryCommand::Show { name } => {
            let query = queries::get(store, &name)?;
            println!("{}", serde_json::to_string_pretty(&query)?);
        }
        QueryCommand::Delete { name } => {
            queries::delete(store, &name)?;
            println!("Deleted query '{name}'");
        }
    }
    Ok(())
}
