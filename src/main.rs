use anyhow::bail;
use clap::Parser;
use inquire::error::InquireResult;

mod app;
mod catalog;
mod cli;
mod config;
mod eid;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;

use app::AppFactory;

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr, stdout is reserved for JSON output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let paths = AppFactory::get_paths()?;
    let service = AppFactory::create_catalog_service(&paths)?;

    match args.command {
        cli::Command::Add { meal, price } => {
            let listing = service.create_meal(meal.into(), price)?;
            print_json(&listing)
        }

        cli::Command::Update { id, meal, price } => {
            let listing = service.update_meal(id, meal.into(), price)?;
            print_json(&listing)
        }

        cli::Command::Price { id, price } => {
            let record = service.update_price(id, price)?;
            print_json(&record)
        }

        cli::Command::Delete { id, yes } => {
            let meal = service.get_meal(id)?;

            if !yes {
                match inquire::prompt_confirmation(format!(
                    "Are you sure you want to delete meal {id} '{}'?",
                    meal.item.name
                )) {
                    InquireResult::Ok(true) => {}
                    InquireResult::Ok(false) => return Ok(()),
                    InquireResult::Err(err) => bail!("An error occurred: {}", err),
                }
            }

            service.delete_meal(id)?;
            println!("meal {id} removed");
            Ok(())
        }

        cli::Command::Show { id } => print_json(&service.get_meal(id)?),

        cli::Command::List { missing } => {
            let mut meals = service.list_meals()?;
            if missing {
                meals.retain(|meal| meal.item.embedding.is_none());
            }
            print_json(&meals)
        }

        cli::Command::Search { query, limit } => {
            let matches = match limit {
                Some(limit) => service.search_meals_with_limit(&query, limit)?,
                None => service.search_meals(&query)?,
            };
            print_json(&matches)
        }

        cli::Command::Backfill { quiet } => {
            let report = service.backfill(!quiet)?;
            print_json(&report)
        }

        cli::Command::Stats {} => print_json(&service.stats()?),
    }
}
