use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use cadence_core::{CadenceConfig, OwnerId, Page, ScheduleId};
use cadence_recurrence::{validate_configuration, RawScheduleConfig, RuleContext, ScheduleConfig};
use cadence_scheduler::{DeliveryHandler, ScheduleStatus, ScheduleStore, Scheduler};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

mod cli;
mod webhook;

use crate::cli::{CliArgs, Command};
use crate::webhook::{LogDelivery, WebhookDelivery};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_worker=info,cadence_scheduler=info".into()),
        )
        .init();

    let args = CliArgs::parse();

    // explicit --config > CADENCE_CONFIG env > ~/.cadence/cadence.toml
    let config_path = args.config.clone().or_else(|| std::env::var("CADENCE_CONFIG").ok());
    let config = CadenceConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    });

    // preview touches no storage
    if let Command::Preview { file, count } = &args.command {
        let ctx = RuleContext::default();
        let schedule = read_config(file, &ctx)?;
        let instants = cadence_recurrence::preview_occurrences(&schedule, *count, &ctx)?;
        return print_json(&instants);
    }

    let db_path = &config.database.path;
    ensure_parent_dir(db_path)?;
    info!(path = %db_path, "opening SQLite database");
    let store = ScheduleStore::open(db_path)?;

    let handler = build_handler(&config)?;
    let scheduler = Scheduler::new(store, handler, &config, RuleContext::default());

    match args.command {
        Command::Preview { .. } => Ok(()),
        Command::Run => run(&scheduler).await,
        Command::Create {
            owner,
            name,
            file,
            activate,
        } => {
            let schedule = read_config(&file, scheduler.rule_context())?;
            let id = scheduler.create_schedule(&OwnerId::from(owner), &name, &schedule)?;
            info!(schedule_id = %id, "schedule created");
            if activate {
                let report = scheduler.activate(&id)?;
                info!(schedule_id = %id, created = report.created, "schedule activated");
            }
            print_json(&scheduler.get_schedule(&id)?)
        }
        Command::Activate { id } => {
            let id: ScheduleId = id.parse()?;
            let report = scheduler.activate(&id)?;
            info!(schedule_id = %id, created = report.created, "schedule activated");
            print_json(&scheduler.get_schedule(&id)?)
        }
        Command::Pause { id } => {
            let id: ScheduleId = id.parse()?;
            scheduler.pause(&id)?;
            print_json(&scheduler.get_schedule(&id)?)
        }
        Command::Resume { id } => {
            let id: ScheduleId = id.parse()?;
            let report = scheduler.resume(&id)?;
            info!(
                schedule_id = %id,
                missed = report.missed,
                created = report.materialized.created,
                "schedule resumed"
            );
            print_json(&scheduler.get_schedule(&id)?)
        }
        Command::Cancel { id } => {
            let id: ScheduleId = id.parse()?;
            let cancelled = scheduler.cancel(&id)?;
            info!(schedule_id = %id, occurrences = cancelled, "schedule cancelled");
            print_json(&scheduler.get_schedule(&id)?)
        }
        Command::List {
            owner,
            status,
            offset,
            limit,
        } => {
            let status = status
                .as_deref()
                .map(str::parse::<ScheduleStatus>)
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let page = Page::new(offset, limit);
            print_json(&scheduler.list_schedules(&OwnerId::from(owner), status, page)?)
        }
        Command::Occurrences { id, offset, limit } => {
            let id: ScheduleId = id.parse()?;
            let page = Page::new(offset, limit);
            print_json(&scheduler.list_occurrences(&id, page)?)
        }
    }
}

/// Run the engine loop until Ctrl-C, then let the in-flight tick finish.
async fn run(scheduler: &Scheduler) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine = tokio::spawn(scheduler.engine().run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    engine.await?;
    Ok(())
}

fn build_handler(config: &CadenceConfig) -> anyhow::Result<Arc<dyn DeliveryHandler>> {
    match &config.delivery.webhook_url {
        Some(url) => {
            let timeout = config
                .delivery
                .timeout_secs
                .unwrap_or(config.engine.delivery_timeout_secs);
            info!(url = %url, signed = config.delivery.secret.is_some(), "delivering via webhook");
            Ok(Arc::new(WebhookDelivery::new(
                url.clone(),
                config.delivery.secret.clone(),
                Duration::from_secs(timeout),
            )?))
        }
        None => {
            warn!("no delivery.webhook_url configured, due occurrences will only be logged");
            Ok(Arc::new(LogDelivery))
        }
    }
}

/// Read a raw JSON schedule config and validate it, printing every field
/// error before failing.
fn read_config(path: &str, ctx: &RuleContext) -> anyhow::Result<ScheduleConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
    let raw: RawScheduleConfig =
        serde_json::from_str(&text).with_context(|| format!("parse {path}"))?;
    match validate_configuration(&raw, Utc::now(), ctx) {
        Ok(validated) => {
            for w in &validated.warnings {
                warn!("{w}");
            }
            if let Some(end) = validated.estimated_completion {
                info!(estimated_completion = %end, "schedule config is valid");
            }
            Ok(validated.config)
        }
        Err(errors) => {
            print_json(&errors)?;
            bail!("schedule config is invalid ({} errors)", errors.len())
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn ensure_parent_dir(path: &str) -> anyhow::Result<()> {
    match std::path::Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .with_context(|| format!("create database directory {}", parent.display())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested/data/cadence.db");
        ensure_parent_dir(db.to_str().unwrap()).unwrap();
        assert!(dir.path().join("nested/data").is_dir());

        // A bare file name lives in the working directory.
        ensure_parent_dir("cadence.db").unwrap();
    }

    #[test]
    fn unusable_database_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("occupied");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let db = blocker.join("cadence.db");

        let err = ensure_parent_dir(db.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().starts_with("create database directory"), "{err}");
    }
}
