// src/pipeline/source.rs

//! Harvest source entry points: bootstrap, then poll and publish.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::pipeline::{PollTask, PublishStats, PublishTask, Publisher};
use crate::services::{ChangeMemory, Repository};

/// Build the repository and publisher described by `config`.
fn assemble(config: &Config, cancel: &CancellationToken) -> Result<(Repository, Publisher)> {
    config.validate()?;
    attach(config, Repository::from_config(&config.harvest)?, cancel)
}

/// Wire the publisher and optional change memory onto `repository`.
fn attach(
    config: &Config,
    repository: Repository,
    cancel: &CancellationToken,
) -> Result<(Repository, Publisher)> {
    let mut repository = repository.with_cancellation(cancel.clone());
    let mut publisher = Publisher::from_config(&config.publish, repository.snapshot_handle())?;

    if config.change_memory.enabled {
        let memory = Arc::new(ChangeMemory::new(
            &config.publish.base_uri,
            &config.change_memory,
        ));
        repository.register_observer(memory.clone());
        publisher = publisher.with_change_memory(memory);
        log::info!("Change memory enabled (max {} changes)", config.change_memory.max_changes);
    }
    Ok((repository, publisher))
}

/// Bootstrap once, publish once and return.
pub async fn run_snapshot(config: &Config) -> Result<PublishStats> {
    let (mut repository, publisher) = assemble(config, &CancellationToken::new())?;
    repository.bootstrap_from(config.harvest.from_datetime()?).await?;
    publisher.publish_once().await
}

/// Bootstrap, then poll and publish until `cancel` fires or the poll
/// loop reaches `max_runs`. A final publish reflects the last round.
///
/// A failed bootstrap is logged; polling picks up from whatever it applied.
pub async fn run_source(config: &Config, cancel: CancellationToken) -> Result<Repository> {
    let (repository, publisher) = assemble(config, &cancel)?;
    serve(config, repository, publisher, cancel).await
}

async fn serve(
    config: &Config,
    mut repository: Repository,
    publisher: Publisher,
    cancel: CancellationToken,
) -> Result<Repository> {
    log::info!("Starting source for {}", config.harvest.endpoint);
    match repository.bootstrap_from(config.harvest.from_datetime()?).await {
        Ok(summary) => log::info!("Bootstrap harvested {} records", summary.records),
        Err(AppError::Cancelled) => return Ok(repository),
        Err(e) => log::error!(
            "Bootstrap from {} failed with {} resources loaded, continuing with polling: {}",
            config.harvest.endpoint,
            repository.resource_count(),
            e
        ),
    }
    publisher.publish_once().await?;

    let publish = PublishTask::spawn(
        publisher,
        Duration::from_secs(config.publish.interval_secs),
        cancel.child_token(),
    );
    let poll = PollTask::spawn(repository, &config.poll, cancel.child_token());

    let repository = poll.join().await?;
    let (publisher, rounds) = publish.stop().await?;
    publisher.publish_once().await?;
    log::info!(
        "Source stopped after {} periodic publish rounds, {} resources",
        rounds,
        repository.resource_count()
    );
    Ok(repository)
}
