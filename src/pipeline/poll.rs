// src/pipeline/poll.rs

//! Periodic incremental harvesting.
//!
//! A [`PollTask`] owns its [`Repository`] while running; stopping the task
//! hands the repository back. Cancellation is honoured between rounds and
//! during backoff sleeps, never in the middle of a page request.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::PollConfig;
use crate::services::Repository;

/// Background task running `Repository::check` on a fixed interval.
pub struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<Repository>,
}

impl PollTask {
    /// Spawn the loop. The first round runs one interval after start.
    pub fn spawn(repository: Repository, config: &PollConfig, cancel: CancellationToken) -> Self {
        let interval = Duration::from_secs(config.interval_secs.max(1));
        // Backoff sleeps inside a round must observe the same token
        let repository = repository.with_cancellation(cancel.clone());
        let handle = tokio::spawn(poll_loop(repository, interval, config.max_runs, cancel.clone()));
        Self { cancel, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to end on its own (`max_runs` or external cancel).
    pub async fn join(self) -> Result<Repository> {
        Ok(self.handle.await?)
    }

    /// Cancel the loop and take the repository back.
    pub async fn stop(self) -> Result<Repository> {
        self.cancel.cancel();
        self.join().await
    }
}

async fn poll_loop(
    mut repository: Repository,
    interval: Duration,
    max_runs: u64,
    cancel: CancellationToken,
) -> Repository {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    let mut runs = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        runs += 1;
        match repository.check().await {
            Ok(summary) => log::debug!(
                "Poll round {} at {}: {} records, {} changes",
                runs,
                repository.client().endpoint(),
                summary.records,
                summary.change_count()
            ),
            Err(AppError::Cancelled) => break,
            Err(e) => log::error!(
                "Poll round {} at {} failed, retrying next interval: {}",
                runs,
                repository.client().endpoint(),
                e
            ),
        }

        if max_runs > 0 && runs >= max_runs {
            log::info!("Poll loop reached {} runs, stopping", max_runs);
            break;
        }
    }
    repository
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::services::HarvestClient;
    use crate::utils::http::testing::Scripted;

    const ENDPOINT: &str = "http://x/oai";

    fn no_records() -> Result<String> {
        Ok(r#"<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
              <responseDate>2012-07-25T17:13:46Z</responseDate>
              <error code="noRecordsMatch">nothing new</error>
            </OAI-PMH>"#
            .to_string())
    }

    fn repository(fetcher: Arc<Scripted>) -> Repository {
        Repository::new(HarvestClient::new(fetcher, ENDPOINT).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_max_runs() {
        let fetcher = Scripted::new(vec![no_records(), no_records(), no_records()]);
        let config = PollConfig {
            interval_secs: 60,
            max_runs: 3,
        };

        let started = tokio::time::Instant::now();
        let task = PollTask::spawn(repository(fetcher.clone()), &config, CancellationToken::new());
        task.join().await.unwrap();

        assert_eq!(fetcher.requests().len(), 3);
        assert!(started.elapsed() >= Duration::from_secs(180));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_between_rounds() {
        let fetcher = Scripted::new(vec![no_records()]);
        let config = PollConfig {
            interval_secs: 60,
            max_runs: 0,
        };

        let task = PollTask::spawn(repository(fetcher.clone()), &config, CancellationToken::new());
        tokio::time::sleep(Duration::from_secs(90)).await;
        let repo = task.stop().await.unwrap();

        assert_eq!(fetcher.requests().len(), 1);
        assert_eq!(repo.resource_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_round_keeps_looping() {
        let fetcher = Scripted::new(vec![
            Err(AppError::Transport {
                url: ENDPOINT.into(),
                status: 500,
            }),
            no_records(),
        ]);
        let config = PollConfig {
            interval_secs: 10,
            max_runs: 2,
        };

        let task = PollTask::spawn(repository(fetcher.clone()), &config, CancellationToken::new());
        task.join().await.unwrap();
        assert_eq!(fetcher.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_retry_after_wait() {
        let fetcher = Scripted::new(vec![Err(AppError::RateLimited {
            retry_after: Some(3600),
        })]);
        let config = PollConfig {
            interval_secs: 10,
            max_runs: 0,
        };

        let started = tokio::time::Instant::now();
        let task = PollTask::spawn(repository(fetcher.clone()), &config, CancellationToken::new());
        tokio::time::sleep(Duration::from_secs(15)).await;
        let repo = task.stop().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(fetcher.requests().len(), 1);
        assert_eq!(repo.resource_count(), 0);
    }
}
