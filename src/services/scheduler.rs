use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};

use crate::error::Result;

/// Time source for jobs that compare against wall-clock age.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A unit of background work run on a fixed interval.
#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    async fn run_once(&self) -> Result<()>;
}

/// Runs `job` immediately, then every `period`, until `shutdown` flips to true.
///
/// The shutdown signal is only observed between runs, so a run that has
/// started always completes.
pub fn spawn_periodic(
    job: Arc<dyn PeriodicJob>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Starting {} (every {}s)", job.name(), period.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = job.run_once().await {
                        tracing::error!("{} error: {}", job.name(), e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("{} stopped", job.name());
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl PeriodicJob for CountingJob {
        fn name(&self) -> &'static str {
            "counting-job"
        }

        async fn run_once(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn runs_immediately_and_stops_on_shutdown() {
        let job = Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
        });
        let (tx, rx) = watch::channel(false);
        let handle = spawn_periodic(job.clone(), Duration::from_secs(3600), rx);

        for _ in 0..50 {
            if job.runs.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fixed_clock_advances() {
        let start = Utc::now();
        let clock = testing::FixedClock::new(start);
        clock.advance(chrono::Duration::hours(2));
        assert_eq!(clock.now() - start, chrono::Duration::hours(2));
    }
}
