//! Supervises the venue clients and the strategy loop, failing the whole run
//! fast on any task's first error and giving the others a bounded window to
//! shut down cleanly afterward.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::StrategyConfig;
use crate::error::EngineError;
use crate::strategy::ArbitrageStrategy;
use crate::timer::Timer;
use crate::venue::VenueClient;

/// How long the coordinator waits for the remaining tasks to notice
/// cancellation and exit cleanly once one task has already failed.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Owns the venue clients and the strategy, and runs them concurrently
/// until one of them fails.
#[derive(Debug)]
pub struct Coordinator {
    buy_venue: Arc<dyn VenueClient>,
    sell_venue: Arc<dyn VenueClient>,
    strategy: Arc<ArbitrageStrategy>,
    strategy_config: StrategyConfig,
}

impl Coordinator {
    /// Build a coordinator over the two venues and the strategy tying them
    /// together.
    #[must_use]
    pub fn new(
        buy_venue: Arc<dyn VenueClient>,
        sell_venue: Arc<dyn VenueClient>,
        strategy_config: StrategyConfig,
    ) -> Self {
        let strategy = Arc::new(ArbitrageStrategy::new(
            Arc::clone(&buy_venue),
            Arc::clone(&sell_venue),
            strategy_config.clone(),
        ));

        Self {
            buy_venue,
            sell_venue,
            strategy,
            strategy_config,
        }
    }

    /// Run both venue clients and the strategy loop concurrently.
    ///
    /// The first task to return (whether with `Ok` or `Err`) ends the run:
    /// its result is logged, the remaining tasks are given
    /// [`SHUTDOWN_GRACE_PERIOD`] to finish on their own, and anything still
    /// running after that is aborted. The run's overall result is the
    /// result of whichever task finished first.
    pub async fn run(&self) -> Result<(), EngineError> {
        let mut tasks = JoinSet::new();

        {
            let buy_venue = Arc::clone(&self.buy_venue);
            tasks.spawn(async move { buy_venue.run().await });
        }
        {
            let sell_venue = Arc::clone(&self.sell_venue);
            tasks.spawn(async move { sell_venue.run().await });
        }
        {
            let strategy = Arc::clone(&self.strategy);
            let buy_venue = Arc::clone(&self.buy_venue);
            let sell_venue = Arc::clone(&self.sell_venue);
            let period = self.strategy_config.poll_period;
            tasks.spawn(async move { strategy_loop(strategy, buy_venue, sell_venue, period).await });
        }

        let first_result = tasks
            .join_next()
            .await
            .expect("at least one task was spawned")
            .expect("spawned tasks do not panic across this boundary");

        match &first_result {
            Ok(()) => info!("a task completed unexpectedly without error; stopping the run"),
            Err(err) => error!(?err, "a task failed; stopping the run"),
        }

        let shutdown = tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if shutdown.is_err() {
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        first_result
    }
}

/// Drives the strategy on every timer tick and, in between, on every update
/// either venue publishes, so a fill or a book move is reacted to as soon as
/// it is observed rather than waiting out the rest of the poll period.
async fn strategy_loop(
    strategy: Arc<ArbitrageStrategy>,
    buy_venue: Arc<dyn VenueClient>,
    sell_venue: Arc<dyn VenueClient>,
    period: Duration,
) -> Result<(), EngineError> {
    let mut timer = Timer::new(period);
    let mut buy_updates = buy_venue.state().read().await.update_publisher.subscribe();
    let mut sell_updates = sell_venue.state().read().await.update_publisher.subscribe();

    loop {
        tokio::select! {
            () = timer.tick() => {}
            _ = buy_updates.recv() => {}
            _ = sell_updates.recv() => {}
        }
        strategy.tick().await?;
    }
}
