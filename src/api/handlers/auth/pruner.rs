//! Background sweep of expired one-time tokens.

use sqlx::PgPool;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

use super::storage::prune_expired_tokens;

/// Spawn a task that deletes expired verification tokens, OTPs, and reset
/// tokens every `every`. A zero interval disables the sweep.
pub fn spawn_token_pruner(pool: PgPool, every: Duration) -> Option<tokio::task::JoinHandle<()>> {
    if every.is_zero() {
        info!("expired token pruning disabled");
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match prune_expired_tokens(&pool).await {
                Ok(0) => debug!("no expired tokens to prune"),
                Ok(removed) => info!(removed, "pruned expired tokens"),
                Err(err) => error!("expired token prune failed: {err:#}"),
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn zero_interval_disables_pruner() -> anyhow::Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        assert!(spawn_token_pruner(pool, Duration::ZERO).is_none());
        Ok(())
    }
}
