// live-server/src/actors/housekeeping.rs
use actix::{Actor, AsyncContext, Context};
use std::sync::Arc;
use std::time::Duration;
use viewer_engine::{EngineStats, LiveEngine};

use crate::middleware::RateLimiter;

/// Periodically reclaims expired handshakes, reservations and limiter
/// entries, and logs engine counters when they change.
pub struct HousekeepingActor {
    engine: Arc<LiveEngine>,
    limiter: RateLimiter,
    interval: Duration,
    last_stats: EngineStats,
}

impl HousekeepingActor {
    pub fn new(engine: Arc<LiveEngine>, limiter: RateLimiter, interval: Duration) -> Self {
        Self {
            engine,
            limiter,
            interval,
            last_stats: EngineStats::default(),
        }
    }

    fn start_sweep_task(&self, ctx: &mut Context<Self>) {
        ctx.run_interval(self.interval, |act, _ctx| {
            act.engine.sweep();
            let pruned = act.limiter.prune();
            if pruned > 0 {
                tracing::debug!("Pruned {} idle rate-limit entries", pruned);
            }

            let stats = act.engine.stats();
            if stats != act.last_stats {
                tracing::info!(
                    "Live viewers: {}, pending handshakes: {}, reservations: {}",
                    stats.live_viewers,
                    stats.pending_handshakes,
                    stats.reservations
                );
                act.last_stats = stats;
            }
        });
    }
}

impl Actor for HousekeepingActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!("Housekeeping every {:?}", self.interval);
        self.start_sweep_task(ctx);
    }
}
