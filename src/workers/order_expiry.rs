use metrics::gauge;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::config::AppConfig;
use crate::services::OrderService;

/// Schedule for the expiry sweep.
#[derive(Debug, Clone, Copy)]
pub struct ExpirySchedule {
    pub ttl_minutes: i64,
    pub every: Duration,
}

impl From<&AppConfig> for ExpirySchedule {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            ttl_minutes: cfg.order_expiry_ttl_minutes,
            every: cfg.order_expiry_interval(),
        }
    }
}

/// Runs one sweep and logs the result. Errors are logged, never returned,
/// so a failed tick does not stop the loop.
pub async fn sweep_once(orders: &OrderService, ttl_minutes: i64) -> usize {
    match orders.release_expired_orders(ttl_minutes).await {
        Ok(released) => {
            gauge!("storefront_orders.expiry_last_released", released as f64);
            if released > 0 {
                info!(released, ttl_minutes, "expired orders released");
            }
            released
        }
        Err(e) => {
            error!("order expiry sweep failed: {}", e);
            0
        }
    }
}

/// Spawns the periodic sweep. The first tick fires immediately.
pub fn start_worker(orders: OrderService, schedule: ExpirySchedule) -> JoinHandle<()> {
    info!(
        ttl_minutes = schedule.ttl_minutes,
        every_secs = schedule.every.as_secs(),
        "starting order expiry worker"
    );

    tokio::spawn(async move {
        let mut ticker = interval(schedule.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sweep_once(&orders, schedule.ttl_minutes).await;
        }
    })
}
