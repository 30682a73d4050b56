use std::time::Duration;

use chrono::Utc;
use log::*;
use settlement_engine::{traits::PaymentGateway, EscrowFlowApi, SettlementDatabase};
use tokio::task::JoinHandle;

/// Starts the release sweep. Every `interval`, held allocations whose hold period has passed are paid out to their
/// sellers. The worker runs on the current actix system, so call this from within the server's runtime.
/// Do not await the returned JoinHandle, as it will run indefinitely.
pub fn start_release_worker<B, G>(api: EscrowFlowApi<B, G>, interval: Duration) -> JoinHandle<()>
where
    B: SettlementDatabase + 'static,
    G: PaymentGateway + 'static,
{
    actix_web::rt::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("🕰️ Escrow release worker started. Sweeping every {}s", interval.as_secs());
        loop {
            timer.tick().await;
            trace!("🕰️ Running escrow release sweep");
            match api.run_release_sweep(Utc::now()).await {
                Ok(result) if result.is_empty() => trace!("🕰️ Nothing is due for release"),
                Ok(result) => {
                    info!("🕰️ Release sweep: {result}");
                    for failure in &result.failed {
                        warn!("🕰️ Allocation #{} could not be released. {}", failure.allocation_id, failure.reason);
                    }
                },
                Err(e) => {
                    error!("🕰️ Error running escrow release sweep: {e}");
                },
            }
        }
    })
}
