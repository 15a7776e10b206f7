// src/worker.rs
//! The single cooperative task that drives all telemetry processing, and
//! the node bring-up glue between the CAN bus and the router.

use crate::can_bus::CanBus;
use crate::clock::TickClock;
use crate::config::{DataEndpoint, DataType, QUEUE_SERVICE_BUDGET_MS, TIMESYNC_REQUEST_PERIOD_MS};
use crate::router::{EndpointHandler, Router, SideId};
use crate::timesync::TimeSyncClient;
use crate::TelemetryResult;
use alloc::sync::Arc;

/// Register the CAN bus as a router side and subscribe reassembled RX
/// into the router's RX queue.
///
/// Side registration failure is non-fatal: the router still accepts
/// logging, and RX falls back to untagged enqueue (side-aware behavior is
/// simply lost). Returns the side id actually in effect.
pub fn attach_can_side(
    router: &Arc<Router>,
    bus: &Arc<CanBus>,
    side_id: SideId,
    tx_std_id: u16,
) -> TelemetryResult<Option<SideId>> {
    let side = {
        let bus_tx = bus.clone();
        router.add_side_serialized(
            "can",
            side_id,
            move |bytes: &[u8]| bus_tx.send_large(bytes, tx_std_id),
            false,
        )
    };
    let side = side.ok();

    let r = router.clone();
    bus.subscribe_rx(Arc::new(move |payload: &[u8]| {
        let res = match side {
            Some(id) => r.rx_serialized_packet_to_queue_from_side(id, payload),
            None => r.rx_serialized_packet_to_queue(payload),
        };
        // Queue-full drops are acceptable here; the worker drains soon.
        let _ = res;
    }))?;

    Ok(side)
}

/// SD-card sink: hand each packet's serialized form to the storage layer.
/// `write_sd` may be a no-op stub on boards without a card.
pub fn sd_endpoint_handler<F>(write_sd: F) -> EndpointHandler
where
    F: Fn(&[u8]) -> TelemetryResult<()> + Send + Sync + 'static,
{
    EndpointHandler::new_serialized_handler(DataEndpoint::SdCard, write_sd)
}

/// Periodic pump: drain the CAN RX ring, service the router queues, drain
/// again so frames arriving during queue work reassemble promptly, and
/// issue a time-sync request every `TIMESYNC_REQUEST_PERIOD_MS`.
pub struct TelemetryWorker {
    bus: Arc<CanBus>,
    router: Arc<Router>,
    clock: Arc<TickClock>,
    timesync: Arc<TimeSyncClient>,
    last_sync_request_ms: u64,
}

impl TelemetryWorker {
    pub fn new(
        bus: Arc<CanBus>,
        router: Arc<Router>,
        clock: Arc<TickClock>,
        timesync: Arc<TimeSyncClient>,
    ) -> Self {
        Self {
            bus,
            router,
            clock,
            timesync,
            last_sync_request_ms: 0,
        }
    }

    /// One loop-body iteration. Per-iteration errors are recoverable; the
    /// worker never exits because of them.
    pub fn run_once(&mut self) {
        self.bus.process_rx(self.clock.now_ms());
        let _ = self
            .router
            .process_all_queues_with_timeout(QUEUE_SERVICE_BUDGET_MS);
        self.bus.process_rx(self.clock.now_ms());

        let now = self.clock.now_ms();
        if now.wrapping_sub(self.last_sync_request_ms) >= TIMESYNC_REQUEST_PERIOD_MS {
            let _ = self.timesync.send_request(&self.router, &self.clock);
            self.last_sync_request_ms = now;
        }
    }

    /// Run forever, yielding to the scheduler between iterations.
    pub fn run(&mut self, mut yield_fn: impl FnMut()) -> ! {
        let _ = self
            .router
            .log_string(DataType::MessageData, "Telemetry worker starting", None, false);

        loop {
            self.run_once();
            yield_fn();
        }
    }
}
