use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::client::LedgerSink;
use crate::metrics;
use crate::model::LedgerRecord;

/// Fans mapped records out to the ledger, one fire-and-forget task per
/// record. Each task stamps its own deadline when it starts running, so a
/// confirmation that sat in a queue still gets the full delivery budget.
/// Outcomes surface through logs and metrics only; nothing flows back to
/// the event path that produced the records.
pub struct RecordDispatcher {
    sink: Arc<dyn LedgerSink>,
    call_timeout: Duration,
    tracker: TaskTracker,
}

impl RecordDispatcher {
    pub fn new(sink: Arc<dyn LedgerSink>, call_timeout: Duration) -> RecordDispatcher {
        RecordDispatcher {
            sink,
            call_timeout,
            tracker: TaskTracker::new(),
        }
    }

    /// Spawns one delivery task per record and returns immediately.
    pub fn dispatch_all(&self, records: Vec<LedgerRecord>) {
        for record in records {
            self.dispatch(record);
        }
    }

    fn dispatch(&self, record: LedgerRecord) {
        let sink = Arc::clone(&self.sink);
        let timeout = self.call_timeout;
        metrics::inc_deliveries_in_flight();

        self.tracker.spawn(async move {
            let started = Instant::now();
            let deadline = started + timeout;
            let outcome = sink.deliver(&record, deadline).await;
            metrics::observe_delivery_seconds(started.elapsed().as_secs_f64());

            match outcome {
                Ok(receipt) => {
                    metrics::inc_deliveries_succeeded();
                    info!(
                        transaction_id = %record.transaction_id,
                        order_item_id = %record.order_item_id,
                        record_id = %receipt.record_id,
                        client_reference = %record.client_reference,
                        "✅ trade recorded to ledger"
                    );
                }
                Err(error) => {
                    metrics::inc_deliveries_failed();
                    error!(
                        transaction_id = %record.transaction_id,
                        order_item_id = %record.order_item_id,
                        client_reference = %record.client_reference,
                        error = %error,
                        "❌ failed to record trade to ledger"
                    );
                }
            }

            metrics::dec_deliveries_in_flight();
        });
    }

    /// Deliveries spawned but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Blocks until every dispatched delivery has completed. Called on
    /// shutdown so confirmed trades are never silently dropped.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
