use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::LedgerClient;
use crate::config::{ConfigError, RelayConfig};
use crate::dispatcher::RecordDispatcher;
use crate::mapper::{self, ON_CONFIRM_ACTION};
use crate::metrics;
use crate::signer::AuthScheme;

/// What `handle` did with one callback. The HTTP intake ignores this beyond
/// debug logging; hosts embedding the relay and tests assert on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Relay is switched off by configuration.
    Disabled,
    /// Callback carried an action other than on_confirm.
    Ignored { action: String },
    /// Body was not a decodable confirmation payload.
    ParseFailed,
    /// Confirmation decoded but carried no order items.
    Empty,
    /// Deliveries spawned, one per mapped record.
    Dispatched(usize),
}

/// Watches confirmation callbacks and records the confirmed trades to the
/// ledger without ever blocking or failing the event path that carried them.
pub struct LedgerRecorder {
    config: RelayConfig,
    dispatcher: RecordDispatcher,
}

impl LedgerRecorder {
    pub fn new(config: RelayConfig) -> Result<LedgerRecorder, ConfigError> {
        let auth = AuthScheme::from_config(&config)?;
        let client = LedgerClient::new(&config, auth)?;
        let dispatcher = RecordDispatcher::new(Arc::new(client), config.call_timeout);

        info!(
            ledger = %config.base_url,
            role = config.role.as_str(),
            enabled = config.enabled,
            retry_count = config.retry_count,
            "ledger recorder ready"
        );

        Ok(LedgerRecorder { config, dispatcher })
    }

    /// Processes one network callback and returns immediately; deliveries
    /// run in the background. A bad payload is logged and skipped so the
    /// surrounding message flow is unaffected.
    pub fn handle(&self, path: &str, body: &[u8]) -> RelayOutcome {
        if !self.config.enabled {
            debug!("ledger recorder disabled, passing event through");
            return RelayOutcome::Disabled;
        }

        let action = mapper::extract_action(path, body);
        if action != ON_CONFIRM_ACTION {
            debug!(action = %action, "not a confirmation callback, skipping");
            return RelayOutcome::Ignored { action };
        }

        let payload = match mapper::parse_confirmation(body) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(error = %error, "failed to parse confirmation payload, skipping");
                return RelayOutcome::ParseFailed;
            }
        };

        let records = mapper::map_to_records(&payload, self.config.role);
        if records.is_empty() {
            warn!(
                transaction_id = %payload.context.transaction_id,
                "confirmation carried no order items, nothing to record"
            );
            return RelayOutcome::Empty;
        }

        let count = records.len();
        metrics::inc_records_mapped(count as u64);
        info!(
            transaction_id = %payload.context.transaction_id,
            records = count,
            "🚀 dispatching ledger records"
        );
        self.dispatcher.dispatch_all(records);
        RelayOutcome::Dispatched(count)
    }

    /// Deliveries still in flight.
    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// Waits for all outstanding deliveries. Call once on shutdown.
    pub async fn drain(&self) {
        self.dispatcher.drain().await;
    }
}
