use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::model::{LedgerRecord, Role, TradeDetail, TradeType, TradeUnit};

/// Network action that carries confirmed trades.
pub const ON_CONFIRM_ACTION: &str = "on_confirm";

#[derive(Debug, Error)]
#[error("malformed confirmation payload: {0}")]
pub struct ParseError(#[from] serde_json::Error);

/// Confirmation callback as it arrives from the network. Every field is
/// optional on decode; the JSON-LD attribute bags stay untyped because their
/// key set is open-ended.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfirmationPayload {
    pub context: MessageContext,
    pub message: ConfirmationMessage,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessageContext {
    pub version: String,
    pub action: String,
    pub timestamp: String,
    pub message_id: String,
    pub transaction_id: String,
    pub bap_id: String,
    pub bap_uri: String,
    pub bpp_id: String,
    pub bpp_uri: String,
    pub ttl: String,
    pub domain: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfirmationMessage {
    pub order: Order,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Order {
    #[serde(rename = "beckn:id")]
    pub id: String,
    #[serde(rename = "beckn:orderStatus")]
    pub status: String,
    #[serde(rename = "beckn:seller")]
    pub seller: String,
    #[serde(rename = "beckn:buyer")]
    pub buyer: Option<Value>,
    #[serde(rename = "beckn:orderAttributes")]
    pub attributes: Option<Value>,
    #[serde(rename = "beckn:orderItems")]
    pub items: Vec<OrderItem>,
    #[serde(rename = "beckn:fulfillment")]
    pub fulfillment: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OrderItem {
    #[serde(rename = "beckn:orderedItem")]
    pub ordered_item: String,
    #[serde(rename = "beckn:quantity")]
    pub quantity: ItemQuantity,
    #[serde(rename = "beckn:orderItemAttributes")]
    pub attributes: Option<Value>,
    #[serde(rename = "beckn:acceptedOffer")]
    pub accepted_offer: AcceptedOffer,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ItemQuantity {
    #[serde(rename = "unitQuantity")]
    pub value: Decimal,
    #[serde(rename = "unitText")]
    pub unit: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AcceptedOffer {
    #[serde(rename = "beckn:id")]
    pub id: String,
    #[serde(rename = "beckn:descriptor")]
    pub descriptor: Option<Value>,
    #[serde(rename = "beckn:provider")]
    pub provider: String,
    #[serde(rename = "beckn:items")]
    pub items: Vec<String>,
    #[serde(rename = "beckn:offerAttributes")]
    pub attributes: Option<Value>,
}

pub fn parse_confirmation(body: &[u8]) -> Result<ConfirmationPayload, ParseError> {
    Ok(serde_json::from_slice(body)?)
}

/// Flattens a confirmation into ledger records, one per order item, in the
/// order the items appear. Context that the payload does not carry comes out
/// as empty strings; mapping itself cannot fail.
pub fn map_to_records(payload: &ConfirmationPayload, role: Role) -> Vec<LedgerRecord> {
    let context = &payload.context;
    let order = &payload.message.order;

    order
        .items
        .iter()
        .map(|item| LedgerRecord {
            role,
            transaction_id: context.transaction_id.clone(),
            order_item_id: item.accepted_offer.id.clone(),
            platform_id_buyer: context.bap_id.clone(),
            platform_id_seller: context.bpp_id.clone(),
            discom_id_buyer: attribute_str(order.attributes.as_ref(), "utilityIdBuyer")
                .to_string(),
            discom_id_seller: attribute_str(order.attributes.as_ref(), "utilityIdSeller")
                .to_string(),
            buyer_id: attribute_str(order.buyer.as_ref(), "beckn:id").to_string(),
            seller_id: order.seller.clone(),
            trade_time: context.timestamp.clone(),
            delivery_start_time: time_window_str(
                item.accepted_offer.attributes.as_ref(),
                "schema:startTime",
            )
            .to_string(),
            delivery_end_time: time_window_str(
                item.accepted_offer.attributes.as_ref(),
                "schema:endTime",
            )
            .to_string(),
            trade_details: trade_details(item),
            client_reference: client_reference(&context.transaction_id, &item.accepted_offer.id),
        })
        .collect()
}

/// Idempotency key for one order item of one transaction. Stable across
/// redeliveries so the ledger can dedupe replays.
pub fn client_reference(transaction_id: &str, order_item_id: &str) -> String {
    format!("onix-{}-{}", transaction_id, order_item_id)
}

/// Pulls the network action out of the request path, falling back to the
/// body's `context.action`. Paths look like `/bap/receiver/{action}` or
/// `/bpp/caller/{action}`; anything shorter than three segments is not a
/// routable callback path. Never fails; unresolvable input yields "".
pub fn extract_action(path: &str, body: &[u8]) -> String {
    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
    if parts.len() >= 3 {
        return parts[parts.len() - 1].to_string();
    }

    if let Ok(probe) = serde_json::from_slice::<Value>(body) {
        if let Some(action) = probe
            .get("context")
            .and_then(|context| context.get("action"))
            .and_then(Value::as_str)
        {
            if !action.is_empty() {
                return action.to_string();
            }
        }
    }

    String::new()
}

fn trade_details(item: &OrderItem) -> Vec<TradeDetail> {
    vec![TradeDetail {
        trade_qty: item.quantity.value,
        trade_type: TradeType::Energy,
        trade_unit: TradeUnit::normalize(&item.quantity.unit),
    }]
}

fn attribute_str<'a>(attributes: Option<&'a Value>, key: &str) -> &'a str {
    attributes
        .and_then(|attrs| attrs.get(key))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

fn time_window_str<'a>(offer_attributes: Option<&'a Value>, key: &str) -> &'a str {
    offer_attributes
        .and_then(|attrs| attrs.get("beckn:timeWindow"))
        .and_then(|window| window.get(key))
        .and_then(Value::as_str)
        .unwrap_or_default()
}
