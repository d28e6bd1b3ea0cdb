use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Perspective under which trades are recorded to the ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "BUYER")]
    Buyer,
    #[serde(rename = "SELLER")]
    Seller,
    #[serde(rename = "BUYER_DISCOM")]
    BuyerDiscom,
    #[serde(rename = "SELLER_DISCOM")]
    SellerDiscom,
}

impl Role {
    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "BUYER" => Some(Role::Buyer),
            "SELLER" => Some(Role::Seller),
            "BUYER_DISCOM" => Some(Role::BuyerDiscom),
            "SELLER_DISCOM" => Some(Role::SellerDiscom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "BUYER",
            Role::Seller => "SELLER",
            Role::BuyerDiscom => "BUYER_DISCOM",
            Role::SellerDiscom => "SELLER_DISCOM",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Buyer
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeUnit {
    #[serde(rename = "KWH")]
    Kwh,
    #[serde(rename = "KW")]
    Kw,
}

impl TradeUnit {
    /// Collapses free-form unit text from order quantities into the closed
    /// vocabulary the ledger accepts. Matching is case-insensitive and
    /// whitespace-tolerant; unrecognized spellings land on kWh, the common
    /// unit for traded energy.
    pub fn normalize(unit_text: &str) -> TradeUnit {
        match unit_text.trim().to_uppercase().as_str() {
            "KWH" | "KW/H" | "KILOWATT-HOUR" | "KILOWATT HOUR" => TradeUnit::Kwh,
            "KW" | "KILOWATT" => TradeUnit::Kw,
            _ => TradeUnit::Kwh,
        }
    }
}

impl Default for TradeUnit {
    fn default() -> Self {
        TradeUnit::Kwh
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeType {
    #[serde(rename = "ENERGY")]
    Energy,
}

impl Default for TradeType {
    fn default() -> Self {
        TradeType::Energy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradeDetail {
    #[serde(with = "rust_decimal::serde::float")]
    pub trade_qty: Decimal,
    pub trade_type: TradeType,
    pub trade_unit: TradeUnit,
}

/// One flat ledger row derived from a single order item of a confirmed
/// trade. Optional context that the confirmation did not carry is kept as
/// an empty string and omitted from the wire body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub role: Role,
    pub transaction_id: String,
    pub order_item_id: String,
    pub platform_id_buyer: String,
    pub platform_id_seller: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub discom_id_buyer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub discom_id_seller: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub buyer_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub seller_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trade_time: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub delivery_start_time: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub delivery_end_time: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trade_details: Vec<TradeDetail>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_reference: String,
}

/// Body the ledger returns on a 2xx response.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct LedgerReceipt {
    pub success: bool,
    pub record_id: String,
    pub creation_time: String,
    pub row_digest: String,
    pub message: String,
}

/// Body the ledger returns on a rejection (400/401/403/409).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LedgerApiError {
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}
