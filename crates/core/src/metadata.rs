//! The structured footer the model appends to its final answer.
//!
//! The model is instructed to end every answer with a block like:
//!
//! ```text
//! <details>
//! {"intent": "CREATE_ORDER", "orderID": 100, "context": "...", "actions": [...]}
//! </details>
//! ```
//!
//! Extraction runs once over the fully assembled text, never per delta,
//! because the delimiters may straddle chunk boundaries. The raw substring
//! between the delimiters is what gets persisted and sent to clients; it is
//! not guaranteed to be valid JSON.

use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_START_TAG: &str = "<details>";
pub const DEFAULT_END_TAG: &str = "</details>";

/// Delimiters wrapping the footer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataTags {
    pub start: String,
    pub end: String,
}

impl MetadataTags {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Return the substring strictly between the first start tag and the
    /// first end tag following it, or `None` if either is absent.
    pub fn extract<'a>(&self, text: &'a str) -> Option<&'a str> {
        let start = text.find(&self.start)? + self.start.len();
        let len = text[start..].find(&self.end)?;
        Some(&text[start..start + len])
    }
}

impl Default for MetadataTags {
    fn default() -> Self {
        Self::new(DEFAULT_START_TAG, DEFAULT_END_TAG)
    }
}

/// What the model said the answer was about.
///
/// Wire names are case-sensitive. Unknown values are kept verbatim in
/// [`Intent::Other`] so new intents never break parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Intent {
    CreateOrder,
    UpdateOrder,
    DeleteOrder,
    ViewAccount,
    ViewProduct,
    ViewConsumer,
    ViewOrderDetails,
    ViewOrders,
    AddOrderItem,
    DeleteOrderItem,
    UpdateOrderItem,
    WriteEmail,
    SendEmail,
    ViewActionItems,
    ViewAccountInsights,
    Other(String),
}

impl Intent {
    /// The closed set the model is asked to choose from.
    pub const KNOWN: [Intent; 15] = [
        Intent::CreateOrder,
        Intent::UpdateOrder,
        Intent::DeleteOrder,
        Intent::ViewAccount,
        Intent::ViewProduct,
        Intent::ViewConsumer,
        Intent::ViewOrderDetails,
        Intent::ViewOrders,
        Intent::AddOrderItem,
        Intent::DeleteOrderItem,
        Intent::UpdateOrderItem,
        Intent::WriteEmail,
        Intent::SendEmail,
        Intent::ViewActionItems,
        Intent::ViewAccountInsights,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::CreateOrder => "CREATE_ORDER",
            Self::UpdateOrder => "UPDATE_ORDER",
            Self::DeleteOrder => "DELETE_ORDER",
            Self::ViewAccount => "VIEW_ACCOUNT",
            Self::ViewProduct => "VIEW_PRODUCT",
            Self::ViewConsumer => "VIEW_CONSUMER",
            Self::ViewOrderDetails => "VIEW_ORDER_DETAILS",
            Self::ViewOrders => "VIEW_ORDERS",
            Self::AddOrderItem => "ADD_ORDER_ITEM",
            Self::DeleteOrderItem => "DELETE_ORDER_ITEM",
            Self::UpdateOrderItem => "UPDATE_ORDER_ITEM",
            Self::WriteEmail => "WRITE_EMAIL",
            Self::SendEmail => "SEND_EMAIL",
            Self::ViewActionItems => "VIEW_ACTION_ITEMS",
            Self::ViewAccountInsights => "VIEW_ACCOUNT_INSIGHTS",
            Self::Other(s) => s,
        }
    }

    /// Intents that show an order in the side panel.
    pub fn opens_order_panel(&self) -> bool {
        matches!(
            self,
            Self::CreateOrder
                | Self::UpdateOrder
                | Self::DeleteOrder
                | Self::ViewOrderDetails
                | Self::AddOrderItem
                | Self::DeleteOrderItem
                | Self::UpdateOrderItem
        )
    }

    /// Intents after which cached order data is stale.
    pub fn invalidates_order(&self) -> bool {
        matches!(
            self,
            Self::AddOrderItem
                | Self::UpdateOrder
                | Self::DeleteOrderItem
                | Self::UpdateOrderItem
                | Self::ViewOrderDetails
        )
    }

    pub fn opens_email_panel(&self) -> bool {
        matches!(self, Self::WriteEmail | Self::SendEmail)
    }
}

impl Default for Intent {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl From<String> for Intent {
    fn from(s: String) -> Self {
        Self::KNOWN
            .iter()
            .find(|i| i.as_str() == s)
            .cloned()
            .unwrap_or(Self::Other(s))
    }
}

impl From<Intent> for String {
    fn from(intent: Intent) -> Self {
        match intent {
            Intent::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A follow-up the model suggests to the rep.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type", default)]
    pub action_type: String,
    #[serde(default)]
    pub cta: String,
}

/// The parsed footer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub intent: Intent,

    #[serde(
        rename = "accountID",
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub account_id: Option<i64>,

    #[serde(
        rename = "orderID",
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub order_id: Option<i64>,

    #[serde(
        rename = "emailID",
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub email_id: Option<i64>,

    /// Free-text summary that seeds later turns' prompt context.
    #[serde(default)]
    pub context: String,

    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Accept `100`, `"100"` and `" 100 "`; treat anything else as absent.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

impl Metadata {
    /// Strictly parse a raw footer payload.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw.trim())
    }

    /// Parse for display only: a malformed payload yields an empty value.
    pub fn parse_lenient(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_default()
    }
}

/// Outcome of looking for a footer in finished assistant text.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataParse {
    Ok(Metadata),
    /// No footer; the exchange simply has no metadata.
    MissingDelimiters,
    /// Delimiters found but the payload is not a valid footer.
    InvalidPayload(String),
}

impl MetadataParse {
    pub fn from_text(text: &str, tags: &MetadataTags) -> Self {
        match tags.extract(text) {
            None => Self::MissingDelimiters,
            Some(raw) => Self::from_raw(raw),
        }
    }

    pub fn from_raw(raw: &str) -> Self {
        match Metadata::parse(raw) {
            Ok(metadata) => Self::Ok(metadata),
            Err(e) => Self::InvalidPayload(e.to_string()),
        }
    }

    pub fn ok(self) -> Option<Metadata> {
        match self {
            Self::Ok(metadata) => Some(metadata),
            _ => None,
        }
    }
}
