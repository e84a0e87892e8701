use serde::{Deserialize, Serialize};

/// Lifecycle of an invoice, encoded as an integer on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum OrderStatus {
    #[default]
    Unknown,
    Created,
    Paymented,
    Dispatched,
    Finished,
    Canceled,
}

impl From<OrderStatus> for u8 {
    fn from(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Unknown => 0,
            OrderStatus::Created => 1,
            OrderStatus::Paymented => 2,
            OrderStatus::Dispatched => 3,
            OrderStatus::Finished => 4,
            OrderStatus::Canceled => 5,
        }
    }
}

impl TryFrom<u8> for OrderStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Created),
            2 => Ok(Self::Paymented),
            3 => Ok(Self::Dispatched),
            4 => Ok(Self::Finished),
            5 => Ok(Self::Canceled),
            other => Err(format!("unknown order status {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: i32,
    pub price: f64,
    pub total: f64,
    #[serde(rename = "cartID")]
    pub cart_id: String,
    pub tenant_id: String,
}

/// A placed order.
///
/// `invoice_id` is the storage key. Zero asks the service to assign one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Invoice {
    pub invoice_id: u64,
    pub amount: f64,
    pub discount: f64,
    pub user_id: String,
    pub address_id: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    pub status: OrderStatus,
    #[serde(rename = "tenantID")]
    pub tenant_id: String,
    pub items: Vec<OrderItem>,
}

/// One line of a user's shopping cart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Cart {
    pub id: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "productID")]
    pub product_id: String,
    pub price: f64,
    pub quantity: i32,
    pub total: f64,
}

/// A page of results. `page_index` is 1-based.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Pagination<T> {
    pub count: usize,
    pub page_index: usize,
    pub page_size: usize,
    /// Sort keys, `-field` meaning descending.
    pub sortor: Vec<String>,
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub invoice: Invoice,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetOrdersRequest {
    pub user_id: String,
    pub tenant_id: String,
    pub page_index: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetOrdersResponse {
    pub user_id: String,
    pub tenant_id: String,
    pub orders: Pagination<Invoice>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetOrderRequest {
    pub order_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetOrderResponse {
    pub order: Invoice,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AddCartRequest {
    #[serde(rename = "productID")]
    pub product_id: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    pub price: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AddCartResponse {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetCartItemsRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetCartItemsResponse {
    pub items: Vec<Cart>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoveCartItemRequest {
    pub cart_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveCartItemResponse {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateQuantityRequest {
    pub cart_id: String,
    pub quantity: i32,
    pub price: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateQuantityResponse {}
