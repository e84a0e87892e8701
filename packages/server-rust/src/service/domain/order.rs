//! Orders and shopping carts.

use storefront_core::ids::unix_millis;
use storefront_core::model::{
    AddCartRequest, AddCartResponse, Cart, CreateOrderRequest, CreateOrderResponse,
    GetCartItemsRequest, GetCartItemsResponse, GetOrderRequest, GetOrderResponse,
    GetOrdersRequest, GetOrdersResponse, Invoice, OrderStatus, Pagination, RemoveCartItemRequest,
    RemoveCartItemResponse, UpdateQuantityRequest, UpdateQuantityResponse,
};
use storefront_core::{BusinessError, IdGenerator, Reply};

use crate::service::middleware::LogFields;
use crate::storage::{FieldQuery, SharedStore, Sort, Stores};

pub const DEFAULT_PAGE_SIZE: usize = 10;

pub struct OrderService {
    orders: SharedStore<Invoice>,
    carts: SharedStore<Cart>,
    ids: IdGenerator,
}

impl OrderService {
    #[must_use]
    pub fn new(stores: &Stores, ids: IdGenerator) -> Self {
        Self {
            orders: stores.orders.clone(),
            carts: stores.carts.clone(),
            ids,
        }
    }

    /// Stores the invoice, filling in id, creation time and status when unset.
    ///
    /// Re-sending an invoice with the same id replaces the stored one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    pub fn create_order(&self, req: CreateOrderRequest) -> anyhow::Result<Reply<CreateOrderResponse>> {
        let mut invoice = req.invoice;
        if invoice.invoice_id == 0 {
            invoice.invoice_id = self.ids.next_id();
        }
        if invoice.created_at == 0 {
            invoice.created_at = unix_millis();
        }
        if invoice.status == OrderStatus::Unknown {
            invoice.status = OrderStatus::Created;
        }
        let id = invoice.invoice_id.to_string();
        self.orders.upsert(invoice)?;
        Ok(Reply::ok(CreateOrderResponse { id }))
    }

    /// Pages through the orders of a tenant, or of a user when no tenant is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_orders(&self, req: GetOrdersRequest) -> anyhow::Result<Reply<GetOrdersResponse>> {
        let (field, owner) = match (req.tenant_id.is_empty(), req.user_id.is_empty()) {
            (false, _) => ("tenantID", &req.tenant_id),
            (true, false) => ("userId", &req.user_id),
            (true, true) => return Ok(Reply::fail(BusinessError::MissingOwner)),
        };
        let page_index = req.page_index.max(1);
        let page_size = if req.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            req.page_size
        };
        let sort = Sort::descending("createdAt");
        let sortor = vec![sort.to_sortor()];

        let page = self.orders.query(
            &FieldQuery::new(field, owner.as_str())
                .page(page_index, page_size)
                .sort(sort),
        )?;
        Ok(Reply::ok(GetOrdersResponse {
            orders: Pagination {
                count: page.total,
                page_index,
                page_size,
                sortor,
                data: page.items,
            },
            user_id: req.user_id,
            tenant_id: req.tenant_id,
        }))
    }

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_order(&self, req: GetOrderRequest) -> anyhow::Result<Reply<GetOrderResponse>> {
        Ok(match self.orders.get(&req.order_id)? {
            Some(order) => Reply::ok(GetOrderResponse { order }),
            None => Reply::fail(BusinessError::OrderNotFound),
        })
    }

    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    pub fn add_cart(&self, req: AddCartRequest) -> anyhow::Result<Reply<AddCartResponse>> {
        let cart = Cart {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: req.user_id,
            product_id: req.product_id,
            price: req.price,
            quantity: 1,
            total: req.price,
        };
        let id = cart.id.clone();
        self.carts.upsert(cart)?;
        Ok(Reply::ok(AddCartResponse { id }))
    }

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_cart_items(
        &self,
        req: GetCartItemsRequest,
    ) -> anyhow::Result<Reply<GetCartItemsResponse>> {
        let page = self
            .carts
            .query(&FieldQuery::new("userID", req.user_id))?;
        Ok(Reply::ok(GetCartItemsResponse { items: page.items }))
    }

    /// # Errors
    ///
    /// Returns an error if the store rejects the delete.
    pub fn remove_cart_item(
        &self,
        req: RemoveCartItemRequest,
    ) -> anyhow::Result<Reply<RemoveCartItemResponse>> {
        Ok(match self.carts.remove(&req.cart_id)? {
            Some(_) => Reply::ok(RemoveCartItemResponse {}),
            None => Reply::fail(BusinessError::CartItemNotFound),
        })
    }

    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn update_quantity(
        &self,
        req: UpdateQuantityRequest,
    ) -> anyhow::Result<Reply<UpdateQuantityResponse>> {
        let Some(mut cart) = self.carts.get(&req.cart_id)? else {
            return Ok(Reply::fail(BusinessError::CartItemNotFound));
        };
        cart.quantity = req.quantity;
        if req.price > 0.0 {
            cart.price = req.price;
        }
        cart.total = cart.price * f64::from(cart.quantity);
        self.carts.upsert(cart)?;
        Ok(Reply::ok(UpdateQuantityResponse {}))
    }
}

impl LogFields for CreateOrderRequest {
    fn log_fields(&self) -> String {
        format!(
            "invoice_id={} user_id={}",
            self.invoice.invoice_id, self.invoice.user_id
        )
    }
}

impl LogFields for GetOrdersRequest {
    fn log_fields(&self) -> String {
        format!(
            "user_id={} tenant_id={} page={}",
            self.user_id, self.tenant_id, self.page_index
        )
    }
}

impl LogFields for GetOrderRequest {
    fn log_fields(&self) -> String {
        format!("order_id={}", self.order_id)
    }
}

impl LogFields for AddCartRequest {
    fn log_fields(&self) -> String {
        format!("product_id={} user_id={}", self.product_id, self.user_id)
    }
}

impl LogFields for GetCartItemsRequest {
    fn log_fields(&self) -> String {
        format!("user_id={}", self.user_id)
    }
}

impl LogFields for RemoveCartItemRequest {
    fn log_fields(&self) -> String {
        format!("cart_id={}", self.cart_id)
    }
}

impl LogFields for UpdateQuantityRequest {
    fn log_fields(&self) -> String {
        format!("cart_id={} quantity={}", self.cart_id, self.quantity)
    }
}
