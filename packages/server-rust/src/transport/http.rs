//! JSON routes over the operation sets.
//!
//! The same table serves a domain node (local chains) and the gateway
//! (dispatchers). Extractor rejections are decode errors and never reach an
//! operation. Business errors answer `{"error": msg}` with a status derived
//! from their kind; successful replies are the response fields plus
//! `"err": null`.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use storefront_core::model::{
    AddCartRequest, CreateOrderRequest, CreateProductRequest, GetCartItemsRequest,
    GetOrderRequest, GetOrdersRequest, GetProductsRequest, GetUserRequest, LoginRequest,
    RegisterRequest, RemoveCartItemRequest, UpdateQuantityRequest, UploadRequest,
};
use storefront_core::{method_names, BusinessError, ErrorKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::service::api::{Apis, OrderApi, ProductApi, UserApi};
use crate::service::operation::{BoxOperation, CallContext, CallError};

/// Builds the route table for every present operation set.
pub fn router<S>(apis: &Apis) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let mut router = Router::new();
    if let Some(api) = &apis.product {
        router = router.merge(product_routes(api.clone()));
    }
    if let Some(api) = &apis.user {
        router = router.merge(user_routes(api.clone()));
    }
    if let Some(api) = &apis.order {
        router = router.merge(order_routes(api.clone()));
    }
    router
}

fn product_routes<S>(api: ProductApi) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/api/v1/products/", get(get_products))
        .route("/api/v1/products/create", post(create_product))
        .route("/api/v1/products/upload", post(upload))
        .with_state(api)
}

fn user_routes<S>(api: UserApi) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/api/v1/users/", post(register))
        .route("/api/v1/users/login", post(login))
        .route("/api/v1/users/{id}", get(get_user))
        .with_state(api)
}

fn order_routes<S>(api: OrderApi) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/api/v1/orders/", post(create_order).get(get_orders))
        .route("/api/v1/orders/{id}/", get(get_order))
        .route("/api/v1/carts/", post(add_cart).get(get_cart_items))
        .route(
            "/api/v1/carts/{cart_id}/",
            put(update_quantity).delete(remove_cart_item),
        )
        .with_state(api)
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

type HandlerResult = Result<Response, Response>;

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// HTTP status for a business error.
#[must_use]
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn business_error(err: &BusinessError) -> Response {
    error_body(status_for(err.kind()), &err.to_string())
}

/// Callers only see a generic message; the detail goes to the log.
fn call_error(operation: &str, err: &CallError) -> Response {
    match err {
        CallError::Decode(detail) => {
            debug!(operation, detail = %detail, "rejected malformed request");
            error_body(StatusCode::BAD_REQUEST, "malformed request")
        }
        CallError::NoEndpoints | CallError::CircuitOpen | CallError::Overloaded => {
            warn!(operation, error = %err, "operation unavailable");
            error_body(StatusCode::SERVICE_UNAVAILABLE, "service unavailable")
        }
        CallError::Timeout { .. } => {
            warn!(operation, error = %err, "operation timed out");
            error_body(StatusCode::GATEWAY_TIMEOUT, "upstream timeout")
        }
        _ => {
            warn!(operation, error = %err, "operation failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn malformed(detail: impl std::fmt::Display) -> Response {
    call_error("", &CallError::Decode(detail.to_string()))
}

/// Unwraps an extractor, answering 400 when it was rejected.
fn accept<T, E: std::fmt::Display>(extracted: Result<T, E>) -> Result<T, Response> {
    extracted.map_err(malformed)
}

fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Calls `operation` and encodes its outcome.
///
/// Dropping the handler (client gone) cancels the call.
async fn invoke<Req, Resp>(
    operation: &BoxOperation<Req, Resp>,
    method: &'static str,
    headers: &HeaderMap,
    req: Req,
) -> Response
where
    Req: Send + 'static,
    Resp: Serialize + Send + 'static,
{
    let cancel = CancellationToken::new();
    let _abandon = cancel.clone().drop_guard();
    let ctx = CallContext::new(method)
        .with_cancel(cancel)
        .with_request_id(request_id(headers));

    match operation.call(ctx, req).await {
        Ok(reply) => {
            if let Some(err) = reply.error() {
                return business_error(err);
            }
            (StatusCode::OK, Json(reply)).into_response()
        }
        Err(err) => call_error(method, &err),
    }
}

// ---------------------------------------------------------------------------
// productsvc
// ---------------------------------------------------------------------------

async fn get_products(
    State(api): State<ProductApi>,
    headers: HeaderMap,
    query: Result<Query<GetProductsRequest>, QueryRejection>,
) -> HandlerResult {
    let Query(req) = accept(query)?;
    Ok(invoke(&api.get_products, method_names::GET_PRODUCTS, &headers, req).await)
}

async fn create_product(
    State(api): State<ProductApi>,
    headers: HeaderMap,
    body: Result<Json<CreateProductRequest>, JsonRejection>,
) -> HandlerResult {
    let Json(req) = accept(body)?;
    Ok(invoke(&api.create_product, method_names::CREATE_PRODUCT, &headers, req).await)
}

/// Multipart upload: a `file` part, plus optional `name` and `checksum` parts.
async fn upload(
    State(api): State<ProductApi>,
    headers: HeaderMap,
    multipart: Result<Multipart, axum::extract::multipart::MultipartRejection>,
) -> HandlerResult {
    let mut multipart = accept(multipart)?;
    let mut req = UploadRequest::default();
    let mut has_file = false;

    while let Some(field) = accept(multipart.next_field().await)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                if req.name.is_empty() {
                    req.name = field.file_name().unwrap_or_default().to_string();
                }
                req.body = accept(field.bytes().await)?.to_vec();
                has_file = true;
            }
            Some("name") => req.name = accept(field.text().await)?,
            Some("checksum") => req.checksum = accept(field.text().await)?.trim().to_string(),
            _ => {}
        }
    }
    if !has_file {
        return Err(malformed("missing multipart field `file`"));
    }

    Ok(invoke(&api.upload, method_names::UPLOAD, &headers, req).await)
}

// ---------------------------------------------------------------------------
// usersvc
// ---------------------------------------------------------------------------

async fn get_user(
    State(api): State<UserApi>,
    headers: HeaderMap,
    id: Result<Path<String>, PathRejection>,
) -> HandlerResult {
    let Path(id) = accept(id)?;
    Ok(invoke(&api.get_user, method_names::GET_USER, &headers, GetUserRequest { id }).await)
}

async fn register(
    State(api): State<UserApi>,
    headers: HeaderMap,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> HandlerResult {
    let Json(req) = accept(body)?;
    Ok(invoke(&api.register, method_names::REGISTER, &headers, req).await)
}

async fn login(
    State(api): State<UserApi>,
    headers: HeaderMap,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> HandlerResult {
    let Json(req) = accept(body)?;
    Ok(invoke(&api.login, method_names::LOGIN, &headers, req).await)
}

// ---------------------------------------------------------------------------
// ordersvc
// ---------------------------------------------------------------------------

async fn create_order(
    State(api): State<OrderApi>,
    headers: HeaderMap,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> HandlerResult {
    let Json(req) = accept(body)?;
    Ok(invoke(&api.create_order, method_names::CREATE_ORDER, &headers, req).await)
}

async fn get_orders(
    State(api): State<OrderApi>,
    headers: HeaderMap,
    query: Result<Query<GetOrdersRequest>, QueryRejection>,
) -> HandlerResult {
    let Query(req) = accept(query)?;
    Ok(invoke(&api.get_orders, method_names::GET_ORDERS, &headers, req).await)
}

async fn get_order(
    State(api): State<OrderApi>,
    headers: HeaderMap,
    id: Result<Path<String>, PathRejection>,
) -> HandlerResult {
    let Path(order_id) = accept(id)?;
    let req = GetOrderRequest { order_id };
    Ok(invoke(&api.get_order, method_names::GET_ORDER, &headers, req).await)
}

async fn add_cart(
    State(api): State<OrderApi>,
    headers: HeaderMap,
    body: Result<Json<AddCartRequest>, JsonRejection>,
) -> HandlerResult {
    let Json(req) = accept(body)?;
    Ok(invoke(&api.add_cart, method_names::ADD_CART, &headers, req).await)
}

async fn get_cart_items(
    State(api): State<OrderApi>,
    headers: HeaderMap,
    query: Result<Query<GetCartItemsRequest>, QueryRejection>,
) -> HandlerResult {
    let Query(req) = accept(query)?;
    Ok(invoke(&api.get_cart_items, method_names::GET_CART_ITEMS, &headers, req).await)
}

async fn update_quantity(
    State(api): State<OrderApi>,
    headers: HeaderMap,
    cart_id: Result<Path<String>, PathRejection>,
    body: Result<Json<UpdateQuantityRequest>, JsonRejection>,
) -> HandlerResult {
    let Path(cart_id) = accept(cart_id)?;
    let Json(mut req) = accept(body)?;
    req.cart_id = cart_id;
    Ok(invoke(&api.update_quantity, method_names::UPDATE_QUANTITY, &headers, req).await)
}

async fn remove_cart_item(
    State(api): State<OrderApi>,
    headers: HeaderMap,
    cart_id: Result<Path<String>, PathRejection>,
) -> HandlerResult {
    let Path(cart_id) = accept(cart_id)?;
    let req = RemoveCartItemRequest { cart_id };
    Ok(invoke(&api.remove_cart_item, method_names::REMOVE_CART_ITEM, &headers, req).await)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
