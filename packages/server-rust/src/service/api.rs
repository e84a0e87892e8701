//! Per-service operation sets.
//!
//! Each API struct holds one [`BoxOperation`] per method. A node builds them
//! from local middleware chains; the gateway builds the same structs from
//! retrying dispatchers, so the HTTP routes and the RPC router never know
//! which side answers.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use storefront_core::method_names;
use storefront_core::model::{
    AddCartRequest, AddCartResponse, CreateOrderRequest, CreateOrderResponse,
    CreateProductRequest, CreateProductResponse, GetCartItemsRequest, GetCartItemsResponse,
    GetOrderRequest, GetOrderResponse, GetOrdersRequest, GetOrdersResponse, GetProductsRequest,
    GetProductsResponse, GetUserRequest, GetUserResponse, LoginRequest, LoginResponse,
    RegisterRequest, RegisterResponse, RemoveCartItemRequest, RemoveCartItemResponse,
    UpdateQuantityRequest, UpdateQuantityResponse, UploadRequest, UploadResponse,
};

use super::config::ChainConfig;
use super::domain::{OrderService, ProductService, UserService};
use super::middleware::{Call, ServiceOperation};
use super::operation::{BoxOperation, CallError};
use super::router::MethodRouter;

/// Builds the operation answering `method` from outside the process.
pub trait OperationSource {
    fn operation<Req, Resp>(&self, method: &'static str) -> BoxOperation<Req, Resp>
    where
        Req: Serialize + Clone + Send + Sync + 'static,
        Resp: DeserializeOwned + Send + Sync + 'static;
}

// ---------------------------------------------------------------------------
// Macro for the per-service operation sets
// ---------------------------------------------------------------------------

/// Generates an API struct with one field per method and its constructors.
///
/// Each field name is also the name of the business method on `$svc`.
macro_rules! operation_set {
    (
        $(#[$meta:meta])*
        $name:ident for $svc:ty {
            $( $field:ident: $method:path => $req:ty, $resp:ty; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            $( pub $field: BoxOperation<$req, $resp>, )*
        }

        impl $name {
            /// RPC method names served by this set.
            pub const METHODS: &'static [&'static str] = &[$($method),*];

            /// Wraps each business method of `service` in its operation chain.
            #[must_use]
            pub fn local(service: &Arc<$svc>, config: &ChainConfig) -> Self {
                Self {
                    $( $field: {
                        let service = Arc::clone(service);
                        ServiceOperation::boxed(
                            $method,
                            config,
                            tower::service_fn(move |call: Call<$req>| {
                                let service = Arc::clone(&service);
                                async move { service.$field(call.req).map_err(CallError::from) }
                            }),
                        )
                    }, )*
                }
            }

            /// Builds every operation from `source`.
            #[must_use]
            pub fn remote(source: &impl OperationSource) -> Self {
                Self {
                    $( $field: source.operation::<$req, $resp>($method), )*
                }
            }

            /// Registers every operation with an RPC router.
            pub fn register(&self, router: &mut MethodRouter) {
                $( router.add($method, Arc::clone(&self.$field)); )*
            }
        }
    };
}

operation_set!(
    /// Product catalog operations.
    ProductApi for ProductService {
        get_products: method_names::GET_PRODUCTS => GetProductsRequest, GetProductsResponse;
        create_product: method_names::CREATE_PRODUCT => CreateProductRequest, CreateProductResponse;
        upload: method_names::UPLOAD => UploadRequest, UploadResponse;
    }
);

operation_set!(
    /// User account operations.
    UserApi for UserService {
        get_user: method_names::GET_USER => GetUserRequest, GetUserResponse;
        register: method_names::REGISTER => RegisterRequest, RegisterResponse;
        login: method_names::LOGIN => LoginRequest, LoginResponse;
    }
);

operation_set!(
    /// Order and cart operations.
    OrderApi for OrderService {
        create_order: method_names::CREATE_ORDER => CreateOrderRequest, CreateOrderResponse;
        get_orders: method_names::GET_ORDERS => GetOrdersRequest, GetOrdersResponse;
        get_order: method_names::GET_ORDER => GetOrderRequest, GetOrderResponse;
        add_cart: method_names::ADD_CART => AddCartRequest, AddCartResponse;
        get_cart_items: method_names::GET_CART_ITEMS => GetCartItemsRequest, GetCartItemsResponse;
        remove_cart_item: method_names::REMOVE_CART_ITEM => RemoveCartItemRequest, RemoveCartItemResponse;
        update_quantity: method_names::UPDATE_QUANTITY => UpdateQuantityRequest, UpdateQuantityResponse;
    }
);

/// The operation sets exposed by one process. Absent sets have no routes.
#[derive(Clone, Default)]
pub struct Apis {
    pub product: Option<ProductApi>,
    pub user: Option<UserApi>,
    pub order: Option<OrderApi>,
}

impl Apis {
    /// An RPC router over every present set.
    #[must_use]
    pub fn method_router(&self) -> MethodRouter {
        let mut router = MethodRouter::new();
        if let Some(api) = &self.product {
            api.register(&mut router);
        }
        if let Some(api) = &self.user {
            api.register(&mut router);
        }
        if let Some(api) = &self.order {
            api.register(&mut router);
        }
        router
    }
}
