//! Registry service names and RPC method names.
//!
//! Method names are `"<service>.<Operation>"`. A method name is also the
//! label used for the operation in logs, spans and metrics.

/// Registry keys of the three domain services.
pub mod service_names {
    pub const PRODUCT: &str = "productsvc";
    pub const USER: &str = "usersvc";
    pub const ORDER: &str = "ordersvc";

    pub const ALL: [&str; 3] = [PRODUCT, USER, ORDER];
}

/// RPC method names, one per operation.
pub mod method_names {
    pub const GET_PRODUCTS: &str = "productsvc.GetProducts";
    pub const CREATE_PRODUCT: &str = "productsvc.CreateProduct";
    pub const UPLOAD: &str = "productsvc.Upload";

    pub const GET_USER: &str = "usersvc.GetUser";
    pub const REGISTER: &str = "usersvc.Register";
    pub const LOGIN: &str = "usersvc.Login";

    pub const CREATE_ORDER: &str = "ordersvc.CreateOrder";
    pub const GET_ORDERS: &str = "ordersvc.GetOrders";
    pub const GET_ORDER: &str = "ordersvc.GetOrder";
    pub const ADD_CART: &str = "ordersvc.AddCart";
    pub const GET_CART_ITEMS: &str = "ordersvc.GetCartItems";
    pub const REMOVE_CART_ITEM: &str = "ordersvc.RemoveCartItem";
    pub const UPDATE_QUANTITY: &str = "ordersvc.UpdateQuantity";
}
