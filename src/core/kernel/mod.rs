/// Transport kernel shared by the HTTP and WebSocket clients
///
/// The kernel holds only exchange-agnostic plumbing: the JSON-RPC codec,
/// the narrow transport traits the clients are written against, and their
/// default implementations.
///
/// ## Transport Layer
/// - `HttpTransport` / `ReqwestRest`: one HTTP request, one response
/// - `WsConnector` / `TungsteniteConnector`: opens a split WebSocket handle
/// - `ReconnectPolicy`: bounded exponential backoff for session reconnection
///
/// ## Message Handling
/// - `WsCodec` / `JsonRpcCodec`: JSON-RPC 2.0 envelopes in and out
///
/// ## Authentication
/// - `Signer` / `HmacSigner`: signatures for the `client_signature` grant
///
/// # Custom transports
/// ```rust,no_run
/// use async_trait::async_trait;
/// use deribit_rpc::core::errors::DeribitError;
/// use deribit_rpc::core::kernel::{HttpRequest, HttpResponse, HttpTransport};
///
/// struct Canned;
///
/// #[async_trait]
/// impl HttpTransport for Canned {
///     async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, DeribitError> {
///         Ok(HttpResponse {
///             status: 200,
///             body: r#"{"jsonrpc":"2.0","id":1,"result":{"version":"1.2.26"}}"#.to_string(),
///         })
///     }
/// }
/// ```
pub mod codec;
pub mod rest;
pub mod signer;
pub mod ws;

pub use codec::{
    decode_inbound, decode_response, Inbound, JsonRpcCodec, JsonRpcError, JsonRpcRequest,
    RpcResult, WsCodec,
};
pub use rest::{HttpRequest, HttpResponse, HttpTransport, ReqwestRest, RestClientBuilder, RestClientConfig};
pub use signer::{HmacSigner, Signer};
pub use ws::{ReconnectPolicy, TungsteniteConnector, WsConfig, WsConnector, WsHandle, WsSink, WsSource};
