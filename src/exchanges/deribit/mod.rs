pub mod auth;
pub mod builder;
pub mod heartbeat;
pub mod rest;
pub mod rpc;
pub mod session;
pub mod subscriptions;
pub mod types;

// Re-export main types for easier importing
pub use auth::{AuthMethod, AuthSession, AuthTokens, Credentials};
pub use builder::DeribitBuilder;
pub use heartbeat::HeartbeatResponder;
pub use rest::DeribitRest;
pub use rpc::{PendingRequests, RequestIds, RpcNotifier, RpcRequester};
pub use session::{DeribitWsClient, SessionConfig};
pub use subscriptions::SubscriptionRegistry;
pub use types::{
    AuthParams, AuthResult, GrantType, HeartbeatType, Scope, SessionState, WsMessage,
    UNAUTHORIZED_CODE,
};
