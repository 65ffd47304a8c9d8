pub mod core;
pub mod exchanges;

pub use core::{config::DeribitConfig, errors::DeribitError};
pub use exchanges::deribit::{
    AuthSession, Credentials, DeribitBuilder, DeribitRest, DeribitWsClient, Scope, SessionConfig,
    SessionState, WsMessage,
};
