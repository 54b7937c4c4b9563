//! Constella Horizon
//!
//! Resilient streaming connections for the Horizon desktop assistant: AI
//! chat, live tag updates and context search over long-lived WebSockets that
//! survive network flaps and app backgrounding.

pub use horizon_app::{
    chat, config, context_search, services, tags, ChatSession, ContextSearch, HorizonServices,
    SearchMethod, Settings, TagFeed,
};
pub use horizon_core::{
    logging, ConnectionReport, ConnectionState, Error, Result, ResultExt,
};
pub use horizon_stream::{
    BackgroundExecution, ConnectionController, Connector, Frame, HeartbeatStyle, LifecycleHook,
    Socket, StreamConfig, StreamHandler, WsConnector,
};

/// Common imports for applications embedding Horizon.
pub mod prelude {
    pub use horizon_app::{ChatSession, ContextSearch, HorizonServices, Settings, TagFeed};
    pub use horizon_core::prelude::*;
    pub use horizon_stream::{LifecycleHook, WsConnector};
}
