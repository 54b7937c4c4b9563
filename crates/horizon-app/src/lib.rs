//! # horizon-app - Streaming Specializations
//!
//! Configuration loading and the three backend features built on
//! [`horizon_stream::ConnectionController`].
//!
//! ## Public API
//!
//! ### Configuration (`config`)
//! - [`Settings`] - `config.toml` contents with defaults for every field
//! - [`load_settings()`] / [`init_config_dir()`] / [`save_settings()`]
//!
//! ### Features
//! - [`ChatSession`] - AI assistant conversation over a streamed reply
//! - [`TagFeed`] - Live tag directory for a tenant
//! - [`ContextSearch`] - Notes related to the current screen text
//!
//! ### Composition (`services`)
//! - [`HorizonServices`] - Builds every feature and forwards lifecycle notifications

pub mod chat;
pub mod config;
pub mod context_search;
pub mod services;
pub mod tags;

pub use chat::{
    ChatHandler, ChatMessage, ChatRequest, ChatResponse, ChatSession, ChatView, MessageMetadata,
    OutboundContext,
};
pub use config::{
    config_dir, init_config_dir, load_default_settings, load_settings, save_settings,
    ConnectionSettings, HeartbeatMode, Settings,
};
pub use context_search::{
    ContextSearch, ContextSearchRequest, ContextSearchResponse, Note, SearchMethod, SearchReply,
    SearchView,
};
pub use services::HorizonServices;
pub use tags::{Tag, TagEvent, TagFeed, TagUpdate, TagView};
