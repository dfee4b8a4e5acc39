// OPQBot connector
// Inbound socket.io event stream and rate-limited outbound message dispatch
// for one account on an OPQ backend.

pub mod bot;
pub mod config;
pub mod logger;

pub use bot::error::{BotError, RouterError, TransportError, ValidationError};
pub use bot::pipeline::PipelineState;
pub use bot::types::{
    Content, Destination, EventMsg, EventName, FriendMessage, FriendMsg, GenericEvent,
    GroupMessage, GroupMsg, InboundEvent, Payload, PicMd5, ReplyInfo, SendKind, SendRequest,
};
pub use bot::{BotSession, SessionState};
pub use config::{BotConfig, ConfigError, ProxySettings};
