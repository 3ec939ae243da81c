//! OpenAI-compatible HTTP gateway for the akash chat service.
//!
//! `POST /v1/chat/completions` relays a conversation through
//! [`chatbridge_upstream::ChatRelay`] and answers with `chat.completion.chunk`
//! server-sent events (or one `chat.completion` when `stream` is false).
//! `GET /v1/models` lists the upstream models; `GET /` and `GET /health`
//! report uptime and credential state.

pub mod bootstrap;
pub mod error;
pub mod openai;
pub mod server;

pub use bootstrap::build_relay;
pub use error::GatewayError;
pub use server::GatewayServer;
