//! Upstream side of the chatbridge gateway.
//!
//! [`ChatRelay`] opens a chat against the upstream service using the session
//! managed by `chatbridge-auth`, and [`chat_events`] reconciles the upstream's
//! line protocol into an ordered stream of [`ChatEvent`]s. Image generation
//! jobs announced mid-stream are resolved by an [`ImageJobPoller`].

mod client;
mod engine;
mod error;
mod frame;
mod image;
mod reconcile;
mod relay;
mod types;

pub use client::{ImageStatus, UpstreamClient};
pub use engine::{chat_events, StreamContext};
pub use error::{FrameParseError, ImageJobError, RelayError, UpstreamError};
pub use frame::{lines, parse_line, LineDecoder, UpstreamFrame};
pub use image::{
    FsImageStore, HostedImageStore, ImageJob, ImageJobPoller, ImagePoller, ImageRef, ImageStore,
    PollSettings, IMAGE_MARKER,
};
pub use reconcile::{Reconciler, DEFAULT_MIN_SUFFIX_MATCH};
pub use relay::{ChatDefaults, ChatRelay, ChatRequest, ChatStream};
pub use types::{ChatEvent, ChatMessage, ChatSession, FinishReason, UpstreamChatRequest};
