//! # droidpilot Core
//!
//! Domain types, traits, and error definitions for the droidpilot phone
//! automation agent. This crate defines the domain model that all other
//! crates implement against.
//!
//! Every collaborator the agent loop talks to (model provider, device
//! bridge, action executor, action decoder) is a trait here, so tests and
//! alternative backends can be swapped in freely.

pub mod action;
pub mod device;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use action::{Action, ActionDecoder, CommandDecoder, Point, StructuredAction, parse_action};
pub use device::{ActionExecutor, DeviceBridge, ExecutionOutcome, Screenshot};
pub use error::{ActionError, DeviceError, Error, ProviderError, Result};
pub use event::{AgentEvent, EventBus};
pub use message::{Conversation, ConversationId, ImageAttachment, Message, Role};
pub use provider::{ChunkReceiver, Provider, ProviderRequest, StreamChunk, Usage};
