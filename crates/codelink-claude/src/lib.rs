//! Codelink Claude - model event source, tool execution and the agentic
//! stream relay.
//!
//! The model is treated as a black-box event source behind [`ModelSource`];
//! [`AnthropicClient`] is the production binding over the Anthropic
//! streaming API. [`StreamRelay`] turns the event stream into client-visible
//! events and drives tool execution until the model stops requesting tools.

pub mod client;
pub mod relay;
pub mod tools;

pub use client::{
    AnthropicClient, AnthropicConfig, ModelEvent, ModelSource, PromptMessage, StreamRequest,
    ToolDefinition,
};
pub use relay::{RelayConfig, RelayEvent, StreamRelay};
pub use tools::{tool_definitions, ToolConfig, ToolExecutor};
