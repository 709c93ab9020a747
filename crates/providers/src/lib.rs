//! Vendor stream adapters for Overture.
//!
//! Both adapters implement `overture_core::ChatProvider` and normalize their
//! vendor's streaming wire format into the internal `ChatEvent` union, so
//! nothing downstream ever branches on which vendor answered. The factory
//! picks an adapter from the per-turn connection info.

pub mod anthropic;
pub mod factory;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use factory::DefaultProviderFactory;
pub use openai::OpenAiProvider;
