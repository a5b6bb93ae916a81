//! AI provider integration.
//!
//! [`AiProvider`] is the seam between review orchestration and model
//! backends. Concrete providers live in [`providers`]; [`ProviderRegistry`]
//! builds them from settings and resolves them by id.
//!
//! ```ignore
//! use review_forge::llm::{ProviderRegistry, ProviderSettings};
//!
//! let registry = ProviderRegistry::from_settings(
//!     &[
//!         ProviderSettings::openai(std::env::var("OPENAI_API_KEY").ok()),
//!         ProviderSettings::anthropic(std::env::var("ANTHROPIC_API_KEY").ok()),
//!     ],
//!     "openai",
//! )?;
//! let provider = registry.default_provider();
//! ```

pub mod provider;
pub mod providers;
pub mod registry;

pub use provider::AiProvider;
pub use providers::{AnthropicProvider, HttpRetry, OpenAiCompatibleProvider};
pub use registry::{ProviderKind, ProviderRegistry, ProviderSettings};
