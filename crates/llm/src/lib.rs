//! Text generation for AI workflow steps.
//!
//! The workflow engine depends only on [`TextGenerator`]. Concrete
//! providers plug in behind it; [`CachedGenerator`] adds an injectable
//! [`ResponseCache`] in front of any of them.

pub mod cache;
pub mod generators;
pub mod provider;

pub use cache::{cache_key, LruResponseCache, ResponseCache};
pub use generators::{CachedGenerator, StaticGenerator};
pub use provider::{LlmError, TextGenerator};
