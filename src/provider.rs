//! Sources of method definitions.
//!
//! A provider is asked for the complete method list once when the gateway is
//! built and again on every sync tick. Concrete back-ends (database tables,
//! key/value hashes) live with the host; this module ships a static list, a
//! closure adapter and, with the `json` feature, a JSON file reader.

use crate::error::ProviderError;
use crate::method::MethodOption;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;

/// Supplies the current method list.
#[async_trait]
pub trait MethodProvider: Send + Sync {
    /// Load every method definition. A failure leaves the registry untouched.
    async fn load(&self) -> Result<Vec<MethodOption>, ProviderError>;
}

/// Fixed list, returned as-is on every load.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    options: Vec<MethodOption>,
}

impl StaticProvider {
    pub fn new(options: Vec<MethodOption>) -> Self {
        Self { options }
    }
}

#[async_trait]
impl MethodProvider for StaticProvider {
    async fn load(&self) -> Result<Vec<MethodOption>, ProviderError> {
        Ok(self.options.clone())
    }
}

/// Provider backed by an async closure.
#[derive(Clone)]
pub struct FnProvider<F> {
    f: F,
}

impl<F> fmt::Debug for FnProvider<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProvider").finish_non_exhaustive()
    }
}

/// Wrap `f` as a [`MethodProvider`].
///
/// ```rust
/// use gatehouse::provider::{from_fn, MethodProvider};
/// use gatehouse::MethodOption;
///
/// # futures::executor::block_on(async {
/// let provider = from_fn(|| async { Ok(vec![MethodOption::new("ping", "/ping")]) });
/// assert_eq!(provider.load().await.unwrap().len(), 1);
/// # });
/// ```
pub fn from_fn<F, Fut>(f: F) -> FnProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<MethodOption>, ProviderError>> + Send,
{
    FnProvider { f }
}

#[async_trait]
impl<F, Fut> MethodProvider for FnProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<MethodOption>, ProviderError>> + Send,
{
    async fn load(&self) -> Result<Vec<MethodOption>, ProviderError> {
        (self.f)().await
    }
}

#[cfg(feature = "json")]
pub use json_file::JsonFileProvider;

#[cfg(feature = "json")]
mod json_file {
    use super::{MethodOption, MethodProvider, ProviderError};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};

    /// Reads a JSON array of method options from a file on every load.
    ///
    /// ```json
    /// [{"name": "catalog", "path": "/catalog", "second_limit": 100, "cache_seconds": 5}]
    /// ```
    #[derive(Debug, Clone)]
    pub struct JsonFileProvider {
        path: PathBuf,
    }

    impl JsonFileProvider {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    #[async_trait]
    impl MethodProvider for JsonFileProvider {
        async fn load(&self) -> Result<Vec<MethodOption>, ProviderError> {
            let raw = tokio::fs::read(&self.path).await?;
            Ok(serde_json::from_slice(&raw)?)
        }
    }
}
