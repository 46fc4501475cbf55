//! Shared primitives for provider adapters: the error taxonomy adapters
//! raise, the OAuth token concurrency primitive, the retry/backoff policy,
//! the HTTP transport trait, and the adapter interface itself. Concrete
//! adapters live in `gproxy-provider-impl`.

pub mod credential;
pub mod errors;
pub mod http;
pub mod provider;
pub mod retry;

pub use credential::{ApiKeyCredential, TokenCell, TokenState};
pub use errors::{ProviderError, ProviderResult, TransportErrorKind, UpstreamFailure};
pub use http::{ByteStream, HttpMethod, UpstreamClient, UpstreamHttpRequest, UpstreamHttpResponse};
pub use provider::UpstreamProvider;
pub use retry::{retry_with_backoff, retry_with_backoff_params, REQUEST_BASE_DELAY, REQUEST_MAX_RETRIES};
