pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod pagination;
pub mod query;
pub mod request;
pub mod retry;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use cache::{CacheConfig, QueryCache};
pub use config::{ConfigError, GatewayConfig};
pub use error::{ApiError, ErrorBody, ErrorKind, TransportCode};
pub use gateway::{DrainState, Gateway};
pub use models::{
    JobDomain, Language, SortOrder, VacancyDetails, VacancySearchParams, VacancySearchResponse,
    VacancySearchResult,
};
pub use pagination::{FetchOutcome, InfiniteSnapshot, InfiniteVacancies};
pub use query::VacancyClient;
pub use request::{Method, PreparedRequest, RawResponse, RequestDescriptor};
pub use retry::RetryPolicy;
pub use traits::{CredentialStore, MemoryCredentialStore, Transport, VacancySearch};
