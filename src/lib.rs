// Tour search client: starts a remote search, polls it under the server's
// retry-after protocol and keeps one active search per orchestrator

pub mod api;
pub mod controller;
pub mod error;
pub mod mock_server;
pub mod normalize;
pub mod orchestrator;
pub mod poll;
pub mod stats;
pub mod types;
pub mod wait;

// Re-export key types for convenience
pub use api::{ApiError, ClientConfig, ClientError, HttpSearchApi, RetryConfig, SearchApi};
pub use controller::{CancellationController, SearchTicket};
pub use error::SearchError;
pub use normalize::normalize;
pub use orchestrator::{SearchEvent, SearchOrchestrator, SearchOutcome, SearchStatus};
pub use poll::{poll_prices, PollOutcome};
pub use types::{NormalizedResult, PriceMap, RawPrice, SearchToken, Tour, TourPrice};
pub use wait::{wait_until, WaitOutcome};
