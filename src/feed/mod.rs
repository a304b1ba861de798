//! Live update client: wire codec, subscription bookkeeping, the connection
//! task and the projection of events onto portfolio state.

pub mod codec;
pub mod manager;
pub mod projector;
pub mod state;
pub mod subscription;

pub use codec::{ClientMessage, Decoded, ServerEvent};
pub use manager::{feed_url, FeedClient, FeedHandle};
pub use projector::PortfolioState;
pub use state::{Backoff, ConnectionEvent, ConnectionState};
pub use subscription::{Subscription, SubscriptionRegistry};
