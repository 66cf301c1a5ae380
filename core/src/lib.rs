pub mod collector;
pub mod error;
pub mod filter;
pub mod modifier;
pub mod query;
pub mod registry;
pub mod schema;
pub mod substrate;
pub mod subscriptions;
pub mod watch;

pub use collector::Collector;
pub use query::QueryService;
pub use registry::RegistrationService;
pub use substrate::Substrate;
pub use subscriptions::SubscriptionManager;
pub use watch::ChangeFeed;

pub use mediafabric_proto as proto;
