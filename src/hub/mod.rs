pub mod fanout;
pub mod liveness;
pub mod registry;

pub use registry::{fingerprint, SocketHandle, Subscription, SubscriptionRegistry};
