pub mod authz;
pub mod connection;
pub mod error;
pub mod oracle;
pub mod registry;
pub mod room;
pub mod router;

pub use authz::{AuthorizationGateway, FriendshipOracle, FriendshipVerdict};
pub use error::RelayError;
pub use registry::{ConnectionHandle, Outbound, SessionRegistry};
pub use router::{ConnectionContext, RoutingEngine};
