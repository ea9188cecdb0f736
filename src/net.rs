//! Networking: the intercepted request model, response bodies and the
//! transport used to reach relays and origin servers.

pub mod request;
pub mod response;
pub mod transport;

pub use request::{CredentialsMode, Destination, InterceptedRequest, OutboundRequest, RedirectPolicy, RequestMode};
pub use response::{Body, ProxyResponse, TransportResponse};
pub use transport::{HttpTransport, Transport, TransportHandle};
