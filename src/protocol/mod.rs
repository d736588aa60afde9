pub mod messages;
pub mod session;
pub mod transport;

pub use messages::{Envelope, MessageType};
pub use session::{PeerSession, SessionConfig};
pub use transport::{HubEndpoint, HubTransport, Transport};
