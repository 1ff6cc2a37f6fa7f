// Communication module - JSON-RPC framing and transport abstraction
pub mod codec;
pub mod transport;

pub use codec::{decode, encode, Frame, RequestId};
pub use transport::{parse_endpoint, Connector, FrameSink, FrameSource, Link};
