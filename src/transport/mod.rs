//! Wire transports for the agent connection.

mod ws;

pub use ws::WsTransport;
