//! Exchange integration: the REST client (C3), the streaming client
//! (C4), and the fallback composite (C5) that prefers the stream and
//! degrades to REST.

pub mod fallback;
pub mod rest;
pub mod stream;

pub use fallback::{FallbackExchange, FallbackReason};
pub use rest::RestClient;
pub use stream::{ConnectionState, StreamClient};
