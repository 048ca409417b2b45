pub(crate) mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod gate;
pub mod observability;
pub mod relay;
pub mod routing;
pub mod state;
pub mod stream;
pub mod transport;

mod util;
