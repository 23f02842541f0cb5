pub mod config;
pub mod geolocation;
pub mod locale;
pub mod rate_limit;
pub mod redirect;
pub mod resolver;
pub mod retry;
pub mod server;
