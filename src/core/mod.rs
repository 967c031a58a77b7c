pub mod bus;
pub mod cancellation;
pub mod config;
pub mod connector;
pub mod error;
pub mod logger;
pub mod model;
pub mod supervisor;
pub mod trader;
