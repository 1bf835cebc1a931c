pub mod canopen;
pub mod config;
pub mod drive;
pub mod messages;
pub mod runtime;
pub mod session;
pub mod transport;
pub mod worker;
