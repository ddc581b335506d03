pub mod channels;
pub mod connections;
pub mod gateway;
pub mod logging;
pub mod message_log;
pub mod presence;
pub mod protocol;
pub mod routing;
pub mod server;
