pub mod channels;
pub mod gateway;
pub mod health;
pub mod messages;
pub mod presence;
pub mod sync;
pub mod websocket;
