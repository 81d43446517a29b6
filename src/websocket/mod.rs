pub mod handler;
pub mod msg_subscribe_handler;
pub mod msg_ping_handler;
pub mod msg_broadcast_handler;
