pub mod scope;
pub mod connection;
pub mod registry;
pub mod router;
pub mod event;
pub mod hub;
pub mod session;
pub mod userctx;
