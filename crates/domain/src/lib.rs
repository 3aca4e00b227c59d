pub mod credentials;
pub mod kv;
pub mod lock;
pub mod message_state;
pub mod ports;
pub mod reply;
pub mod util;
