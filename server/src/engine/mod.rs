pub mod calls;
pub mod channel;
pub mod events;
pub mod hub;
pub mod notify;
pub mod private_chats;
pub mod registry;
pub mod relay;
pub mod signaling;
pub mod timestamps;
pub mod user_session;
pub mod validation;
