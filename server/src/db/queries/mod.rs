pub mod directory;
pub mod messages;
pub mod notifications;
