pub mod media_token;
pub mod token;
