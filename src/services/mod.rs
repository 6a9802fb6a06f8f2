pub mod moderation;
pub mod retention;
