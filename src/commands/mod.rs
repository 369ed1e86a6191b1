pub mod feed_stream;
pub mod health;
pub mod messages;
