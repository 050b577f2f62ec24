pub mod auth;
pub mod dm;
pub mod error;
pub mod media;
pub mod middleware;
pub mod posts;
pub mod users;
pub mod vibes;
