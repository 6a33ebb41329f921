pub mod auth;
pub mod codec;
pub mod errors;
pub mod models;
pub mod providers;
pub mod relay;
pub mod store;
pub mod tools;
