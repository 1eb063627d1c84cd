pub mod credit;
pub mod handler;
pub mod models;
pub mod role;
pub mod user;
