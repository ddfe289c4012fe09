//! HTTP front end for the gateway.

mod handlers;
mod server;

pub use server::{router, HttpServer};
