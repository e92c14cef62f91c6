mod client;
mod server;

pub use client::{PingArgs, QueryArgs};
pub use server::ServerArgs;
