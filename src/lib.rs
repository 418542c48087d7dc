pub mod auth;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
pub mod transfer;

pub use auth::{AccountStore, FileAccountStore, MemoryAccountStore};
pub use config::ServerConfig;
pub use error::ChatServerError;
pub use server::{Server, ShutdownHandle};
