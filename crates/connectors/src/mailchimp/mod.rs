pub mod batch;
pub mod client;
pub mod endpoint;
pub mod schema;

pub use client::{ClientSettings, MailChimpClient, Page};
pub use endpoint::Endpoint;
