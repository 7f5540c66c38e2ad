pub mod export;
pub mod fetcher;
pub mod source;
