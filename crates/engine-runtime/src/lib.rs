pub mod catalog;
pub mod error;
pub mod execution;
pub mod streams;
