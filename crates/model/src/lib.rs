pub mod core;
pub mod messages;
pub mod pagination;
pub mod records;
