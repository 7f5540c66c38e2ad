pub mod errors;
pub mod stream;
pub mod utils;
