pub mod error;
pub mod mailchimp;
