pub mod aggregate;
pub mod rows;
pub mod source;
