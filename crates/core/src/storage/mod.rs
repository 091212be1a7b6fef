pub mod rebuild;
pub mod snapshot;
