pub mod analysis;
pub mod contract;
pub mod daily;
pub mod insights;
pub mod record;
