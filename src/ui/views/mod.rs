pub mod jobs;
pub mod readings;
pub mod sensors;
