pub mod batch;
pub mod catalog;
pub mod job;
pub mod rotation;
pub mod status;
