pub mod generator;
pub mod image;
pub mod orchestrator;
pub mod poller;
pub mod retriever;
pub mod retry;
pub mod submission;
