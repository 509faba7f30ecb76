pub mod generator;
pub mod job_store;
pub mod queue;
pub mod storage;
pub mod submission;
pub mod worker;
