pub mod assembler;
pub mod collaborators;
pub mod gateway;
pub mod ingress;
pub mod job_store;
pub mod pipeline;
pub mod storage;
pub mod sweeper;
