pub mod gateway;

pub use gateway::MemoryGateway;
