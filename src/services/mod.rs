pub mod id_allocator;
pub mod retention;
pub mod storage_service;
pub mod sweeper;
