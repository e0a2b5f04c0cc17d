mod memory;

pub use memory::MemoryTransport;
