pub mod memory_directory;
pub mod memory_signaling;

pub use memory_directory::MemorySessionDirectory;
pub use memory_signaling::MemorySignaling;
