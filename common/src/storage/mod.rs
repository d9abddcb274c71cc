pub mod db;
pub mod session_memory;
pub mod types;
