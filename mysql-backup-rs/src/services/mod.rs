pub mod archive;
pub mod backup;
pub mod command;
pub mod restore;
pub mod run_lock;
pub mod scheduler;
