// File mutation subsystem and the read-only project scanners

pub mod analyze_project;
pub mod backup;
pub mod command;
pub mod file_manager;
pub mod git;
pub mod history;
pub mod path_guard;
pub mod read_files;
pub mod test_code;
