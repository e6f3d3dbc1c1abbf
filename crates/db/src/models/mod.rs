pub mod indexed_file;
pub mod indexed_file_change;
pub mod indexed_pull_request;
pub mod indexed_repository;
pub mod port_branch_state;
