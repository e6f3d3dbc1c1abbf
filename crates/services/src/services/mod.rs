pub mod config;
pub mod conflicts;
pub mod forge;
pub mod history;
pub mod project;
pub mod status;
