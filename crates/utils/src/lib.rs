pub mod assets;
pub mod shell;
pub mod status_msg;
pub mod text;
