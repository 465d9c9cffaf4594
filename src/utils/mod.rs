pub mod command;
pub mod encoding;
pub mod logger;
pub mod path;
pub mod privilege;
