pub mod bcdboot;
pub mod config;
pub mod deploy;
pub mod disk;
pub mod dism_exe;
pub mod dismapi;
pub mod error;
pub mod firmware;
pub mod host;
pub mod image;
pub mod installer;
pub mod parameters;
pub mod process;
pub mod worker;
#[cfg(windows)]
pub mod wmi;
