pub mod common;
pub mod complaints;
pub mod timeline;
pub mod watch;
