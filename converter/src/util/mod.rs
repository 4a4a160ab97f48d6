pub mod filename;
pub mod logging;
pub mod time;
