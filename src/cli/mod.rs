pub mod refresh;
pub mod serve;
pub mod setup;
pub mod status;
pub mod ui;
