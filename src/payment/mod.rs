pub mod code;
pub mod commands;
pub mod model;
