// Widgets module - Panels drawn by the console front end
pub mod console;
pub mod help;
pub mod jobs;
pub mod sessions;
pub mod status;
