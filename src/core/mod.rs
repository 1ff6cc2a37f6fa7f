// Core module - Sessions, printer state and the interactive command console
pub mod assist;
pub mod communication;
pub mod console;
pub mod controls;
pub mod history;
pub mod jobs;
pub mod pipeline;
pub mod printer;
pub mod session;
