pub mod deadline;
pub mod event;
pub mod models;
