pub mod audit;
pub mod auth;
pub mod core;
pub mod departments;
pub mod grades;
pub mod reports;
pub mod sections;
pub mod setup;
pub mod students;
pub mod subjects;
