pub mod attendance;
pub mod catalog;
pub mod complaints;
pub mod core;
pub mod dashboard;
pub mod feedback;
pub mod fees;
pub mod library;
pub mod marks;
pub mod notices;
pub mod notifications;
pub mod setup;
pub mod timetable;
