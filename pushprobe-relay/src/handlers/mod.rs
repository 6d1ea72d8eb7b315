pub mod devices;
pub mod messages;
pub mod test_runs;
pub mod users;
