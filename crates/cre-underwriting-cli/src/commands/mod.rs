pub mod time_value;
pub mod underwrite;
