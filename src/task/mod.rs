mod book;
mod executor;

pub use book::{Task, TaskStatus};
pub use executor::{Executor, TaskBody, panic_message};
