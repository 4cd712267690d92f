pub mod async_task;
pub mod time;

#[cfg(test)]
mod utils_test;
