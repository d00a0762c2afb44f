pub mod async_task;

pub mod file_io;

pub mod net;

pub mod poll;

pub mod time;

#[cfg(test)]
mod poll_test;
