pub mod manager;
#[cfg(test)]
pub mod manager_test;
pub mod target;
pub mod transfer;
