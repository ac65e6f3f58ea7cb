pub mod fetch;
pub mod manifest;
pub mod notifier;
pub mod processor;
pub mod queue;
pub mod runner;
pub mod storage;
pub mod store;
pub mod transformer;
