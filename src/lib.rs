pub mod commit;
pub mod config;
pub mod discovery;
pub mod encoders;
pub mod engine;
pub mod error;
pub mod inventory;
pub mod invocation;
pub mod job;
pub mod layout;
pub mod ledger;
pub mod logging;
pub mod plan;
pub mod policy;
pub mod pool;
pub mod report;
