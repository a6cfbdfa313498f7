pub mod serve;
pub mod worker;

// Re-export command functions for convenience
pub use load_test::{load_test, LoadTestParams};
pub use serve::{dispatch_server, resolve_config, ServeParams};
pub use worker::{stub_worker, WorkerParams};
