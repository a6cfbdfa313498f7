//! End-to-end tests of the dispatcher, the forwarding client and the API

pub mod api_test;
pub mod dispatch_test;
pub mod forwarding_test;
