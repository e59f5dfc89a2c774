//! The `AlertChannel` contract and its concrete notification backends.
//!
//! Grounded on `dwctl::webhooks::dispatcher::WebhookDispatcher` (claim → send
//! → record-result pattern dispatched across independent sender
//! implementations) and `fusillade::http::HttpClient` for the trait shape.

pub mod email;
pub mod slack;
pub mod telegram;
pub mod webhook;

use async_trait::async_trait;

use crate::violation::Violation;

/// A notification sink. `send` never propagates transport errors to the
/// pipeline: failures are logged and counted, but one channel's outage must
/// not stop fan-out to the others.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Deliver a violation notification. Returns whether delivery succeeded.
    async fn send(&self, violation: &Violation) -> bool;

    /// Channel identity used in logs and delivery-failure accounting.
    fn name(&self) -> &str;
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::AlertChannel;
    use crate::violation::Violation;

    /// A channel double that records how many times it was invoked and can
    /// be configured to always fail, mirroring fusillade's `MockHttpClient`.
    pub struct RecordingChannel {
        pub name: String,
        pub should_fail: bool,
        pub call_count: AtomicUsize,
    }

    impl RecordingChannel {
        pub fn new(name: &str, should_fail: bool) -> Self {
            Self {
                name: name.to_string(),
                should_fail,
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.call_count.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl AlertChannel for RecordingChannel {
        async fn send(&self, _violation: &Violation) -> bool {
            self.call_count.fetch_add(1, Ordering::Relaxed);
            !self.should_fail
        }

        fn name(&self) -> &str {
            &self.name
        }
    }
}
