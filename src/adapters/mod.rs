//! Transport adapters
//!
//! Low-level, line-oriented I/O between the device drivers in
//! [`crate::instrument`] and the physical links. Drivers only ever see the
//! [`HardwareAdapter`] trait, so every driver can be exercised against
//! [`MockAdapter`] in tests.

pub mod mock_adapter;
pub mod serial_adapter;
pub mod visa_adapter;

pub use mock_adapter::{MockAdapter, MockHandle};
pub use serial_adapter::SerialAdapter;
pub use visa_adapter::VisaAdapter;

use crate::error::AppResult;
use async_trait::async_trait;

/// Line-oriented command transport.
///
/// `send` writes one command and waits for the device acknowledgement, `query`
/// does the same and returns the reply text. Implementations append their own
/// line terminator.
#[async_trait]
pub trait HardwareAdapter: Send {
    /// Short identifier used in log fields ("serial", "visa", "mock")
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool;

    async fn connect(&mut self) -> AppResult<()>;

    async fn disconnect(&mut self) -> AppResult<()>;

    async fn send(&mut self, command: &str) -> AppResult<()>;

    async fn query(&mut self, query: &str) -> AppResult<String>;
}
