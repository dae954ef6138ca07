//! RIGOL DG10xx function generator, used to drive the speaker under test.

use crate::adapters::{HardwareAdapter, VisaAdapter};
use crate::error::{AppResult, ScanError};
use crate::instrument::discovery;
use std::time::Duration;
use tracing::info;

/// Identity substring used to pick the generator among USB instruments.
pub const IDENTITY_FILTER: &str = "RIGOL";

pub const MAX_FREQUENCY_HZ: f64 = 20_000_000.0;
pub const MAX_AMPLITUDE_V: f64 = 20.0;
pub const MAX_OFFSET_V: f64 = 10.0;

pub struct SignalGenerator {
    adapter: Box<dyn HardwareAdapter>,
    identity: String,
}

impl SignalGenerator {
    /// Open the configured resource or find the generator on the USB bus.
    pub async fn open(resource: Option<&str>, timeout: Duration) -> AppResult<Self> {
        let resource = match resource {
            Some(r) => r.to_string(),
            None => discovery::find_instrument(Some(IDENTITY_FILTER), timeout).await?,
        };
        Self::connect(Box::new(VisaAdapter::new(resource).with_timeout(timeout))).await
    }

    pub async fn connect(mut adapter: Box<dyn HardwareAdapter>) -> AppResult<Self> {
        adapter.connect().await?;
        let identity = adapter.query("*IDN?").await?.trim().to_string();
        info!(identity = %identity, "Using signal generator");
        Ok(Self { adapter, identity })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Output a sine. Frequency 0 to 20 MHz, amplitude 0 to 20 V, offset -10 to 10 V.
    pub async fn set_frequency(&mut self, frequency: f64, amplitude: f64, offset: f64) -> AppResult<()> {
        if !(0.0..=MAX_FREQUENCY_HZ).contains(&frequency) {
            return Err(ScanError::Configuration(format!(
                "frequency {frequency} Hz outside 0..={MAX_FREQUENCY_HZ}"
            )));
        }
        if !(0.0..=MAX_AMPLITUDE_V).contains(&amplitude) {
            return Err(ScanError::Configuration(format!(
                "amplitude {amplitude} V outside 0..={MAX_AMPLITUDE_V}"
            )));
        }
        if !(-MAX_OFFSET_V..=MAX_OFFSET_V).contains(&offset) {
            return Err(ScanError::Configuration(format!(
                "offset {offset} V outside -{MAX_OFFSET_V}..={MAX_OFFSET_V}"
            )));
        }
        let command = format!("APPLy:SINusoid {frequency},{amplitude},{offset}");
        self.adapter.send(&command).await?;
        info!(frequency, amplitude, offset, "Signal generator output set");
        Ok(())
    }

    pub async fn disconnect(&mut self) -> AppResult<()> {
        self.adapter.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;

    #[tokio::test]
    async fn sine_command_and_limits() {
        let adapter = MockAdapter::new().with_reply("*IDN?", "RIGOL TECHNOLOGIES,DG1022\n");
        let handle = adapter.handle();
        let mut generator = SignalGenerator::connect(Box::new(adapter)).await.unwrap();
        assert_eq!(generator.identity(), "RIGOL TECHNOLOGIES,DG1022");

        generator.set_frequency(2000.0, 20.0, 0.0).await.unwrap();
        generator.set_frequency(1.5e6, 2.5, -1.0).await.unwrap();
        assert!(generator.set_frequency(2.1e7, 1.0, 0.0).await.is_err());
        assert!(generator.set_frequency(1000.0, 25.0, 0.0).await.is_err());
        assert!(generator.set_frequency(1000.0, 1.0, 10.5).await.is_err());

        let sent: Vec<String> = handle
            .transcript()
            .into_iter()
            .filter(|c| c.starts_with("APPLy"))
            .collect();
        assert_eq!(
            sent,
            vec!["APPLy:SINusoid 2000,20,0", "APPLy:SINusoid 1500000,2.5,-1"]
        );
    }
}
