//! FFT acquisition through a bench oscilloscope.
//!
//! The scope's MATH channel computes an FFT of CH1; every capture reads the
//! requested bin window back as ASCII. The command set is the Tektronix
//! MDO3000/4000 one. MATH must be switched on at the front panel, otherwise
//! `CURVE?` times out.

use crate::adapters::{HardwareAdapter, VisaAdapter};
use crate::config::AcquisitionSettings;
use crate::error::{AppResult, ScanError};
use crate::instrument::capabilities::{Acquisition, SampleRange};
use crate::instrument::discovery;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Bin geometry of the MATH FFT, as reported by the instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyAxis {
    /// Hz per bin
    pub bin_width: f64,
}

impl FrequencyAxis {
    pub fn new(bin_width: f64) -> AppResult<Self> {
        if !(bin_width > 0.0) || !bin_width.is_finite() {
            return Err(ScanError::Instrument(format!(
                "instrument reported bin width {bin_width}"
            )));
        }
        Ok(Self { bin_width })
    }

    /// Smallest bin window covering `[low, high]` Hz.
    pub fn frequency_to_bins(&self, low: f64, high: f64) -> AppResult<SampleRange> {
        if low < 0.0 || high < low {
            return Err(ScanError::Configuration(format!(
                "frequency range {low}..{high} Hz is invalid"
            )));
        }
        let start = (low / self.bin_width).floor() as usize;
        let end = ((high / self.bin_width).ceil() as usize).max(start + 1);
        SampleRange::new(start, end)
    }

    pub fn bins_to_frequency(&self, range: &SampleRange) -> (f64, f64) {
        (
            range.start as f64 * self.bin_width,
            range.end as f64 * self.bin_width,
        )
    }
}

/// Parse a `CURVE?` reply. Anything non-numeric is a corrupt sample.
pub fn parse_curve(reply: &str) -> AppResult<Vec<f64>> {
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(ScanError::CorruptSample("empty CURVE? reply".into()));
    }
    reply
        .split(',')
        .map(|field| {
            field.trim().parse::<f64>().map_err(|_| {
                ScanError::CorruptSample(format!("non-numeric value '{}'", field.trim()))
            })
        })
        .collect()
}

pub struct Oscilloscope {
    adapter: Mutex<Box<dyn HardwareAdapter>>,
    identity: String,
    sentinel: f64,
}

impl Oscilloscope {
    /// Open the configured resource, or the first USB instrument on the bus.
    pub async fn open(settings: &AcquisitionSettings) -> AppResult<Self> {
        let resource = match &settings.resource {
            Some(resource) => resource.clone(),
            None => {
                discovery::find_instrument(settings.identity_filter.as_deref(), settings.timeout)
                    .await?
            }
        };
        let adapter = VisaAdapter::new(resource).with_timeout(settings.timeout);
        Self::connect(Box::new(adapter), settings.sentinel).await
    }

    pub async fn connect(mut adapter: Box<dyn HardwareAdapter>, sentinel: f64) -> AppResult<Self> {
        adapter.connect().await?;
        let identity = adapter.query("*IDN?").await?;
        info!(identity = %identity.trim(), "Using oscilloscope");
        Ok(Self {
            adapter: Mutex::new(adapter),
            identity: identity.trim().to_string(),
            sentinel,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    async fn write(&self, command: &str) -> AppResult<()> {
        self.adapter.lock().await.send(command).await
    }

    async fn query(&self, command: &str) -> AppResult<String> {
        self.adapter.lock().await.query(command).await
    }

    /// Point the data source at the MATH FFT and select the bin window.
    /// `DATa:STOP` is inclusive, so it names the last bin of the range.
    pub async fn setup_capture(&self, range: &SampleRange) -> AppResult<()> {
        for command in [
            "MATH:DEFINE \"FFT(CH1)\"".to_string(),
            ":DATa:SOUrce MATH".to_string(),
            format!(":DATa:STARt {}", range.start),
            format!(":DATa:STOP {}", range.end.saturating_sub(1)),
            ":WFMOutpre:ENCdg ASCii".to_string(),
            ":HEADer 0".to_string(),
            ":VERBose 0".to_string(),
        ] {
            self.write(&command).await?;
        }
        debug!(start = range.start, end = range.end, "Oscilloscope capture configured");
        Ok(())
    }

    /// Query the FFT's horizontal units and scale. Units must be Hz.
    pub async fn frequency_axis(&self) -> AppResult<FrequencyAxis> {
        let units = self.query("MATH:HORizontal:UNIts?").await?;
        let units = units.trim().trim_matches('"').trim();
        if !units.eq_ignore_ascii_case("hz") {
            return Err(ScanError::UnsupportedUnits(units.to_string()));
        }
        let scale = self.query("MATH:HORizontal:SCAle?").await?;
        let bin_width = scale.trim().parse::<f64>().map_err(|_| {
            ScanError::Instrument(format!("unparsable horizontal scale '{}'", scale.trim()))
        })?;
        FrequencyAxis::new(bin_width)
    }

    pub async fn frequency_to_bins(&self, low: f64, high: f64) -> AppResult<SampleRange> {
        self.frequency_axis().await?.frequency_to_bins(low, high)
    }

    pub async fn bins_to_frequency(&self, range: &SampleRange) -> AppResult<(f64, f64)> {
        Ok(self.frequency_axis().await?.bins_to_frequency(range))
    }
}

#[async_trait]
impl Acquisition for Oscilloscope {
    fn name(&self) -> &str {
        "oscilloscope"
    }

    /// Live check: the handle must be open and answer `*OPC?`.
    async fn online(&self) -> bool {
        let mut adapter = self.adapter.lock().await;
        if !adapter.is_connected() {
            return false;
        }
        match adapter.query("*OPC?").await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Oscilloscope did not answer *OPC?");
                false
            }
        }
    }

    fn sentinel(&self) -> f64 {
        self.sentinel
    }

    async fn prepare(&self, range: &SampleRange) -> AppResult<()> {
        self.setup_capture(range).await
    }

    async fn fetch_capture(&self, _range: &SampleRange) -> AppResult<Vec<f64>> {
        let reply = self.query("CURVE?").await?;
        parse_curve(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use std::time::Duration;

    #[test]
    fn curve_parsing() {
        assert_eq!(parse_curve("1.5,2,-3e-2\n").unwrap(), vec![1.5, 2.0, -0.03]);
        assert!(matches!(parse_curve("1.5,,2"), Err(ScanError::CorruptSample(_))));
        assert!(matches!(parse_curve(""), Err(ScanError::CorruptSample(_))));
    }

    #[test]
    fn frequency_bin_conversion() {
        let axis = FrequencyAxis::new(10.0).unwrap();
        let range = axis.frequency_to_bins(995.0, 2001.0).unwrap();
        assert_eq!(range, SampleRange { start: 99, end: 201 });
        assert_eq!(axis.bins_to_frequency(&range), (990.0, 2010.0));
        assert!(axis.frequency_to_bins(10.0, 5.0).is_err());
        assert!(FrequencyAxis::new(0.0).is_err());
    }

    #[tokio::test]
    async fn units_other_than_hz_are_rejected() {
        let adapter = MockAdapter::new()
            .with_reply("*IDN?", "TEKTRONIX,MDO3014")
            .with_reply("MATH:HORizontal:UNIts?", "\"s\"");
        let scope = Oscilloscope::connect(Box::new(adapter), -1.0).await.unwrap();
        assert_eq!(scope.identity(), "TEKTRONIX,MDO3014");
        assert!(matches!(
            scope.frequency_axis().await,
            Err(ScanError::UnsupportedUnits(u)) if u == "s"
        ));
    }

    #[tokio::test]
    async fn hz_units_give_bin_width() {
        let adapter = MockAdapter::new()
            .with_reply("MATH:HORizontal:UNIts?", "\"Hz\"")
            .with_reply("MATH:HORizontal:SCAle?", "2.5E1");
        let scope = Oscilloscope::connect(Box::new(adapter), -1.0).await.unwrap();
        let range = scope.frequency_to_bins(100.0, 200.0).await.unwrap();
        assert_eq!(range, SampleRange { start: 4, end: 8 });
    }

    #[tokio::test(start_paused = true)]
    async fn record_sends_setup_then_substitutes_garbage() {
        let adapter = MockAdapter::new().with_replies("CURVE?", ["1,2,3", "1,x,3", "4,5", "7,8,9"]);
        let handle = adapter.handle();
        let scope = Oscilloscope::connect(Box::new(adapter), -1.0).await.unwrap();
        handle.clear();

        let range = SampleRange::new(10, 13).unwrap();
        let record = scope
            .record(Duration::from_secs(2), &range, Duration::from_millis(500))
            .await
            .unwrap();

        assert_eq!(record.sample_start, 10);
        assert_eq!(record.data.dim(), (4, 3));
        assert_eq!(record.data.row(0).to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(record.data.row(1).to_vec(), vec![-1.0; 3]);
        assert_eq!(record.data.row(2).to_vec(), vec![-1.0; 3]);
        assert_eq!(record.data.row(3).to_vec(), vec![7.0, 8.0, 9.0]);

        let transcript = handle.transcript();
        assert_eq!(transcript[0], "MATH:DEFINE \"FFT(CH1)\"");
        assert_eq!(transcript[2], ":DATa:STARt 10");
        // inclusive stop: bins 10, 11 and 12
        assert_eq!(transcript[3], ":DATa:STOP 12");
        assert_eq!(transcript.iter().filter(|c| *c == "CURVE?").count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn inclusive_window_reply_is_kept() {
        // STARt 100 / STOP 104 transfers five points
        let adapter = MockAdapter::new().with_reply("CURVE?", "5,6,7,8,9");
        let scope = Oscilloscope::connect(Box::new(adapter), -1.0).await.unwrap();

        let range = SampleRange::new(100, 105).unwrap();
        let record = scope
            .record(Duration::from_secs(1), &range, Duration::from_millis(250))
            .await
            .unwrap();

        assert_eq!(record.data.dim(), (4, 5));
        assert!(record.data.iter().all(|v| *v >= 5.0));
    }

    #[tokio::test]
    async fn online_queries_the_instrument() {
        let adapter = MockAdapter::new().with_reply("*OPC?", "1");
        let handle = adapter.handle();
        let scope = Oscilloscope::connect(Box::new(adapter), -1.0).await.unwrap();
        assert!(scope.online().await);

        handle.set_failing(true);
        assert!(!scope.online().await);
        handle.set_failing(false);
        assert!(scope.online().await);
        assert_eq!(handle.transcript().iter().filter(|c| *c == "*OPC?").count(), 3);
    }
}
