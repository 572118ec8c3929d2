//! Metric registry holding the exported AirGradient values.
//!
//! Every metric is registered once, with a zero value, when
//! [`AirGradientMetrics`] is constructed. The poller is the only writer;
//! the HTTP server renders the registry on each scrape.

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::debug;

use crate::config::LabelPolicy;
use crate::measurement::Measurement;

type FloatGauge = Gauge<f64, AtomicU64>;

/// A scalar sensor metric and the record field it is read from.
pub struct SensorGauge {
    pub name: &'static str,
    pub help: &'static str,
    value: fn(&Measurement) -> f64,
}

impl SensorGauge {
    /// Read this metric's value from a measurement.
    pub fn value(&self, measurement: &Measurement) -> f64 {
        (self.value)(measurement)
    }
}

/// Scalar sensor metrics, in registration order.
pub const SENSOR_GAUGES: &[SensorGauge] = &[
    SensorGauge {
        name: "airgradient_wifi_rssi_dbm",
        help: "WiFi signal strength in dBm",
        value: |m| m.wifi as f64,
    },
    SensorGauge {
        name: "airgradient_pm01_ugm3",
        help: "PM1.0 in ug/m3 (atmospheric environment)",
        value: |m| m.pm01,
    },
    SensorGauge {
        name: "airgradient_pm02_ugm3",
        help: "PM2.5 in ug/m3 (atmospheric environment)",
        value: |m| m.pm02,
    },
    SensorGauge {
        name: "airgradient_pm10_ugm3",
        help: "PM10 in ug/m3 (atmospheric environment)",
        value: |m| m.pm10,
    },
    SensorGauge {
        name: "airgradient_pm02_compensated_ugm3",
        help: "PM2.5 in ug/m3 with correction applied (from fw version 3.1.4 onwards)",
        value: |m| m.pm02_compensated,
    },
    SensorGauge {
        name: "airgradient_pm01_standard_ugm3",
        help: "PM1.0 in ug/m3 (standard particle)",
        value: |m| m.pm01_standard,
    },
    SensorGauge {
        name: "airgradient_pm02_standard_ugm3",
        help: "PM2.5 in ug/m3 (standard particle)",
        value: |m| m.pm02_standard,
    },
    SensorGauge {
        name: "airgradient_pm10_standard_ugm3",
        help: "PM10 in ug/m3 (standard particle)",
        value: |m| m.pm10_standard,
    },
    SensorGauge {
        name: "airgradient_pm003_count_pdl",
        help: "Particle count 0.3um per dL",
        value: |m| m.pm003_count,
    },
    SensorGauge {
        name: "airgradient_pm005_count_pdl",
        help: "Particle count 0.5um per dL",
        value: |m| m.pm005_count,
    },
    SensorGauge {
        name: "airgradient_pm01_count_pdl",
        help: "Particle count 1.0um per dL",
        value: |m| m.pm01_count,
    },
    SensorGauge {
        name: "airgradient_pm02_count_pdl",
        help: "Particle count 2.5um per dL",
        value: |m| m.pm02_count,
    },
    SensorGauge {
        name: "airgradient_pm50_count_pdl",
        help: "Particle count 5.0um per dL (only for indoor monitor)",
        value: |m| m.pm50_count,
    },
    SensorGauge {
        name: "airgradient_pm10_count_pdl",
        help: "Particle count 10um per dL (only for indoor monitor)",
        value: |m| m.pm10_count,
    },
    SensorGauge {
        name: "airgradient_co2_ppm",
        help: "CO2 in ppm",
        value: |m| m.rco2,
    },
    SensorGauge {
        name: "airgradient_temperature_celsius",
        help: "Temperature in Degrees Celsius",
        value: |m| m.atmp,
    },
    SensorGauge {
        name: "airgradient_temperature_compensated_celsius",
        help: "Temperature in Degrees Celsius with correction applied",
        value: |m| m.atmp_compensated,
    },
    SensorGauge {
        name: "airgradient_humidity_percent",
        help: "Relative Humidity",
        value: |m| m.rhum,
    },
    SensorGauge {
        name: "airgradient_humidity_compensated_percent",
        help: "Relative Humidity with correction applied",
        value: |m| m.rhum_compensated,
    },
    SensorGauge {
        name: "airgradient_tvoc_index",
        help: "Sensirion VOC Index",
        value: |m| m.tvoc_index,
    },
    SensorGauge {
        name: "airgradient_tvoc_raw",
        help: "VOC raw value",
        value: |m| m.tvoc_raw,
    },
    SensorGauge {
        name: "airgradient_nox_index",
        help: "Sensirion NOx Index",
        value: |m| m.nox_index as f64,
    },
    SensorGauge {
        name: "airgradient_nox_raw",
        help: "NOx raw value",
        value: |m| m.nox_raw,
    },
    SensorGauge {
        name: "airgradient_boots",
        help: "Counts every measurement cycle. Low boot counts indicate restarts",
        value: |m| m.boot_count as f64,
    },
];

/// Labels of the `airgradient_info` metric.
#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DeviceInfoLabels {
    pub serial_number: String,
    pub firmware: String,
    pub model: String,
}

impl DeviceInfoLabels {
    fn from_measurement(m: &Measurement) -> Self {
        Self {
            serial_number: m.serial_no.clone(),
            firmware: m.firmware.clone(),
            model: m.model.clone(),
        }
    }
}

/// Labels of the `airgradient_led_mode_info` metric.
#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct LedModeLabels {
    pub led_mode: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PollResultLabels {
    result: String,
}

/// Outcome of a single poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    Success,
    FetchError,
    DecodeError,
}

impl PollResult {
    /// Label value used on the polls counter.
    pub fn as_str(&self) -> &'static str {
        match self {
            PollResult::Success => "success",
            PollResult::FetchError => "fetch_error",
            PollResult::DecodeError => "decode_error",
        }
    }

    fn labels(&self) -> PollResultLabels {
        PollResultLabels {
            result: self.as_str().to_string(),
        }
    }
}

/// Exporter statistics.
#[derive(Debug, Clone, Default)]
pub struct PollStats {
    /// Polls that updated the registry.
    pub successes: u64,
    /// Polls that failed to reach the device.
    pub fetch_errors: u64,
    /// Polls whose response could not be decoded.
    pub decode_errors: u64,
    /// Failures since the last success.
    pub consecutive_failures: i64,
}

/// The exporter's metric registry.
pub struct AirGradientMetrics {
    registry: Registry,
    sensors: Vec<(&'static SensorGauge, FloatGauge)>,
    info: Family<DeviceInfoLabels, FloatGauge>,
    led_mode: Family<LedModeLabels, FloatGauge>,
    polls: Family<PollResultLabels, Counter>,
    consecutive_failures: Gauge,
    last_success: FloatGauge,
    label_policy: LabelPolicy,
    /// Held for writing while a record is applied and for reading while
    /// rendering, so a scrape never mixes values from two records.
    snapshot: RwLock<()>,
}

impl AirGradientMetrics {
    /// Create and register every metric with a zero value.
    pub fn new(label_policy: LabelPolicy) -> Self {
        let mut registry = Registry::default();

        let info = Family::<DeviceInfoLabels, FloatGauge>::default();
        registry.register(
            "airgradient_info",
            "AirGradient device information",
            info.clone(),
        );

        let sensors = SENSOR_GAUGES
            .iter()
            .map(|sensor| {
                let gauge = FloatGauge::default();
                registry.register(sensor.name, sensor.help, gauge.clone());
                (sensor, gauge)
            })
            .collect();

        let led_mode = Family::<LedModeLabels, FloatGauge>::default();
        registry.register(
            "airgradient_led_mode_info",
            "Current configuration of the LED mode",
            led_mode.clone(),
        );

        let polls = Family::<PollResultLabels, Counter>::default();
        registry.register(
            "airgradient_exporter_polls",
            "Poll cycles by result",
            polls.clone(),
        );
        for result in [
            PollResult::Success,
            PollResult::FetchError,
            PollResult::DecodeError,
        ] {
            polls.get_or_create(&result.labels());
        }

        let consecutive_failures = Gauge::default();
        registry.register(
            "airgradient_exporter_consecutive_failures",
            "Failed poll cycles since the last successful one",
            consecutive_failures.clone(),
        );

        let last_success = FloatGauge::default();
        registry.register(
            "airgradient_exporter_last_success_timestamp_seconds",
            "Unix time of the last successful poll",
            last_success.clone(),
        );

        Self {
            registry,
            sensors,
            info,
            led_mode,
            polls,
            consecutive_failures,
            last_success,
            label_policy,
            snapshot: RwLock::new(()),
        }
    }

    /// Overwrite every metric from a decoded measurement.
    pub fn update(&self, measurement: &Measurement) {
        let _guard = self.snapshot.write();

        for (sensor, gauge) in &self.sensors {
            gauge.set(sensor.value(measurement));
        }

        if self.label_policy == LabelPolicy::Replace {
            self.info.clear();
            self.led_mode.clear();
        }

        self.info
            .get_or_create(&DeviceInfoLabels::from_measurement(measurement))
            .set(1.0);
        self.led_mode
            .get_or_create(&LedModeLabels {
                led_mode: measurement.led_mode.clone(),
            })
            .set(1.0);

        debug!(
            serial_number = %measurement.serial_no,
            pm02 = measurement.pm02,
            co2 = measurement.rco2,
            "Metrics updated"
        );
    }

    /// Record a successful poll at the given time.
    pub fn record_success(&self, at: SystemTime) {
        self.polls.get_or_create(&PollResult::Success.labels()).inc();
        self.consecutive_failures.set(0);

        let secs = at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        self.last_success.set(secs);
    }

    /// Record a failed poll, returning the number of consecutive failures.
    pub fn record_failure(&self, result: PollResult) -> i64 {
        self.polls.get_or_create(&result.labels()).inc();
        self.consecutive_failures.inc() + 1
    }

    /// Current value of a scalar sensor metric.
    pub fn sensor_value(&self, name: &str) -> Option<f64> {
        self.sensors
            .iter()
            .find(|(sensor, _)| sensor.name == name)
            .map(|(_, gauge)| gauge.get())
    }

    /// Current values of all scalar sensor metrics, in registration order.
    pub fn sensor_values(&self) -> Vec<(&'static str, f64)> {
        let _guard = self.snapshot.read();
        self.sensors
            .iter()
            .map(|(sensor, gauge)| (sensor.name, gauge.get()))
            .collect()
    }

    /// Poll statistics.
    pub fn stats(&self) -> PollStats {
        PollStats {
            successes: self.polls.get_or_create(&PollResult::Success.labels()).get(),
            fetch_errors: self
                .polls
                .get_or_create(&PollResult::FetchError.labels())
                .get(),
            decode_errors: self
                .polls
                .get_or_create(&PollResult::DecodeError.labels())
                .get(),
            consecutive_failures: self.consecutive_failures.get(),
        }
    }

    /// Render the registry in the text exposition format.
    pub fn render(&self) -> Result<String, fmt::Error> {
        let _guard = self.snapshot.read();
        let mut output = String::with_capacity(4096);
        encode(&mut output, &self.registry)?;
        Ok(output)
    }
}

impl Default for AirGradientMetrics {
    fn default() -> Self {
        Self::new(LabelPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Value of the sample line starting with `series` followed by a space.
    fn sample(output: &str, series: &str) -> Option<f64> {
        output
            .lines()
            .filter(|line| !line.starts_with('#'))
            .find_map(|line| line.strip_prefix(series)?.strip_prefix(' ')?.parse().ok())
    }

    fn count_series(output: &str, name: &str) -> usize {
        let prefix = format!("{}{{", name);
        output.lines().filter(|l| l.starts_with(&prefix)).count()
    }

    fn measurement(serial: &str, firmware: &str, led_mode: &str) -> Measurement {
        Measurement {
            serial_no: serial.to_string(),
            firmware: firmware.to_string(),
            model: "I-9PSL".to_string(),
            led_mode: led_mode.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_sensor_metric_names_unique() {
        let mut names: Vec<_> = SENSOR_GAUGES.iter().map(|g| g.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), SENSOR_GAUGES.len());
        assert!(names.iter().all(|n| n.starts_with("airgradient_")));
    }

    #[test]
    fn test_new_registry_is_zeroed() {
        let metrics = AirGradientMetrics::default();

        for (name, value) in metrics.sensor_values() {
            assert_eq!(value, 0.0, "{} should start at zero", name);
        }

        let output = metrics.render().unwrap();
        assert_eq!(sample(&output, "airgradient_co2_ppm"), Some(0.0));
        assert_eq!(count_series(&output, "airgradient_info"), 0);
    }

    #[test]
    fn test_update_sets_every_sensor_gauge() {
        let metrics = AirGradientMetrics::default();
        let m = Measurement {
            pm01: 1.0,
            pm02: 2.0,
            pm10: 3.0,
            pm01_standard: 4.0,
            pm02_standard: 5.0,
            pm10_standard: 6.0,
            pm003_count: 7.0,
            pm005_count: 8.0,
            pm01_count: 9.0,
            pm02_count: 10.0,
            pm50_count: 11.0,
            pm10_count: 12.0,
            pm02_compensated: 13.0,
            atmp: 14.0,
            atmp_compensated: 15.0,
            rhum: 16.0,
            rhum_compensated: 17.0,
            rco2: 18.0,
            tvoc_index: 19.0,
            tvoc_raw: 20.0,
            nox_index: 21,
            nox_raw: 22.0,
            boot: 99,
            boot_count: 23,
            wifi: -24,
            ..Default::default()
        };

        metrics.update(&m);

        for sensor in SENSOR_GAUGES {
            assert_eq!(
                metrics.sensor_value(sensor.name),
                Some(sensor.value(&m)),
                "{}",
                sensor.name
            );
        }
        assert_eq!(metrics.sensor_value("airgradient_wifi_rssi_dbm"), Some(-24.0));
        assert_eq!(metrics.sensor_value("airgradient_boots"), Some(23.0));
        assert_eq!(metrics.sensor_value("airgradient_nox_index"), Some(21.0));
        assert_eq!(metrics.sensor_value("airgradient_co2_ppm"), Some(18.0));
    }

    #[test]
    fn test_update_is_full_overwrite() {
        let metrics = AirGradientMetrics::default();

        metrics.update(&Measurement {
            pm02: 40.0,
            rco2: 900.0,
            ..Default::default()
        });
        metrics.update(&Measurement {
            pm02: 5.0,
            ..Default::default()
        });

        assert_eq!(metrics.sensor_value("airgradient_pm02_ugm3"), Some(5.0));
        assert_eq!(metrics.sensor_value("airgradient_co2_ppm"), Some(0.0));
    }

    #[test]
    fn test_info_metric_rendered() {
        let metrics = AirGradientMetrics::default();
        metrics.update(&measurement("abc123", "1.2.3", "co2"));

        let output = metrics.render().unwrap();
        assert_eq!(
            sample(
                &output,
                r#"airgradient_info{serial_number="abc123",firmware="1.2.3",model="I-9PSL"}"#
            ),
            Some(1.0)
        );
        assert_eq!(
            sample(&output, r#"airgradient_led_mode_info{led_mode="co2"}"#),
            Some(1.0)
        );
    }

    #[test]
    fn test_same_label_tuple_is_idempotent() {
        let metrics = AirGradientMetrics::default();

        for _ in 0..5 {
            metrics.update(&measurement("abc123", "1.2.3", "co2"));
        }

        let output = metrics.render().unwrap();
        assert_eq!(count_series(&output, "airgradient_info"), 1);
        assert_eq!(count_series(&output, "airgradient_led_mode_info"), 1);
    }

    #[test]
    fn test_accumulate_keeps_old_label_tuples() {
        let metrics = AirGradientMetrics::new(LabelPolicy::Accumulate);

        metrics.update(&measurement("abc123", "1.2.3", "co2"));
        metrics.update(&measurement("abc123", "1.2.4", "pm"));

        let output = metrics.render().unwrap();
        assert_eq!(count_series(&output, "airgradient_info"), 2);
        assert_eq!(count_series(&output, "airgradient_led_mode_info"), 2);
    }

    #[test]
    fn test_replace_drops_old_label_tuples() {
        let metrics = AirGradientMetrics::new(LabelPolicy::Replace);

        metrics.update(&measurement("abc123", "1.2.3", "co2"));
        metrics.update(&measurement("abc123", "1.2.4", "pm"));

        let output = metrics.render().unwrap();
        assert_eq!(count_series(&output, "airgradient_info"), 1);
        assert!(output.contains(r#"firmware="1.2.4""#));
        assert!(!output.contains(r#"firmware="1.2.3""#));
        assert_eq!(count_series(&output, "airgradient_led_mode_info"), 1);
        assert!(output.contains(r#"led_mode="pm""#));
    }

    #[test]
    fn test_poll_statistics() {
        let metrics = AirGradientMetrics::default();

        assert_eq!(metrics.record_failure(PollResult::FetchError), 1);
        assert_eq!(metrics.record_failure(PollResult::DecodeError), 2);
        metrics.record_success(UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000));
        assert_eq!(metrics.record_failure(PollResult::FetchError), 1);

        let stats = metrics.stats();
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.fetch_errors, 2);
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.consecutive_failures, 1);

        let output = metrics.render().unwrap();
        assert_eq!(
            sample(&output, r#"airgradient_exporter_polls_total{result="fetch_error"}"#),
            Some(2.0)
        );
        assert_eq!(
            sample(&output, "airgradient_exporter_last_success_timestamp_seconds"),
            Some(1_700_000_000.0)
        );
        assert_eq!(
            sample(&output, "airgradient_exporter_consecutive_failures"),
            Some(1.0)
        );
    }

    #[test]
    fn test_render_never_mixes_records() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let metrics = Arc::new(AirGradientMetrics::default());
        let done = Arc::new(AtomicBool::new(false));

        let record = |v: f64| Measurement {
            pm01: v,
            pm02: v,
            pm10: v,
            rco2: v,
            atmp: v,
            rhum: v,
            ..Default::default()
        };
        let a = record(1.0);
        let b = record(2.0);

        let writer = {
            let metrics = metrics.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                for i in 0..2_000 {
                    metrics.update(if i % 2 == 0 { &a } else { &b });
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let names = [
            "airgradient_pm01_ugm3",
            "airgradient_pm02_ugm3",
            "airgradient_pm10_ugm3",
            "airgradient_co2_ppm",
            "airgradient_temperature_celsius",
            "airgradient_humidity_percent",
        ];

        while !done.load(Ordering::SeqCst) {
            let output = metrics.render().unwrap();
            let values: Vec<f64> = names
                .iter()
                .map(|n| sample(&output, n).unwrap())
                .collect();

            assert!(
                values.iter().all(|v| [0.0, 1.0, 2.0].contains(v)),
                "unexpected value in {:?}",
                values
            );
            assert!(
                values.iter().all(|v| *v == values[0]),
                "mixed records in one scrape: {:?}",
                values
            );
        }

        writer.join().unwrap();
    }
}
