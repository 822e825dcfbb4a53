use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::{BackendRegistry, DetectorBackend, MarkerBackend};
use crate::device::{Resolution, StreamSettings};
use crate::frame::DEFAULT_DEPTH_SCALE;
use crate::proximity::{ProximityThreshold, DEFAULT_THRESHOLD_M};
use crate::sink::{LogSink, MqttSettings, MqttSink, WarningSink};

const DEFAULT_SOURCE_URI: &str = "stub://realsense";
const DEFAULT_SEED: u64 = 7;
const DEFAULT_PRODUCT_LINE: &str = "D400";
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_HEALTH_LOG_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
struct DepthGuardConfigFile {
    threshold_m: Option<f32>,
    source: Option<SourceConfigFile>,
    streams: Option<StreamsConfigFile>,
    detector: Option<DetectorConfigFile>,
    sink: Option<SinkConfigFile>,
    pipeline: Option<PipelineConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    depth_scale: Option<f32>,
    seed: Option<u64>,
    product_line: Option<String>,
    color_sensor: Option<bool>,
    pace: Option<bool>,
    drop_every: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamsConfigFile {
    depth: Option<Resolution>,
    color: Option<Resolution>,
    color_overrides: Option<BTreeMap<String, Resolution>>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence: Option<f32>,
    iou: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct SinkConfigFile {
    kind: Option<String>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker_addr: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    mode: Option<String>,
    health_log_secs: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct DepthGuardConfig {
    pub threshold: ProximityThreshold,
    pub source: SourceSettings,
    pub streams: StreamSettings,
    pub detector: DetectorSettings,
    pub sink: SinkSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    /// `stub://<name>` or a playback directory.
    pub uri: String,
    /// Meters per raw depth unit.
    pub depth_scale: f32,
    /// Synthetic source only.
    pub seed: u64,
    /// Synthetic source only.
    pub product_line: String,
    /// Synthetic source only.
    pub color_sensor: bool,
    /// Synthetic source only.
    pub pace: bool,
    /// Synthetic source only.
    pub drop_every: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            uri: DEFAULT_SOURCE_URI.to_string(),
            depth_scale: DEFAULT_DEPTH_SCALE,
            seed: DEFAULT_SEED,
            product_line: DEFAULT_PRODUCT_LINE.to_string(),
            color_sensor: true,
            pace: true,
            drop_every: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub confidence: f32,
    pub iou: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            model_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            confidence: DEFAULT_CONFIDENCE,
            iou: DEFAULT_IOU,
        }
    }
}

impl DetectorSettings {
    /// Registry of the stub backend plus tract when it is the selected backend.
    pub fn registry(&self) -> Result<BackendRegistry> {
        let mut registry = BackendRegistry::new();
        registry.register(MarkerBackend::default());
        #[cfg(feature = "backend-tract")]
        if self.backend.eq_ignore_ascii_case("tract") {
            if let Some(path) = &self.model_path {
                let backend = crate::detect::TractBackend::new(path, self.input_size)?
                    .with_thresholds(self.confidence, self.iou);
                registry.register(backend);
            }
        }
        Ok(registry)
    }

    /// Build and warm up the configured backend.
    pub fn build(&self) -> Result<Box<dyn DetectorBackend>> {
        let mut backend = self.registry()?.take(Some(&self.backend))?;
        backend.warm_up()?;
        log::info!("detector backend {} ready", backend.name());
        Ok(backend)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkKind {
    #[default]
    Log,
    Mqtt,
}

impl FromStr for SinkKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(SinkKind::Log),
            "mqtt" => Ok(SinkKind::Mqtt),
            other => Err(anyhow!("unknown sink kind '{}' (expected log|mqtt)", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkSettings {
    pub kind: SinkKind,
    pub mqtt: MqttSettings,
}

impl SinkSettings {
    pub fn build(&self) -> Result<Box<dyn WarningSink>> {
        match self.kind {
            SinkKind::Log => Ok(Box::new(LogSink)),
            SinkKind::Mqtt => Ok(Box::new(MqttSink::connect(&self.mqtt)?)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
    #[default]
    Sequential,
    Threaded,
}

impl FromStr for PipelineMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(PipelineMode::Sequential),
            "threaded" => Ok(PipelineMode::Threaded),
            other => Err(anyhow!(
                "unknown pipeline mode '{}' (expected sequential|threaded)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub mode: PipelineMode,
    pub health_log_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            mode: PipelineMode::Sequential,
            health_log_interval: Duration::from_secs(DEFAULT_HEALTH_LOG_SECS),
        }
    }
}

impl DepthGuardConfig {
    /// Load from `DEPTHGUARD_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DEPTHGUARD_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DepthGuardConfigFile) -> Result<Self> {
        let defaults = DepthGuardConfig::default();
        let threshold =
            ProximityThreshold::new(file.threshold_m.unwrap_or(DEFAULT_THRESHOLD_M))?;

        let src = file.source.unwrap_or_default();
        let source = SourceSettings {
            uri: src.uri.unwrap_or(defaults.source.uri),
            depth_scale: src.depth_scale.unwrap_or(defaults.source.depth_scale),
            seed: src.seed.unwrap_or(defaults.source.seed),
            product_line: src.product_line.unwrap_or(defaults.source.product_line),
            color_sensor: src.color_sensor.unwrap_or(defaults.source.color_sensor),
            pace: src.pace.unwrap_or(defaults.source.pace),
            drop_every: src.drop_every.unwrap_or(defaults.source.drop_every),
        };

        let streams_file = file.streams.unwrap_or_default();
        let mut color_overrides = defaults.streams.color_overrides;
        color_overrides.extend(streams_file.color_overrides.unwrap_or_default());
        let streams = StreamSettings {
            depth: streams_file.depth.unwrap_or(defaults.streams.depth),
            color: streams_file.color.unwrap_or(defaults.streams.color),
            color_overrides,
        };

        let det = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: det.backend.unwrap_or(defaults.detector.backend),
            model_path: det.model_path,
            input_size: det.input_size.unwrap_or(defaults.detector.input_size),
            confidence: det.confidence.unwrap_or(defaults.detector.confidence),
            iou: det.iou.unwrap_or(defaults.detector.iou),
        };

        let sink_file = file.sink.unwrap_or_default();
        let mqtt_file = sink_file.mqtt.unwrap_or_default();
        let mqtt_defaults = MqttSettings::default();
        let sink = SinkSettings {
            kind: match sink_file.kind {
                Some(kind) => kind.parse()?,
                None => SinkKind::default(),
            },
            mqtt: MqttSettings {
                broker_addr: mqtt_file.broker_addr.unwrap_or(mqtt_defaults.broker_addr),
                topic: mqtt_file.topic.unwrap_or(mqtt_defaults.topic),
                client_id: mqtt_file.client_id.unwrap_or(mqtt_defaults.client_id),
                username: mqtt_file.username,
                password: mqtt_file.password,
            },
        };

        let pipe = file.pipeline.unwrap_or_default();
        let pipeline = PipelineSettings {
            mode: match pipe.mode {
                Some(mode) => mode.parse()?,
                None => PipelineMode::default(),
            },
            health_log_interval: Duration::from_secs(
                pipe.health_log_secs.unwrap_or(DEFAULT_HEALTH_LOG_SECS),
            ),
        };

        Ok(Self {
            threshold,
            source,
            streams,
            detector,
            sink,
            pipeline,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(threshold) = std::env::var("DEPTHGUARD_THRESHOLD_M") {
            let meters: f32 = threshold.trim().parse().map_err(|_| {
                anyhow!("DEPTHGUARD_THRESHOLD_M must be a number of meters")
            })?;
            self.threshold = ProximityThreshold::new(meters)?;
        }
        if let Ok(uri) = std::env::var("DEPTHGUARD_SOURCE") {
            if !uri.trim().is_empty() {
                self.source.uri = uri;
            }
        }
        if let Ok(backend) = std::env::var("DEPTHGUARD_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("DEPTHGUARD_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(kind) = std::env::var("DEPTHGUARD_SINK") {
            if !kind.trim().is_empty() {
                self.sink.kind = kind.parse()?;
            }
        }
        if let Ok(addr) = std::env::var("DEPTHGUARD_MQTT_BROKER") {
            if !addr.trim().is_empty() {
                self.sink.mqtt.broker_addr = addr;
            }
        }
        if let Ok(mode) = std::env::var("DEPTHGUARD_PIPELINE_MODE") {
            if !mode.trim().is_empty() {
                self.pipeline.mode = mode.parse()?;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.streams.validate()?;

        if !(self.source.depth_scale.is_finite() && self.source.depth_scale > 0.0) {
            return Err(anyhow!("source depth_scale must be greater than zero"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        for (name, value) in [
            ("confidence", self.detector.confidence),
            ("iou", self.detector.iou),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(anyhow!("detector {} must be in (0, 1], got {}", name, value));
            }
        }
        self.detector.backend = self.detector.backend.to_ascii_lowercase();
        if self.detector.backend == "tract" && self.detector.model_path.is_none() {
            return Err(anyhow!("the tract backend requires detector.model_path"));
        }
        if self.sink.kind == SinkKind::Mqtt && self.sink.mqtt.topic.trim().is_empty() {
            return Err(anyhow!("mqtt sink requires a non-empty topic"));
        }
        if self.pipeline.health_log_interval.is_zero() {
            return Err(anyhow!("pipeline health_log_secs must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<DepthGuardConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_setup() -> Result<()> {
        let cfg = DepthGuardConfig::from_file(DepthGuardConfigFile::default())?;
        assert_eq!(cfg.threshold.meters(), 1.0);
        assert_eq!(cfg.source.uri, "stub://realsense");
        assert_eq!(cfg.streams.depth, Resolution::new(640, 480, 30));
        assert_eq!(
            cfg.streams.color_overrides.get("L515C"),
            Some(&Resolution::new(960, 540, 30))
        );
        assert_eq!(cfg.detector.backend, "stub");
        assert_eq!(cfg.sink.kind, SinkKind::Log);
        assert_eq!(cfg.pipeline.mode, PipelineMode::Sequential);
        Ok(())
    }

    #[test]
    fn file_color_overrides_extend_the_defaults() -> Result<()> {
        let mut overrides = BTreeMap::new();
        overrides.insert("D455".to_string(), Resolution::new(1280, 800, 30));
        let file = DepthGuardConfigFile {
            streams: Some(StreamsConfigFile {
                color_overrides: Some(overrides),
                ..Default::default()
            }),
            ..Default::default()
        };
        let cfg = DepthGuardConfig::from_file(file)?;
        assert_eq!(
            cfg.streams.color_overrides.get("D455"),
            Some(&Resolution::new(1280, 800, 30))
        );
        assert_eq!(
            cfg.streams.color_overrides.get("L515C"),
            Some(&Resolution::new(960, 540, 30))
        );
        Ok(())
    }

    #[test]
    fn stub_backend_ignores_configured_model_path() -> Result<()> {
        let settings = DetectorSettings {
            model_path: Some(PathBuf::from("missing/yolov8n.onnx")),
            ..Default::default()
        };
        assert_eq!(settings.build()?.name(), "stub");
        Ok(())
    }

    #[test]
    fn enum_settings_parse_case_insensitively() -> Result<()> {
        assert_eq!("MQTT".parse::<SinkKind>()?, SinkKind::Mqtt);
        assert_eq!(" threaded ".parse::<PipelineMode>()?, PipelineMode::Threaded);
        assert!("udp".parse::<SinkKind>().is_err());
        Ok(())
    }

    #[test]
    fn invalid_threshold_in_file_is_rejected() {
        let file = DepthGuardConfigFile {
            threshold_m: Some(0.0),
            ..Default::default()
        };
        assert!(DepthGuardConfig::from_file(file).is_err());
    }

    #[test]
    fn tract_without_model_fails_validation() -> Result<()> {
        let mut cfg = DepthGuardConfig::default();
        cfg.detector.backend = "Tract".to_string();
        assert!(cfg.validate().is_err());
        cfg.detector.model_path = Some(PathBuf::from("yolov8n.onnx"));
        cfg.validate()?;
        assert_eq!(cfg.detector.backend, "tract");
        Ok(())
    }

    #[test]
    fn default_detector_builds_the_marker_backend() -> Result<()> {
        let backend = DetectorSettings::default().build()?;
        assert_eq!(backend.name(), "stub");
        Ok(())
    }

    #[test]
    fn unknown_backend_is_not_built() {
        let settings = DetectorSettings {
            backend: "missing".to_string(),
            ..Default::default()
        };
        assert!(settings.build().is_err());
    }

    #[test]
    fn out_of_range_confidence_fails_validation() {
        let mut cfg = DepthGuardConfig::default();
        cfg.detector.confidence = 1.5;
        assert!(cfg.validate().is_err());
    }
}
