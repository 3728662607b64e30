//! Config file discovery and loading.
//!
//! Merge order: built-in defaults, then the first config file found
//! (explicit `--config` path, user config dir, `./patchjam.toml`), then
//! `PATCHJAM_*` environment variables. CLI flags sit on top of all of it.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jamgraph::{NodeClass, Pattern};
use jamwire::producer::DEFAULT_DISCOVERY_TIMEOUT;
use jamwire::{ProducerSpec, SourceSpec};

#[derive(Debug, Clone, PartialEq)]
pub struct FileConfig {
    pub sink_name: String,
    /// Ramp duration in seconds.
    pub ramp_duration: f64,
    pub output_dir: PathBuf,
    pub synth_pattern: String,
    pub mic_pattern: String,
    pub mic_command: Vec<String>,
    pub unpatch_auto_links: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            sink_name: "record_mix".to_string(),
            ramp_duration: 0.5,
            output_dir: PathBuf::from("recordings"),
            synth_pattern: "alsa_input.usb".to_string(),
            mic_pattern: "scrcpy".to_string(),
            mic_command: [
                "scrcpy",
                "--no-video",
                "--audio-source=mic",
                "--audio-codec=raw",
            ]
            .map(String::from)
            .to_vec(),
            unpatch_auto_links: true,
        }
    }
}

impl FileConfig {
    pub fn synth_spec(&self) -> SourceSpec {
        SourceSpec {
            pattern: Pattern::name(self.synth_pattern.as_str()).with_class(NodeClass::Source),
            ..SourceSpec::synth()
        }
    }

    pub fn mic_spec(&self) -> SourceSpec {
        let label = self
            .mic_command
            .first()
            .cloned()
            .unwrap_or_else(|| "mic".to_string());
        SourceSpec {
            role: "mic".to_string(),
            pattern: Pattern::name(self.mic_pattern.as_str()),
            producer: Some(ProducerSpec {
                label,
                command: self.mic_command.clone(),
                node_pattern: Pattern::name(self.mic_pattern.as_str()),
                discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            }),
            manage_volume: false,
        }
    }
}

/// Paths checked in order; the first that exists wins.
pub fn discover_config_file(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return path.exists().then(|| path.to_path_buf());
    }
    if let Some(base) = directories::BaseDirs::new() {
        let user = base.config_dir().join("patchjam/config.toml");
        if user.exists() {
            return Some(user);
        }
    }
    let local = PathBuf::from("patchjam.toml");
    local.exists().then_some(local)
}

pub fn load(cli_path: Option<&Path>) -> Result<FileConfig> {
    let mut config = FileConfig::default();
    if let Some(path) = discover_config_file(cli_path) {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        apply_toml(&mut config, &contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
    }
    apply_env_overrides(&mut config);
    Ok(config)
}

fn apply_toml(config: &mut FileConfig, contents: &str) -> Result<()> {
    let table: toml::Table = contents.parse()?;

    if let Some(mix) = table.get("mix").and_then(|v| v.as_table()) {
        if let Some(v) = mix.get("sink_name").and_then(|v| v.as_str()) {
            config.sink_name = v.to_string();
        }
        if let Some(v) = number_of(mix.get("ramp_duration")) {
            config.ramp_duration = v;
        }
        if let Some(v) = mix.get("unpatch_auto_links").and_then(|v| v.as_bool()) {
            config.unpatch_auto_links = v;
        }
    }

    if let Some(record) = table.get("record").and_then(|v| v.as_table()) {
        if let Some(v) = record.get("output_dir").and_then(|v| v.as_str()) {
            config.output_dir = PathBuf::from(v);
        }
    }

    if let Some(sources) = table.get("sources").and_then(|v| v.as_table()) {
        if let Some(synth) = sources.get("synth").and_then(|v| v.as_table()) {
            if let Some(v) = synth.get("name_contains").and_then(|v| v.as_str()) {
                config.synth_pattern = v.to_string();
            }
        }
        if let Some(mic) = sources.get("mic").and_then(|v| v.as_table()) {
            if let Some(v) = mic.get("name_contains").and_then(|v| v.as_str()) {
                config.mic_pattern = v.to_string();
            }
            if let Some(v) = mic.get("command").and_then(|v| v.as_array()) {
                config.mic_command = v
                    .iter()
                    .filter_map(|item| item.as_str().map(String::from))
                    .collect();
            }
        }
    }

    Ok(())
}

fn number_of(value: Option<&toml::Value>) -> Option<f64> {
    match value {
        Some(toml::Value::Float(f)) => Some(*f),
        Some(toml::Value::Integer(i)) => Some(*i as f64),
        _ => None,
    }
}

fn apply_env_overrides(config: &mut FileConfig) {
    if let Ok(v) = env::var("PATCHJAM_SINK_NAME") {
        config.sink_name = v;
    }
    if let Ok(v) = env::var("PATCHJAM_OUTPUT_DIR") {
        config.output_dir = PathBuf::from(v);
    }
    if let Ok(v) = env::var("PATCHJAM_SYNTH_PATTERN") {
        config.synth_pattern = v;
    }
    if let Ok(v) = env::var("PATCHJAM_MIC_PATTERN") {
        config.mic_pattern = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FileConfig::default();
        assert_eq!(config.sink_name, "record_mix");
        assert_eq!(config.ramp_duration, 0.5);
        assert_eq!(config.mic_command[0], "scrcpy");
    }

    #[test]
    fn test_parse_minimal_toml() {
        let mut config = FileConfig::default();
        apply_toml(
            &mut config,
            r#"
[mix]
sink_name = "jam_mix"
"#,
        )
        .unwrap();
        assert_eq!(config.sink_name, "jam_mix");
        // Untouched values keep their defaults.
        assert_eq!(config.ramp_duration, 0.5);
        assert_eq!(config.synth_pattern, "alsa_input.usb");
    }

    #[test]
    fn test_parse_full_toml() {
        let mut config = FileConfig::default();
        apply_toml(
            &mut config,
            r#"
[mix]
sink_name = "take_mix"
ramp_duration = 1
unpatch_auto_links = false

[record]
output_dir = "/tmp/takes"

[sources.synth]
name_contains = "alsa_input.pci"

[sources.mic]
name_contains = "droidcam"
command = ["droidcam-cli", "-a"]
"#,
        )
        .unwrap();

        assert_eq!(config.sink_name, "take_mix");
        assert_eq!(config.ramp_duration, 1.0);
        assert!(!config.unpatch_auto_links);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/takes"));
        assert_eq!(config.synth_pattern, "alsa_input.pci");
        assert_eq!(config.mic_pattern, "droidcam");
        assert_eq!(config.mic_command, vec!["droidcam-cli", "-a"]);
    }

    #[test]
    fn test_specs_follow_configured_patterns() {
        let mut config = FileConfig::default();
        config.synth_pattern = "alsa_input.pci".to_string();
        config.mic_pattern = "droidcam".to_string();

        let synth = config.synth_spec();
        assert_eq!(synth.pattern.name_contains.as_deref(), Some("alsa_input.pci"));
        assert!(synth.producer.is_none());

        let mic = config.mic_spec();
        assert_eq!(mic.pattern.name_contains.as_deref(), Some("droidcam"));
        assert!(mic.producer.is_some());
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        let mut config = FileConfig::default();
        assert!(apply_toml(&mut config, "not [valid toml").is_err());
    }

    #[test]
    fn test_load_with_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[mix]\nsink_name = \"studio_mix\"\n").unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.sink_name, "studio_mix");
    }

    #[test]
    fn test_missing_explicit_path_falls_back_to_defaults() {
        let config = load(Some(Path::new("/nonexistent/patchjam.toml"))).unwrap();
        assert_eq!(config.sink_name, "record_mix");
    }
}
