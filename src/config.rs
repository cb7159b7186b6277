//! Configuration sourcing: registry (stubbed, out of scope), environment
//! variables, and per-user/site config files, merged lowest-to-highest
//! precedence into one [`BridgeConfig`].
//!
//! Grounded in wineasio's `settings.h` (env var names, `.wineasiocfg` /
//! `/etc/default/wineasiocfg` file paths) and `main.c`'s config precedence
//! order. Illegal values are clamped to defaults and logged rather than
//! failing Open (spec §6, §7).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

/// One resolved configuration value, before merge. `None` means "this
/// source had no opinion" — the next-lower-precedence source's value (or
/// the hardcoded default) stands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigValues {
    /// Configured input channel capacity.
    pub number_of_inputs: Option<u32>,
    /// Configured output channel capacity.
    pub number_of_outputs: Option<u32>,
    /// If set, buffer size cannot be changed by the guest.
    pub fixed_buffersize: Option<bool>,
    /// Default/initial buffer size when negotiable.
    pub preferred_buffersize: Option<u32>,
    /// Pass a flag at client-open asking the backend to start if not
    /// running.
    pub autostart_server: Option<bool>,
    /// On activate, auto-wire to the first N physical ports.
    pub connect_to_hardware: Option<bool>,
    /// Overrides the auto-derived backend client name.
    pub client_name: Option<String>,
    /// Overrides the per-channel input port name prefix.
    pub input_port_prefix: Option<String>,
    /// Overrides the per-channel output port name prefix.
    pub output_port_prefix: Option<String>,
}

/// A source of configuration values, consulted in precedence order. The
/// registry tier named in spec §6 has no non-Windows equivalent and is
/// modeled as a trait so a future Windows registry reader can slot in
/// without touching the merge logic; [`NullSource`] stands in for it here.
pub trait ConfigSource {
    /// Reads whatever this source has to offer. Must never fail Open —
    /// parse errors are logged and treated as "no opinion" on the
    /// offending key.
    fn read(&self) -> ConfigValues;
}

/// Stands in for the registry-like store named in spec §6 — deliberately
/// out of scope for this core (there is no registry to read from on a
/// JACK host), but kept as the lowest-precedence tier so a real
/// implementation can be dropped in later without reshuffling precedence.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSource;

impl ConfigSource for NullSource {
    fn read(&self) -> ConfigValues {
        ConfigValues::default()
    }
}

/// The recognized environment variable suffixes, appended to the
/// configured (or default) prefix — e.g. prefix `ASIO` yields
/// `ASIO_NUMBER_INPUTS`. `INPUT_PORT_PREFIX`/`OUTPUT_PORT_PREFIX` mirror
/// wineasio's `ENVVAR_INPORTNAMEPREFIX`/`ENVVAR_OUTPORTNAMEPREFIX`.
mod env_keys {
    pub const NUMBER_INPUTS: &str = "_NUMBER_INPUTS";
    pub const NUMBER_OUTPUTS: &str = "_NUMBER_OUTPUTS";
    pub const AUTOSTART_SERVER: &str = "_AUTOSTART_SERVER";
    pub const CONNECT_TO_HARDWARE: &str = "_CONNECT_TO_HARDWARE";
    pub const FIXED_BUFFERSIZE: &str = "_FIXED_BUFFERSIZE";
    pub const PREFERRED_BUFFERSIZE: &str = "_PREFERRED_BUFFERSIZE";
    pub const CLIENT_NAME: &str = "_CLIENT_NAME";
    pub const INPUT_PORT_PREFIX: &str = "_INPORTNAMEPREFIX";
    pub const OUTPUT_PORT_PREFIX: &str = "_OUTPORTNAMEPREFIX";
}

/// Default prefix for environment variable names, matching wineasio's
/// `DEFAULT_PREFIX`.
pub const DEFAULT_ENV_PREFIX: &str = "ASIO";

fn parse_bool_on_off(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

/// Reads configuration from environment variables named
/// `<prefix>_NUMBER_INPUTS` etc. Boolean values recognize `"on"`/`"off"`
/// case-insensitively (spec §6); anything else is logged and ignored.
#[derive(Debug, Clone)]
pub struct EnvSource {
    prefix: String,
}

impl EnvSource {
    /// Builds a source reading variables under `<prefix>_...`.
    pub fn new(prefix: impl Into<String>) -> Self {
        EnvSource { prefix: prefix.into() }
    }

    fn var(&self, suffix: &str) -> Option<String> {
        std::env::var(format!("{}{}", self.prefix, suffix)).ok()
    }

    fn bool_var(&self, suffix: &str) -> Option<bool> {
        let raw = self.var(suffix)?;
        match parse_bool_on_off(&raw) {
            Some(b) => Some(b),
            None => {
                warn!(key = %format!("{}{}", self.prefix, suffix), value = %raw, "ignoring unrecognized boolean value");
                None
            }
        }
    }

    fn u32_var(&self, suffix: &str) -> Option<u32> {
        let raw = self.var(suffix)?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(key = %format!("{}{}", self.prefix, suffix), value = %raw, "ignoring unparsable integer value");
                None
            }
        }
    }
}

impl ConfigSource for EnvSource {
    fn read(&self) -> ConfigValues {
        ConfigValues {
            number_of_inputs: self.u32_var(env_keys::NUMBER_INPUTS),
            number_of_outputs: self.u32_var(env_keys::NUMBER_OUTPUTS),
            fixed_buffersize: self.bool_var(env_keys::FIXED_BUFFERSIZE),
            preferred_buffersize: self.u32_var(env_keys::PREFERRED_BUFFERSIZE),
            autostart_server: self.bool_var(env_keys::AUTOSTART_SERVER),
            connect_to_hardware: self.bool_var(env_keys::CONNECT_TO_HARDWARE),
            client_name: self.var(env_keys::CLIENT_NAME),
            input_port_prefix: self.var(env_keys::INPUT_PORT_PREFIX),
            output_port_prefix: self.var(env_keys::OUTPUT_PORT_PREFIX),
        }
    }
}

const RECOGNIZED_FILE_KEYS: &[&str] = &[
    "number_of_inputs",
    "number_of_outputs",
    "fixed_buffersize",
    "preferred_buffersize",
    "autostart_server",
    "connect_to_hardware",
    "client_name",
    "input_port_prefix",
    "output_port_prefix",
];

/// Reads `KEY=VALUE` lines from a config file, filtered by
/// [`RECOGNIZED_FILE_KEYS`]. Unrecognized keys, malformed lines, and
/// missing files are all logged and skipped — this must never fail Open.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// A source reading the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSource { path: path.into() }
    }

    /// The per-user config file path, `~/.wineasiocfg` by wineasio's
    /// naming, kept here for continuity with the format it reads.
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".wineasiocfg"))
    }

    /// The site-wide fallback path.
    pub fn site_config_path() -> PathBuf {
        PathBuf::from("/etc/default/wineasiocfg")
    }

    fn parse(contents: &str) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(line = lineno + 1, "malformed config line, skipping");
                continue;
            };
            let key = key.trim();
            if !RECOGNIZED_FILE_KEYS.contains(&key) {
                warn!(key, "unrecognized config key, skipping");
                continue;
            }
            map.insert(key.to_string(), value.trim().to_string());
        }
        map
    }

    fn read_from(path: &Path) -> ConfigValues {
        let Ok(contents) = std::fs::read_to_string(path) else {
            return ConfigValues::default();
        };
        let map = Self::parse(&contents);
        ConfigValues {
            number_of_inputs: map.get("number_of_inputs").and_then(|v| v.parse().ok()),
            number_of_outputs: map.get("number_of_outputs").and_then(|v| v.parse().ok()),
            fixed_buffersize: map.get("fixed_buffersize").and_then(|v| parse_bool_on_off(v)),
            preferred_buffersize: map.get("preferred_buffersize").and_then(|v| v.parse().ok()),
            autostart_server: map.get("autostart_server").and_then(|v| parse_bool_on_off(v)),
            connect_to_hardware: map.get("connect_to_hardware").and_then(|v| parse_bool_on_off(v)),
            client_name: map.get("client_name").cloned(),
            input_port_prefix: map.get("input_port_prefix").cloned(),
            output_port_prefix: map.get("output_port_prefix").cloned(),
        }
    }
}

impl ConfigSource for FileSource {
    fn read(&self) -> ConfigValues {
        Self::read_from(&self.path)
    }
}

/// Hard floor/ceiling on buffer size, matching [`crate::MIN_BUFFER_FRAMES`]
/// / [`crate::MAX_BUFFER_FRAMES`].
fn is_power_of_two_in_range(v: u32) -> bool {
    v.is_power_of_two() && (crate::MIN_BUFFER_FRAMES..=crate::MAX_BUFFER_FRAMES).contains(&v)
}

/// The fully resolved, merged, clamped configuration consumed by
/// `Driver::open`.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Configured input channel capacity.
    pub number_of_inputs: u32,
    /// Configured output channel capacity.
    pub number_of_outputs: u32,
    /// If set, buffer size cannot be changed by the guest.
    pub fixed_buffersize: bool,
    /// Default/initial buffer size when negotiable.
    pub preferred_buffersize: u32,
    /// Pass a flag at client-open asking the backend to start if not
    /// running.
    pub autostart_server: bool,
    /// On activate, auto-wire to the first N physical ports.
    pub connect_to_hardware: bool,
    /// Overrides the auto-derived backend client name, if set.
    pub client_name: Option<String>,
    /// Prefix applied to each input channel's port name, e.g. `"input_"`
    /// yields `input_1`, `input_2`, ... Matches wineasio's `DEFAULT_INPORT`.
    pub input_port_prefix: String,
    /// Prefix applied to each output channel's port name. Matches
    /// wineasio's `DEFAULT_OUTPORT`.
    pub output_port_prefix: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            number_of_inputs: 2,
            number_of_outputs: 2,
            fixed_buffersize: false,
            preferred_buffersize: 1024,
            autostart_server: true,
            connect_to_hardware: true,
            client_name: None,
            input_port_prefix: "input_".to_string(),
            output_port_prefix: "output_".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Merges `sources` in increasing precedence order (earlier entries
    /// are overridden by later ones), clamping any illegal value to the
    /// default and logging it, and falls back to [`BridgeConfig::default`]
    /// for anything no source addressed.
    pub fn resolve(sources: &[&dyn ConfigSource]) -> BridgeConfig {
        let mut merged = ConfigValues::default();
        for source in sources {
            let values = source.read();
            if values.number_of_inputs.is_some() {
                merged.number_of_inputs = values.number_of_inputs;
            }
            if values.number_of_outputs.is_some() {
                merged.number_of_outputs = values.number_of_outputs;
            }
            if values.fixed_buffersize.is_some() {
                merged.fixed_buffersize = values.fixed_buffersize;
            }
            if values.preferred_buffersize.is_some() {
                merged.preferred_buffersize = values.preferred_buffersize;
            }
            if values.autostart_server.is_some() {
                merged.autostart_server = values.autostart_server;
            }
            if values.connect_to_hardware.is_some() {
                merged.connect_to_hardware = values.connect_to_hardware;
            }
            if values.client_name.is_some() {
                merged.client_name = values.client_name;
            }
            if values.input_port_prefix.is_some() {
                merged.input_port_prefix = values.input_port_prefix;
            }
            if values.output_port_prefix.is_some() {
                merged.output_port_prefix = values.output_port_prefix;
            }
        }

        let defaults = BridgeConfig::default();
        let preferred_buffersize = merged
            .preferred_buffersize
            .filter(|&v| is_power_of_two_in_range(v))
            .unwrap_or_else(|| {
                if let Some(bad) = merged.preferred_buffersize {
                    warn!(value = bad, "preferred_buffersize not a power of two in range, clamping to default");
                }
                defaults.preferred_buffersize
            });

        BridgeConfig {
            number_of_inputs: merged.number_of_inputs.unwrap_or(defaults.number_of_inputs),
            number_of_outputs: merged.number_of_outputs.unwrap_or(defaults.number_of_outputs),
            fixed_buffersize: merged.fixed_buffersize.unwrap_or(defaults.fixed_buffersize),
            preferred_buffersize,
            autostart_server: merged.autostart_server.unwrap_or(defaults.autostart_server),
            connect_to_hardware: merged.connect_to_hardware.unwrap_or(defaults.connect_to_hardware),
            client_name: merged.client_name,
            input_port_prefix: merged.input_port_prefix.unwrap_or(defaults.input_port_prefix),
            output_port_prefix: merged.output_port_prefix.unwrap_or(defaults.output_port_prefix),
        }
    }

    /// The standard precedence chain: registry (stubbed) < environment <
    /// site config file < per-user config file.
    pub fn resolve_standard(env_prefix: &str) -> BridgeConfig {
        let registry = NullSource;
        let env = EnvSource::new(env_prefix);
        let site = FileSource::new(FileSource::site_config_path());
        let user_path = FileSource::user_config_path();
        let user = user_path.map(FileSource::new);

        let mut sources: Vec<&dyn ConfigSource> = vec![&registry, &env, &site];
        if let Some(user) = &user {
            sources.push(user);
        }
        BridgeConfig::resolve(&sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn higher_precedence_source_overrides_lower() {
        let low = ConfigValues { number_of_inputs: Some(2), ..Default::default() };
        let high = ConfigValues { number_of_inputs: Some(4), ..Default::default() };
        struct Fixed(ConfigValues);
        impl ConfigSource for Fixed {
            fn read(&self) -> ConfigValues {
                self.0.clone()
            }
        }
        let low = Fixed(low);
        let high = Fixed(high);
        let resolved = BridgeConfig::resolve(&[&low, &high]);
        assert_eq!(resolved.number_of_inputs, 4);
    }

    #[test]
    fn non_power_of_two_buffer_size_clamps_to_default() {
        struct Fixed(ConfigValues);
        impl ConfigSource for Fixed {
            fn read(&self) -> ConfigValues {
                self.0.clone()
            }
        }
        let bad = Fixed(ConfigValues { preferred_buffersize: Some(1000), ..Default::default() });
        let resolved = BridgeConfig::resolve(&[&bad]);
        assert_eq!(resolved.preferred_buffersize, BridgeConfig::default().preferred_buffersize);
    }

    #[test]
    fn env_source_recognizes_on_off_case_insensitively() {
        std::env::set_var("TESTPFX_AUTOSTART_SERVER", "ON");
        let values = EnvSource::new("TESTPFX").read();
        assert_eq!(values.autostart_server, Some(true));
        std::env::remove_var("TESTPFX_AUTOSTART_SERVER");
    }

    #[test]
    fn file_source_ignores_unrecognized_keys_and_malformed_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "number_of_inputs=4").unwrap();
        writeln!(file, "not_a_recognized_key=99").unwrap();
        writeln!(file, "this line has no equals sign").unwrap();
        let values = FileSource::new(file.path()).read();
        assert_eq!(values.number_of_inputs, Some(4));
    }

    #[test]
    fn env_source_reads_port_name_prefixes() {
        std::env::set_var("TESTPFX2_INPORTNAMEPREFIX", "rec_");
        std::env::set_var("TESTPFX2_OUTPORTNAMEPREFIX", "play_");
        let values = EnvSource::new("TESTPFX2").read();
        assert_eq!(values.input_port_prefix.as_deref(), Some("rec_"));
        assert_eq!(values.output_port_prefix.as_deref(), Some("play_"));
        std::env::remove_var("TESTPFX2_INPORTNAMEPREFIX");
        std::env::remove_var("TESTPFX2_OUTPORTNAMEPREFIX");
    }

    #[test]
    fn port_name_prefixes_default_to_wineasio_names() {
        let resolved = BridgeConfig::resolve(&[]);
        assert_eq!(resolved.input_port_prefix, "input_");
        assert_eq!(resolved.output_port_prefix, "output_");
    }

    #[test]
    fn missing_file_yields_no_opinion_rather_than_failing() {
        let values = FileSource::new("/nonexistent/path/for/this/test.cfg").read();
        assert_eq!(values, ConfigValues::default());
    }
}
