//! Dashboard configuration.
//!
//! Defaults are overridden by an optional TOML file, which is in turn overridden by
//! command-line flags.

use crate::cli::Cli;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "local.toml";
const CONFIG_DIR: &str = "local-first";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerSection,
    pub build: BuildSection,
    pub dashboard: DashboardSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
    pub dev: bool,
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub restart_cooldown: Duration,
    #[serde(with = "humantime_serde")]
    pub readiness_timeout: Option<Duration>,
    pub stop_on_quit: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: 8080,
            dev: true,
            binary: PathBuf::from("./bin/server"),
            args: Vec::new(),
            workdir: PathBuf::from("."),
            settle_delay: Duration::from_millis(500),
            restart_cooldown: Duration::from_secs(2),
            readiness_timeout: None,
            stop_on_quit: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    pub tool: String,
    pub targets: Vec<String>,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            tool: "make".into(),
            targets: vec!["wasm".into(), "server".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardSection {
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    pub request_window: usize,
    pub log_window: usize,
    pub state_dir: PathBuf,
}

impl Default for DashboardSection {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(1),
            request_window: 50,
            log_window: 50,
            state_dir: PathBuf::from(".local-first"),
        }
    }
}

/// Fully resolved settings used by the rest of the program.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSection,
    pub build: BuildSection,
    pub dashboard: DashboardSection,
    /// File the settings were read from, if any.
    pub source: Option<PathBuf>,
}

impl Settings {
    /// Resolve settings from the config file (if any) and CLI overrides.
    pub fn load(args: &Cli) -> Result<Self> {
        let (file, source) = match args.config.as_deref() {
            Some(path) => (read_file(path)?, Some(path.to_path_buf())),
            None => match discover() {
                Some(path) => (read_file(&path)?, Some(path)),
                None => (FileConfig::default(), None),
            },
        };
        let mut settings = Settings {
            server: file.server,
            build: file.build,
            dashboard: file.dashboard,
            source,
        };
        settings.apply_overrides(args);
        Ok(settings)
    }

    fn apply_overrides(&mut self, args: &Cli) {
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if args.no_dev {
            self.server.dev = false;
        }
        if let Some(binary) = args.binary.as_ref() {
            self.server.binary = binary.clone();
        }
        if let Some(d) = args.settle_delay {
            self.server.settle_delay = d.into();
        }
        if let Some(d) = args.restart_cooldown {
            self.server.restart_cooldown = d.into();
        }
        if let Some(d) = args.readiness_timeout {
            self.server.readiness_timeout = Some(d.into());
        }
        if args.stop_on_quit {
            self.server.stop_on_quit = true;
        }
        if let Some(d) = args.refresh {
            self.dashboard.refresh_interval = d.into();
        }
        if let Some(dir) = args.state_dir.as_ref() {
            self.dashboard.state_dir = dir.clone();
        }
    }

    /// Arguments passed to the server binary.
    pub fn server_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.server.dev {
            args.push("-dev".to_string());
        }
        args.push("-port".to_string());
        args.push(self.server.port.to_string());
        args.extend(self.server.args.iter().cloned());
        args
    }

    pub fn log_file(&self) -> PathBuf {
        self.dashboard.state_dir.join("cli.log")
    }

    pub fn request_log_file(&self) -> PathBuf {
        self.dashboard.state_dir.join(crate::requests::REQUEST_LOG_FILE)
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.server.port)
    }
}

fn discover() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }
    let user = dirs::config_dir()?.join(CONFIG_DIR).join(CONFIG_FILE);
    user.is_file().then_some(user)
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    parse(&text).with_context(|| format!("parse config {}", path.display()))
}

pub(crate) fn parse(text: &str) -> Result<FileConfig> {
    Ok(toml::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn settings_from(file: FileConfig, argv: &[&str]) -> Settings {
        let args = Cli::parse_from(std::iter::once("local-first").chain(argv.iter().copied()));
        let mut s = Settings {
            server: file.server,
            build: file.build,
            dashboard: file.dashboard,
            source: None,
        };
        s.apply_overrides(&args);
        s
    }

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert!(cfg.server.dev);
        assert_eq!(cfg.server.settle_delay, Duration::from_millis(500));
        assert_eq!(cfg.server.restart_cooldown, Duration::from_secs(2));
        assert_eq!(cfg.build.targets, vec!["wasm", "server"]);
        assert_eq!(cfg.dashboard.refresh_interval, Duration::from_secs(1));
        assert_eq!(cfg.dashboard.request_window, 50);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse(
            r#"
            [server]
            port = 9000
            settle_delay = "750ms"
            readiness_timeout = "5s"

            [dashboard]
            refresh_interval = "250ms"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert!(cfg.server.dev);
        assert_eq!(cfg.server.settle_delay, Duration::from_millis(750));
        assert_eq!(cfg.server.readiness_timeout, Some(Duration::from_secs(5)));
        assert_eq!(cfg.dashboard.refresh_interval, Duration::from_millis(250));
        assert_eq!(cfg.build.tool, "make");
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(parse("[server]\nport = \"eighty\"").is_err());
    }

    #[test]
    fn cli_flags_override_file() {
        let file = parse("[server]\nport = 9000\n").unwrap();
        let s = settings_from(file, &["--port", "7000", "--no-dev", "--refresh", "2s"]);
        assert_eq!(s.server.port, 7000);
        assert!(!s.server.dev);
        assert_eq!(s.dashboard.refresh_interval, Duration::from_secs(2));
        assert_eq!(s.server_args(), vec!["-port", "7000"]);
    }

    #[test]
    fn server_args_include_dev_flag_and_extras() {
        let file = parse("[server]\nargs = [\"-static\", \"./web\"]\n").unwrap();
        let s = settings_from(file, &[]);
        assert_eq!(s.server_args(), vec!["-dev", "-port", "8080", "-static", "./web"]);
        assert_eq!(s.url(), "http://localhost:8080");
        assert_eq!(s.request_log_file(), PathBuf::from(".local-first/requests.jsonl"));
    }
}
