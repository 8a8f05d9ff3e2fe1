//! Provides a means to read, parse and hold configuration options for runs.
use clap::{Parser, ValueEnum};
use serde_derive::Deserialize;
use std::fs;
use std::path::PathBuf;

/// Represents the output encoding for probe records.
///   - Json emits one enriched JSON object per probe.
///   - Hex, Base64 and Ascii emit `<address>: <encoded data>` lines.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Hex,
    Base64,
    Ascii,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "bannergrab",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
/// Mass TCP banner grabber.
/// Reads JSON target lines ({"ip": ..., "port": ...}) from stdin, probes each
/// target concurrently, and writes one enriched record per probe to stdout.
/// WARNING Do not point this program at infrastructure you are not authorized
/// to probe.
pub struct Opts {
    /// Number of concurrent connections.
    #[arg(short, long, default_value = "5")]
    pub concurrent: usize,

    /// Seconds to wait for each host to accept the connection.
    #[arg(short, long, default_value = "4")]
    pub timeout: u64,

    /// Seconds to wait for payload writes and banner reads.
    /// Defaults to the connect timeout.
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Output format for responses.
    #[arg(short, long, value_enum, ignore_case = true, default_value = "json")]
    pub format: Format,

    /// Directory containing protocol payloads to send to responsive hosts
    /// ('%s' in a payload is replaced with the host address).
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// JSON file mapping ports to payload file names.
    #[arg(short = 'm', long)]
    pub port_mappings: Option<PathBuf>,

    /// Path to a GeoLite2 database used to annotate results.
    #[arg(short, long)]
    pub geoip: Option<PathBuf>,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// Whether to ignore the configuration file or not.
    #[arg(long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(long, value_parser)]
    pub config_path: Option<PathBuf>,
}

impl Opts {
    pub fn read() -> Self {
        Opts::parse()
    }

    /// Reads the command line arguments into an Opts struct and merge
    /// values found within the user configuration file.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(concurrent, timeout, format);
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(read_timeout, data, port_mappings, geoip, ulimit);
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            concurrent: 5,
            timeout: 4,
            read_timeout: None,
            format: Format::Json,
            data: None,
            port_mappings: None,
            geoip: None,
            ulimit: None,
            no_config: true,
            config_path: None,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[derive(Debug, Deserialize)]
pub struct Config {
    concurrent: Option<usize>,
    timeout: Option<u64>,
    read_timeout: Option<u64>,
    format: Option<Format>,
    data: Option<PathBuf>,
    port_mappings: Option<PathBuf>,
    geoip: Option<PathBuf>,
    ulimit: Option<u64>,
}

impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct.
    ///
    /// # Format
    ///
    /// concurrent = 128
    /// timeout = 2
    /// format = "Json"
    /// geoip = "/var/lib/geoip/GeoLite2-City.mmdb"
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Self {
        let mut content = String::new();
        let config_path = custom_config_path.unwrap_or_else(default_config_path);
        if config_path.exists() {
            content = match fs::read_to_string(config_path) {
                Ok(content) => content,
                Err(_) => String::new(),
            }
        }

        let config: Config = match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                println!("Found {e} in configuration file.\nAborting run.\n");
                std::process::exit(1);
            }
        };

        config
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> PathBuf {
    let Some(mut config_path) = dirs::home_dir() else {
        panic!("Could not infer config file path.");
    };
    config_path.push(".bannergrab.toml");
    config_path
}
