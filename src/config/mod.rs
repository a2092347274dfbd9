//! # Configuration Management Module
//!
//! This module handles all configuration aspects of the Wildcat system, providing
//! a centralized configuration system with validation, defaults, and persistence.
//!
//! ## Configuration Structure
//!
//! The configuration is organized into logical sections:
//!
//! - [`BbsConfig`] - Station identity (name, sysop, location)
//! - [`MeshConfig`] - Node id, primary channel, peer BBS nodes, urgent allow-list
//! - [`StorageConfig`] - Database path
//! - [`SessionConfig`] - Idle session expiry
//! - [`LoggingConfig`] - Logging level and optional file sink
//! - [`WeatherConfig`] - OpenWeatherMap settings (disabled until a key is set)
//! - [`GamesConfig`] - Paths to the trivia and fortune data files
//! - [`MenuConfig`] - Which items each menu presents, in order
//!
//! ## Usage
//!
//! ```rust,no_run
//! use wildcat::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("BBS Name: {}", config.bbs.name);
//!     println!("Peers: {:?}", config.mesh.bbs_nodes);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! Wildcat uses TOML format for human-readable configuration:
//!
//! ```toml
//! [bbs]
//! name = "Wildcat BBS"
//! sysop = "sysop"
//!
//! [mesh]
//! node_id = "!4e1a832c"
//! channel = 0
//! bbs_nodes = ["!7d3f9a10", "!22c481ee"]
//! allowed_nodes = ["!4e1a832c"]
//!
//! [storage]
//! db_path = "bulletins.db"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Station identity and operator details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BbsConfig {
    pub name: String,
    pub sysop: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bbs: BbsConfig,
    pub mesh: MeshConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub games: GamesConfig,
    #[serde(default)]
    pub menu: MenuConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Our own stable node identity (e.g. "!4e1a832c").
    #[serde(default)]
    pub node_id: String,
    /// Primary channel index used for replies and broadcasts.
    pub channel: u8,
    /// Peer BBS nodes that receive replication sync messages. Every peer
    /// must list every other peer for >2-node convergence; fan-out is one hop.
    #[serde(default)]
    pub bbs_nodes: Vec<String>,
    /// Node ids permitted to post on the Urgent board. An empty list permits
    /// everyone.
    #[serde(default)]
    pub allowed_nodes: Vec<String>,
    /// Station position, used for distance records in the stats menu.
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path.
    pub db_path: String,
}

/// Idle session policy. A mid-flow session with no activity for
/// `timeout_minutes` is silently discarded, returning the sender to the
/// top-level command vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub timeout_minutes: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { timeout_minutes: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// OpenWeatherMap API key
    pub api_key: String,
    /// Country code for zipcode lookups (e.g., "US", "GB")
    pub country_code: String,
    /// Cache TTL in minutes
    pub cache_ttl_minutes: u32,
    /// Request timeout in seconds
    pub timeout_seconds: u32,
    /// Enable/disable weather functionality
    pub enabled: bool,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            country_code: "US".to_string(),
            cache_ttl_minutes: 10,
            timeout_seconds: 5,
            enabled: false, // Disabled by default until API key is provided
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GamesConfig {
    pub trivia_file: String,
    pub fortunes_file: String,
}

impl Default for GamesConfig {
    fn default() -> Self {
        Self {
            trivia_file: "data/trivia.txt".to_string(),
            fortunes_file: "data/fortunes.txt".to_string(),
        }
    }
}

/// Menu composition. Items are single-letter codes rendered by the menu
/// builder; unknown codes are skipped so stale configs degrade gracefully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuConfig {
    pub main_menu_items: Vec<String>,
    pub bbs_menu_items: Vec<String>,
    pub utilities_menu_items: Vec<String>,
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            main_menu_items: vec!["B".into(), "U".into(), "Q".into(), "X".into()],
            bbs_menu_items: vec!["M".into(), "B".into(), "C".into(), "X".into()],
            utilities_menu_items: vec![
                "S".into(),
                "N".into(),
                "R".into(),
                "W".into(),
                "G".into(),
                "F".into(),
                "X".into(),
            ],
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bbs: BbsConfig {
                name: "Wildcat BBS".to_string(),
                sysop: "sysop".to_string(),
                location: "Your Location".to_string(),
                description: "A distributed bulletin board for mesh networks".to_string(),
            },
            mesh: MeshConfig {
                node_id: String::new(),
                channel: 0,
                bbs_nodes: Vec::new(),
                allowed_nodes: Vec::new(),
                latitude: None,
                longitude: None,
            },
            storage: StorageConfig {
                db_path: "bulletins.db".to_string(),
            },
            session: SessionConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("wildcat.log".to_string()),
            },
            weather: WeatherConfig::default(),
            games: GamesConfig::default(),
            menu: MenuConfig::default(),
        }
    }
}
