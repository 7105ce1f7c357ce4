//! 配置管理命令
//!
//! 配置文件位于 `<config_dir>/rover/config.toml`，例如：
//!
//! ```toml
//! broker = "192.168.137.1:1883"
//! camera = "http://192.168.137.2:8080/stream"
//!
//! [session]
//! handshake_timeout = 15
//! client_id_prefix = "web-controller"
//! ```

use anyhow::{Context, Result};
use clap::Subcommand;
use rover_sdk::{Endpoint, SessionConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 配置文件路径
fn config_file() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?;
    path.push("rover");
    path.push("config.toml");
    Ok(path)
}

/// CLI 配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// 默认 broker（`host:port`）
    pub broker: Option<String>,

    /// 摄像头视频流地址（仅保存，控制台不使用）
    pub camera: Option<String>,

    /// 会话参数
    pub session: SessionConfig,
}

impl CliConfig {
    /// 从默认位置加载，文件不存在时返回默认配置
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("解析配置文件失败: {}", path.display()))
    }

    /// 保存到默认位置
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("创建配置目录失败")?;
        }

        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, format!("# Rover CLI Configuration\n\n{}", content))
            .context("写入配置文件失败")?;
        Ok(())
    }

    /// 解析默认 broker
    pub fn broker_endpoint(&self) -> Result<Option<Endpoint>> {
        self.broker
            .as_deref()
            .map(|s| s.parse::<Endpoint>().map_err(anyhow::Error::from))
            .transpose()
    }
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 设置配置项
    Set {
        /// 默认 MQTT broker（host:port）
        #[arg(short, long)]
        broker: Option<Endpoint>,

        /// 摄像头视频流地址
        #[arg(short, long)]
        camera: Option<String>,

        /// 握手超时（秒）
        #[arg(short = 't', long)]
        handshake_timeout: Option<f64>,
    },

    /// 获取配置项
    Get {
        /// 配置项名称（broker, camera, handshake_timeout, all）
        #[arg(default_value = "all")]
        key: String,
    },

    /// 检查配置
    Check,
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        let path = config_file()?;
        match self {
            ConfigCommand::Set {
                broker,
                camera,
                handshake_timeout,
            } => Self::set_(&path, broker, camera, handshake_timeout),

            ConfigCommand::Get { key } => {
                let config = CliConfig::load_from(&path)?;
                println!("{}", Self::get_(&config, &key)?);
                Ok(())
            },

            ConfigCommand::Check => Self::check_(&path),
        }
    }

    fn set_(
        path: &Path,
        broker: Option<Endpoint>,
        camera: Option<String>,
        handshake_timeout: Option<f64>,
    ) -> Result<()> {
        let mut config = CliConfig::load_from(path)?;

        if let Some(endpoint) = broker {
            println!("✅ 设置默认 broker: {}", endpoint);
            config.broker = Some(endpoint.to_string());
        }

        if let Some(url) = camera {
            println!("✅ 设置摄像头地址: {}", url);
            config.camera = Some(url);
        }

        if let Some(secs) = handshake_timeout {
            config.session.handshake_timeout =
                Duration::try_from_secs_f64(secs).context("无效的握手超时")?;
            println!("✅ 设置握手超时: {}s", secs);
        }

        config.save_to(path)
    }

    fn get_(config: &CliConfig, key: &str) -> Result<String> {
        let unset = || "(未设置)".to_string();
        let value = match key {
            "broker" => config.broker.clone().unwrap_or_else(unset),
            "camera" => config.camera.clone().unwrap_or_else(unset),
            "handshake_timeout" => {
                format!("{}s", config.session.handshake_timeout.as_secs_f64())
            },
            "all" => format!(
                "Rover CLI 配置:\n  broker: {}\n  camera: {}\n  握手超时: {}s\n  连接主题: {}\n  控制主题前缀: {}",
                config.broker.as_deref().unwrap_or("(未设置)"),
                config.camera.as_deref().unwrap_or("(未设置)"),
                config.session.handshake_timeout.as_secs_f64(),
                config.session.connect_topic,
                config.session.control_topic_base,
            ),
            other => anyhow::bail!("未知配置项: {}", other),
        };
        Ok(value)
    }

    fn check_(path: &Path) -> Result<()> {
        println!("配置文件: {}", path.display());
        let config = CliConfig::load_from(path)?;
        match config.broker_endpoint() {
            Ok(Some(endpoint)) => println!("  broker: {} ✅", endpoint),
            Ok(None) => println!("  broker: (未设置)"),
            Err(e) => println!("  broker: ❌ {}", e),
        }
        println!("  握手超时: {}s", config.session.handshake_timeout.as_secs_f64());
        Ok(())
    }
}
