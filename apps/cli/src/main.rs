//! # Rover CLI
//!
//! 移动机器人遥操作控制台。
//!
//! ```bash
//! # 配置默认 broker
//! rover-cli config set --broker 192.168.137.1:1883
//!
//! # 启动交互式 Shell
//! $ rover-cli shell
//! rover> connect
//! rover> move 0 0.8
//! rover> arm out
//! rover> disconnect
//! rover> quit
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use rover_sdk::Endpoint;

mod commands;
mod modes;

use commands::ConfigCommand;
use commands::config::CliConfig;
use modes::repl::{ShellOptions, run_repl};

/// Rover CLI - 移动机器人遥操作控制台
#[derive(Parser, Debug)]
#[command(name = "rover-cli")]
#[command(about = "Operator console for rover teleoperation over MQTT", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 启动交互式 Shell（REPL 模式）
    Shell {
        /// MQTT broker 地址（host:port），覆盖配置文件
        #[arg(short, long)]
        broker: Option<Endpoint>,

        /// 握手超时（秒），覆盖配置文件
        #[arg(short, long)]
        timeout: Option<f64>,
    },
}

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        "rover_cli=info"
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid log directive: {}", e))?,
    );
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(),

        Commands::Shell { broker, timeout } => {
            let config = CliConfig::load()?;
            let options = ShellOptions::resolve(config, broker, timeout)?;
            run_repl(options)
        },
    }
}
