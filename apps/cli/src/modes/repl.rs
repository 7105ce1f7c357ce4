//! REPL 模式（交互式 Shell）
//!
//! 专用输入线程 + crossbeam 通道：rustyline 在自己的线程里阻塞读取，
//! 主线程用 `select!` 同时等待用户输入、生命周期事件与 Ctrl+C。

use crate::commands::config::CliConfig;
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, bounded, select};
use rover_sdk::prelude::*;
use rustyline::Editor;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 输入线程收到 Ctrl+C 时发送的标记
const SIGINT_MARKER: &str = "\u{3}SIGINT";

/// Shell 启动参数（配置文件 + 命令行覆盖）
#[derive(Debug, Clone)]
pub struct ShellOptions {
    pub broker: Option<Endpoint>,
    pub session: SessionConfig,
}

impl ShellOptions {
    pub fn resolve(config: CliConfig, broker: Option<Endpoint>, timeout: Option<f64>) -> Result<Self> {
        let broker = match broker {
            Some(endpoint) => Some(endpoint),
            None => config.broker_endpoint()?,
        };
        let mut session = config.session;
        if let Some(secs) = timeout {
            session.handshake_timeout = Duration::try_from_secs_f64(secs).context("无效的握手超时")?;
        }
        Ok(Self { broker, session })
    }
}

/// 一行输入解析出的命令
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Connect(Option<Endpoint>),
    Disconnect,
    Move { x: f64, y: f64 },
    Arm(ArmAction),
    Ai(bool),
    Mode(ControllerState),
    Stop,
    Status,
    ResetMetrics,
    Help,
    Quit,
}

impl ReplCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, args)) = parts.split_first() else {
            anyhow::bail!("空命令");
        };

        let command = match (name, args) {
            ("connect", []) => ReplCommand::Connect(None),
            ("connect", [endpoint]) => ReplCommand::Connect(Some(endpoint.parse()?)),
            ("disconnect", []) => ReplCommand::Disconnect,
            ("move", [x, y]) => ReplCommand::Move {
                x: x.parse().with_context(|| format!("无效的 x: {}", x))?,
                y: y.parse().with_context(|| format!("无效的 y: {}", y))?,
            },
            ("arm", [action]) => {
                ReplCommand::Arm(action.parse().map_err(|e: String| anyhow::anyhow!(e))?)
            },
            ("ai", ["on"]) => ReplCommand::Ai(true),
            ("ai", ["off"]) => ReplCommand::Ai(false),
            ("mode", [target]) => ReplCommand::Mode(target.parse()?),
            ("stop", []) => ReplCommand::Stop,
            ("status", []) => ReplCommand::Status,
            ("metrics", ["reset"]) => ReplCommand::ResetMetrics,
            ("help", []) => ReplCommand::Help,
            ("quit" | "exit", []) => ReplCommand::Quit,
            (
                "connect" | "disconnect" | "move" | "arm" | "ai" | "mode" | "stop" | "status"
                | "metrics" | "help" | "quit" | "exit",
                _,
            ) => anyhow::bail!("参数错误: {}", line.trim()),
            (other, _) => anyhow::bail!("未知命令: {}", other),
        };
        Ok(command)
    }
}

/// REPL 输入（专用输入线程）
pub struct ReplInput {
    command_rx: Receiver<String>,
    _input_thread: thread::JoinHandle<Result<()>>,
}

impl ReplInput {
    /// 创建专用输入线程（保留历史记录）
    pub fn new() -> Self {
        let (command_tx, command_rx) = bounded::<String>(10);

        // Editor 在输入线程内创建，生命周期与 REPL 会话相同
        let input_thread = thread::spawn(move || {
            use rustyline::history::DefaultHistory;

            let mut rl = Editor::<(), DefaultHistory>::new()
                .map_err(|e| anyhow::anyhow!("Failed to initialize readline: {}", e))?;

            let history_path = ".rover_history";
            rl.load_history(history_path).ok(); // 首次运行没有历史文件

            println!("Rover CLI v{} - 交互式 Shell", env!("CARGO_PKG_VERSION"));
            println!("输入 'help' 查看帮助，'quit' 退出");
            println!();

            loop {
                match rl.readline("rover> ") {
                    Ok(line) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }

                        let quitting = line == "exit" || line == "quit";
                        let _ = rl.add_history_entry(line.clone());
                        if command_tx.send(line).is_err() || quitting {
                            break;
                        }
                    },

                    Err(rustyline::error::ReadlineError::Interrupted) => {
                        // Ctrl+C：由主线程执行急停
                        println!("^C");
                        let _ = command_tx.send(SIGINT_MARKER.to_string());
                    },

                    Err(rustyline::error::ReadlineError::Eof) => break,

                    Err(err) => {
                        eprintln!("Error: {:?}", err);
                        break;
                    },
                }
            }

            rl.save_history(history_path).ok();
            Ok(())
        });

        Self {
            command_rx,
            _input_thread: input_thread,
        }
    }
}

/// REPL 会话（保持控制器与观察者通道）
pub struct ReplSession {
    controller: Controller,
    broker: Option<Endpoint>,
}

impl ReplSession {
    pub fn new(controller: Controller, broker: Option<Endpoint>) -> Self {
        Self { controller, broker }
    }

    /// 执行一条命令，返回 `false` 表示退出
    pub fn execute(&mut self, command: ReplCommand) -> Result<bool> {
        match command {
            ReplCommand::Connect(endpoint) => {
                let endpoint = endpoint
                    .or_else(|| self.broker.clone())
                    .ok_or_else(|| anyhow::anyhow!("未指定 broker，使用 'connect host:port'"))?;
                println!("⏳ 连接到 {} ...", endpoint);
                let info = self.controller.connect(endpoint.clone())?;
                self.broker = Some(endpoint);
                println!(
                    "✅ 已连接: {} ↔ {}（控制主题 {}）",
                    info.client_id, info.peer_id, info.control_topic
                );
            },

            ReplCommand::Disconnect => {
                self.controller.disconnect()?;
            },

            ReplCommand::Move { x, y } => {
                self.controller.update_movement(x, y)?;
            },

            ReplCommand::Arm(action) => {
                self.controller.dispatch_arm_action(action)?;
            },

            ReplCommand::Ai(active) => {
                self.controller.set_ai_enabled(active)?;
                println!("✅ AI 已{}", if active { "开启" } else { "关闭" });
            },

            ReplCommand::Mode(target) => {
                self.controller.switch_state(target)?;
                println!("✅ 切换到 {}", target);
            },

            ReplCommand::Stop => self.emergency_stop(),

            ReplCommand::Status => self.print_status(),

            ReplCommand::ResetMetrics => {
                self.controller.reset_metrics();
                println!("✅ 指标已清零");
            },

            ReplCommand::Help => print_help(),

            ReplCommand::Quit => {
                println!("👋 再见！");
                return Ok(false);
            },
        }
        Ok(true)
    }

    /// 急停：移动归零并停止机械臂
    pub fn emergency_stop(&self) {
        if !self.controller.is_connected() {
            eprintln!("⚠️  未连接，无需急停");
            return;
        }

        eprintln!("🛑 急停...");
        let result = self
            .controller
            .update_movement(0.0, 0.0)
            .and_then(|_| self.controller.dispatch_arm_action(ArmAction::Stop));
        match result {
            Ok(()) => eprintln!("✅ 已急停"),
            Err(e) => eprintln!("❌ 急停失败: {}", e),
        }
    }

    fn print_status(&self) {
        let state = self.controller.link_state();
        println!("📊 状态: {}", state.status_text());
        if let Some(info) = self.controller.session_info() {
            println!("  broker: {}", info.endpoint);
            println!("  本端: {}  对端: {}", info.client_id, info.peer_id);
        }
        println!("  控制: {}", self.controller.snapshot());

        let metrics = self.controller.metrics();
        println!(
            "  发布 {} / 去重 {} / 接收 {} / 异常 {}",
            metrics.frames_published,
            metrics.commands_deduplicated,
            metrics.frames_received,
            metrics.malformed_frames
        );
    }
}

/// 运行 REPL 模式
pub fn run_repl(options: ShellOptions) -> Result<()> {
    let (lifecycle_observer, lifecycle_rx) = LifecycleChannel::new();
    let controller = ControllerBuilder::new()
        .config(options.session)
        .observe_lifecycle(Arc::new(lifecycle_observer))
        .build()?;
    let mut session = ReplSession::new(controller, options.broker);

    // 输入线程之外收到的 Ctrl+C（例如连接过程中）
    let (sigint_tx, sigint_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = sigint_tx.try_send(());
    })
    .context("安装 Ctrl+C 处理器失败")?;

    let input = ReplInput::new();

    println!();
    println!("💡 提示: 使用 'connect [host:port]' 连接到机器人");
    println!();

    loop {
        select! {
            recv(input.command_rx) -> line => {
                let Ok(line) = line else { break };

                if line == SIGINT_MARKER {
                    session.emergency_stop();
                    continue;
                }

                let outcome = ReplCommand::parse(&line).and_then(|cmd| session.execute(cmd));
                match outcome {
                    Ok(true) => {},
                    Ok(false) => break,
                    Err(err) => {
                        eprintln!("❌ Error: {}", err);
                        print_help_hint(&line);
                    },
                }
            },

            recv(lifecycle_rx) -> event => {
                if let Ok(event) = event {
                    print_lifecycle(&event);
                }
            },

            recv(sigint_rx) -> _ => {
                eprintln!();
                session.emergency_stop();
            },
        }
    }

    Ok(())
}

fn print_lifecycle(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::Connecting | LifecycleEvent::Connected { .. } => {
            tracing::debug!("lifecycle: {}", event);
        },
        LifecycleEvent::Failed(reason) => eprintln!("❌ 连接失败: {}", reason),
        LifecycleEvent::Lost => eprintln!("⚠️  与机器人的连接已丢失"),
        LifecycleEvent::ClosedByUser => println!("✅ 已断开"),
    }
}

/// 打印帮助信息
fn print_help() {
    println!("可用命令:");
    println!("  connect [host:port]           连接到机器人（默认使用配置的 broker）");
    println!("  disconnect                    断开连接");
    println!("  move <x> <y>                  设置移动向量（各分量在 [-1, 1]）");
    println!("  arm <in|out|grab|reset|save|stop>  机械臂动作");
    println!("  ai <on|off>                   开关 AI 控制");
    println!("  mode <grabbing|roaming|commands>   切换机器人模式");
    println!("  stop                          急停");
    println!("  status                        显示连接与控制状态");
    println!("  metrics reset                 清零运行指标");
    println!("  help                          显示帮助");
    println!("  quit / exit                   退出");
    println!();
    println!("快捷键:");
    println!("  Ctrl+C                        急停");
    println!("  Ctrl+D                        退出");
    println!();
}

/// 提供基于错误的帮助提示
fn print_help_hint(command: &str) {
    if command.starts_with("move") {
        eprintln!("💡 提示: 使用 'move 0 0.8' 前进，分量范围 [-1, 1]");
    } else if command.starts_with("connect") {
        eprintln!("💡 提示: 使用 'connect' 或 'connect 192.168.137.1:1883' 连接到机器人");
    } else if command.starts_with("arm") {
        eprintln!("💡 提示: 可用动作 in, out, grab, reset, save, stop");
    } else if command.starts_with("mode") {
        eprintln!("💡 提示: 可用模式 grabbing, roaming, commands");
    } else {
        eprintln!("💡 提示: 输入 'help' 查看所有命令");
    }
}
