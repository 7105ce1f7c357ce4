//! 运行模式
//!
//! 目前只有 REPL 模式：交互式 Shell，会话在命令之间保持。

pub mod repl;
