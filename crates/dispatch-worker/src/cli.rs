//! 命令行参数

use clap::{Args, Parser, Subcommand};

use crate::topology::{Channel, PriorityTier};

/// 多渠道通知调度服务
#[derive(Debug, Parser)]
#[command(name = "dispatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// 启动调度 worker
    Run(RunArgs),
    /// 打印版本信息
    Version,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// 部署渠道
    #[arg(short, long, value_enum, ignore_case = true)]
    pub channel: Channel,

    /// 优先级档位，决定消费 topic 与推送供应商
    #[arg(short, long, value_enum, ignore_case = true, default_value_t = PriorityTier::Normal)]
    pub priority: PriorityTier,
}
