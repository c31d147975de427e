use clap::Parser;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "grok-rs")]
#[command(version, about = "Grok Token 池管理服务", long_about = None)]
pub struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<String>,

    /// 数据目录（覆盖配置文件中的 dataDir）
    #[arg(short, long)]
    pub data_dir: Option<String>,
}
