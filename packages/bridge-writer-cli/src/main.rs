use anyhow::{Context, Result};
use bridge_writer::{
    chain::RpcConnection,
    compliance::ComplianceGate,
    metrics::WriterMetrics,
    proposal::DryRunProposer,
    Config, Message, Writer,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 验证并解析配置文件
    ValidateConfig {
        /// 配置文件路径（.json 或 .toml）
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// 对消息执行 KYT 合规检查
    Screen {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        /// 消息文件路径（JSON）
        #[arg(short, long, value_name = "FILE")]
        message: PathBuf,
    },
    /// 解析消息（空跑，不向链上提交）
    Resolve {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        message: PathBuf,
    },
}

fn load_message(path: &Path) -> Result<Message> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read message file {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse message file {:?}", path))
}

/// 收到 Ctrl-C 时置位停止信号
fn stop_on_ctrl_c() -> watch::Receiver<bool> {
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl-C, stopping");
            if stop_tx.send(true).is_err() {
                warn!("Stop signal has no receivers left");
            }
        }
    });
    stop_rx
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig { config } => {
            info!("Validating config file: {:?}", config);
            let config = Config::load(config)?;
            println!("配置文件验证成功!");
            println!("- 目标链: {} ({})", config.chain.name, config.chain.id);
            println!("  - 节点: {}", config.chain.endpoint);
            println!("  - 桥合约: {}", config.chain.bridge_address);
            println!("  - 中继地址: {}", config.chain.relayer_address);
            println!("- 合规检查:");
            println!("  - 监控链: {} ({})", config.compliance.monitored_chain, config.compliance.network);
            println!("  - 服务地址: {}", config.compliance.endpoint);
            println!("  - 超时: {}s", config.compliance.timeout_secs);
            Ok(())
        }
        Commands::Screen { config, message } => {
            let config = Config::load(config)?;
            let message = load_message(&message)?;
            let gate = ComplianceGate::from_config(&config.compliance)?;

            if !gate.applies_to(&message) {
                println!(
                    "源链 {} 不在检查范围内（监控链为 {}）",
                    message.source,
                    gate.monitored_chain()
                );
                return Ok(());
            }

            let stop = stop_on_ctrl_c();
            match gate.screen(&message, &stop).await {
                Ok(()) => {
                    println!("合规检查通过");
                    Ok(())
                }
                Err(e) => {
                    error!("Compliance check failed: {}", e);
                    Err(e.into())
                }
            }
        }
        Commands::Resolve { config, message } => {
            let config = Config::load(config)?;
            let message = load_message(&message)?;

            // 空跑不访问节点，不调用 writer.start()，连接只用于构造 writer
            let conn = RpcConnection::new(&config.chain.endpoint, config.compliance.timeout())?;
            let (sys_tx, mut sys_rx) = mpsc::unbounded_channel();
            let metrics = Arc::new(WriterMetrics::new());
            let mut writer = Writer::new(
                Arc::new(conn),
                &config,
                stop_on_ctrl_c(),
                sys_tx,
                Some(metrics.clone()),
            )?;
            writer.set_proposal_handler(Arc::new(DryRunProposer));

            let resolved = writer.resolve_message(&message).await;
            while let Ok(fatal) = sys_rx.try_recv() {
                error!("Fatal writer error: {}", fatal);
            }

            let snapshot = metrics.snapshot();
            println!("空跑模式，未连接节点 {}", config.chain.endpoint);
            println!("处理结果: {}", resolved);
            println!("- 合规拒绝次数: {}", snapshot.compliance_rejections);
            Ok(())
        }
    }
}
