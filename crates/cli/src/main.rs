//! # varnet CLI
//!
//! 命令行接口入口点。
//!
//! 提供：
//! - 拓扑配置加载与验证
//! - 应用构建、运行与生命周期管理
//! - 优雅关闭处理

mod cli;
mod commands;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_info, run_pipeline, run_validate};
use observability::ObservabilityConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging based on CLI options
    let config = ObservabilityConfig {
        log_format: cli.log_format.into(),
        ..ObservabilityConfig::default()
    }
    .with_verbosity(cli.verbose, cli.quiet);
    observability::init_with_config(config)?;

    info!(version = env!("CARGO_PKG_VERSION"), "varnet starting");

    // Execute command
    let result = match &cli.command {
        Commands::Run(args) => run_pipeline(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}
