//! XJP Static Host - 静态前端应用托管
//!
//! Usage:
//! - Normal mode: `xjp-static-host`
//! - With custom port: `xjp-static-host --port 19999`
//! - With custom data directory: `xjp-static-host --data-dir /srv/static`

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use xjp_static_host::RuntimeConfig;

/// 解析命令行参数
fn parse_args() -> RuntimeConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RuntimeConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.port_override = args[i + 1].parse().ok();
                i += 2;
            }
            "--data-dir" if i + 1 < args.len() => {
                config.data_dir_override = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                eprintln!("Ignoring unknown argument: {}", other);
                i += 1;
            }
        }
    }

    config
}

fn print_help() {
    println!("XJP Static Host - 静态前端应用托管");
    println!();
    println!("USAGE:");
    println!("    xjp-static-host [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>        Override the listening port");
    println!("    --data-dir <DIR>     Override the data directory");
    println!("    -h, --help           Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    STATIC_HOST_API_KEY  API key for mutating endpoints");
    println!("    RUST_LOG             Log filter (default: info)");
}

fn main() {
    let config = parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(xjp_static_host::run(config)) {
        tracing::error!(error = ?e, "Static host exited with error");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
