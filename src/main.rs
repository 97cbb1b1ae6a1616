use clap::Parser;

use judge_server::config::CliArgs;
use judge_server::web_server::build_server;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let config = cli.to_config()?;

    config.judger.prepare_directories()?;
    if config.judger.debug {
        log::info!("DEBUG=ON");
    }
    log::info!(
        "Workspaces under {}, checkers under {}",
        config.judger.workspace_base.display(),
        config.judger.spj_exe_dir.display()
    );

    let server = build_server(config)?;
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    server_handle.stop(true).await;
    log::info!("Shutdown complete");
    Ok(())
}
