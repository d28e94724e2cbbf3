use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use rover::{
    configuration::AppConfig,
    dispatcher::OperationRequest,
    logging,
    ports::{replay_gps::ReplayGps, serial_engine::SerialEngine, Ports},
    vehicle::Vehicle,
};
use std::{path::PathBuf, sync::Arc};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::*;

#[derive(Parser, Debug)]
#[command(
    version,
    author = "David M. Weis <dweis7@gmail.com>",
    about = "Rover"
)]
struct Args {
    /// path to config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbosity: u8,

    /// Log as json
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_tracing(args.verbosity, args.json);

    let app_config = AppConfig::load_config(&args.config)?;

    let mut ports = Ports::default();
    if let Some(engine_config) = &app_config.engine {
        ports = ports.with_engine(Arc::new(SerialEngine::open(engine_config)?));
    }
    if let Some(replay_config) = &app_config.gps_replay {
        ports = ports.with_gps(Arc::new(ReplayGps::open(replay_config).await?));
    }

    let mut vehicle = Vehicle::new(ports, app_config.control.clone());
    vehicle.start();

    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received");
                break;
            }
            line = lines.next() => {
                let line = match line {
                    Some(Ok(line)) => line,
                    Some(Err(err)) => {
                        error!("Failed to read stdin: {}", err);
                        break;
                    }
                    None => {
                        info!("Stdin closed");
                        break;
                    }
                };
                handle_line(&vehicle, line.trim()).await;
            }
        }
    }

    vehicle.shutdown().await;
    Ok(())
}

async fn handle_line(vehicle: &Vehicle, line: &str) {
    if line.is_empty() {
        return;
    }
    if line.eq_ignore_ascii_case("status") {
        match serde_json::to_string_pretty(&vehicle.state().snapshot()) {
            Ok(status) => println!("{}", status),
            Err(err) => error!("Failed to serialize status: {}", err),
        }
        return;
    }
    let request = if line.starts_with('{') {
        match serde_json::from_str::<OperationRequest>(line) {
            Ok(request) => request,
            Err(err) => {
                warn!("Malformed request {:?}: {}", line, err);
                return;
            }
        }
    } else {
        OperationRequest::from_text(line)
    };
    match vehicle.dispatcher().handle(&request).await {
        Ok(()) => println!("ok, mode {}", vehicle.state().mode()),
        Err(err) => println!("rejected: {}", err),
    }
}
