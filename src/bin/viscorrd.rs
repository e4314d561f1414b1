// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The correlator visibility server (§6.3): binds a listen socket, optionally
//! preloads a vis-data snapshot, and serves clients until interrupted.

use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;
use tokio::net::TcpListener;
use viscorrd::error::VisError;
use viscorrd::server::{Server, ServerData};

#[derive(Parser, Debug)]
#[command(name = "viscorrd", author, about = "Interactive correlator visibility server")]
struct Opt {
    /// Listen port.
    #[arg(short, long)]
    port: u16,

    /// Listen address.
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Preload a vis-data snapshot dumped by a previous session, in place of
    /// a live scan feed.
    #[arg(short, long)]
    load: Option<PathBuf>,

    /// Raise log verbosity; repeatable (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    if std::env::var("RUST_LOG").is_ok() {
        env_logger::init();
        return;
    }
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();
}

async fn run(opt: Opt) -> Result<(), VisError> {
    let mut data = ServerData::default();
    if let Some(path) = &opt.load {
        let snapshot = viscorrd::snapshot::load(path)?;
        log::info!("preloaded snapshot {} ({} cycles)", path.display(), snapshot.cycle_mjds.len());
        data.options_sets = snapshot.options_sets;
        data.latest_vis = snapshot.vis_by_cycle.into_iter().last().unwrap_or_default();
    }

    let listener = TcpListener::bind((opt.bind.as_str(), opt.port))
        .await
        .map_err(|e| VisError::Server(e.into()))?;
    log::info!("listening on {}:{}", opt.bind, opt.port);

    let server = Server::new(data);
    let run_server = server.clone();
    tokio::select! {
        result = run_server.run(listener) => result?,
        _ = tokio::signal::ctrl_c() => {
            log::info!("received interrupt, shutting down");
            server.shutdown().await;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let opt = Opt::parse();
    init_logging(opt.verbose);

    match run(opt).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            std::process::ExitCode::FAILURE
        }
    }
}
