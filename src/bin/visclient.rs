// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A minimal demonstration client (§6.3, §10): enough of the wire protocol
//! to exercise every request type by hand. Not a terminal UI or plotting
//! client — that surface is explicitly out of scope (§1).

use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use viscorrd::codec::{read_message_async, write_message_async, BufferTransport, WireDecode, WireEncode};
use viscorrd::error::VisError;
use viscorrd::protocol::{generate_client_id, Request, RequestBody, RequestHeader, Response, ResponseBody};

#[derive(Parser, Debug)]
#[command(name = "visclient", author, about = "Demonstration client for viscorrd")]
struct Opt {
    /// Server host.
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,

    /// Server port.
    #[arg(short, long)]
    port: u16,

    /// Username used for broadcast grouping with other clients.
    #[arg(short, long, default_value = "")]
    username: String,

    /// Replay a vis-data snapshot offline instead of connecting.
    #[arg(short, long)]
    file: Option<PathBuf>,
}

fn print_response(resp: &Response) {
    match &resp.body {
        ResponseBody::VisdataComputing => println!("server: computing..."),
        ResponseBody::VisdataComputed => println!("server: vis-data ready, fetch with `current`"),
        ResponseBody::CurrentVisdata { vis } | ResponseBody::ComputedVisdata { vis } => {
            println!("server: {} vis-quantities entries", vis.len())
        }
        ResponseBody::ServerType { kind } => println!("server: type = {kind}"),
        ResponseBody::TimeRange { min_mjd, max_mjd } => println!("server: time range {min_mjd}..{max_mjd}"),
        ResponseBody::CycleTimes { mjds } => println!("server: {} cycle times", mjds.len()),
        ResponseBody::RequestUsername => println!("server: please supply a username"),
        ResponseBody::UsernameExists { .. } => println!("server: a sibling client changed options"),
        ResponseBody::Shutdown => println!("server: shutting down"),
        ResponseBody::Acal { noise_diode_jy } | ResponseBody::AcalComputed { noise_diode_jy } => {
            println!("server: noise diode Jy = {noise_diode_jy:?}")
        }
        ResponseBody::CurrentSpectrum { spectrum } | ResponseBody::SpectrumMjd { spectrum } => match spectrum {
            Some(spectrum) => println!(
                "server: spectrum if {} pol {} ({} baselines)",
                spectrum.if_index,
                spectrum.pol,
                spectrum.baselines.len()
            ),
            None => println!("server: no spectrum found"),
        },
        ResponseBody::ComputeVisdata | ResponseBody::SupplyUsername => {}
    }
}

fn parse_command(line: &str, header: &RequestHeader) -> Option<Request> {
    let mut parts = line.trim().splitn(2, ' ');
    let cmd = parts.next()?.trim();
    let rest = parts.next().unwrap_or("").trim();
    let body = match cmd {
        "compute" => RequestBody::ComputeVisdata { options: Vec::new() },
        "current" => RequestBody::CurrentVisdata,
        "computed" => RequestBody::ComputedVisdata,
        "servertype" => RequestBody::ServerType,
        "timerange" => RequestBody::TimeRange,
        "cycletimes" => RequestBody::CycleTimes,
        "username" => RequestBody::SupplyUsername { username: rest.to_string() },
        "spectrum" => RequestBody::CurrentSpectrum { scan_number: rest.parse().unwrap_or(0) },
        "spectrummjd" => match rest.parse() {
            Ok(mjd) => RequestBody::SpectrumMjd { mjd },
            Err(_) => {
                eprintln!("usage: spectrummjd <mjd>");
                return None;
            }
        },
        "" => return None,
        other => {
            eprintln!("unknown command: {other}");
            return None;
        }
    };
    Some(Request { header: header.clone(), body })
}

async fn run_online(opt: Opt) -> std::io::Result<()> {
    let stream = TcpStream::connect((opt.server.as_str(), opt.port)).await?;
    let (mut read_half, mut write_half) = stream.into_split();

    let header = RequestHeader { client_id: generate_client_id(), client_username: opt.username, client_type: 0 };

    let reader_task = tokio::spawn(async move {
        while let Ok(payload) = read_message_async(&mut read_half).await {
            let mut buf = BufferTransport::from_bytes(payload);
            match Response::decode(&mut buf) {
                Ok(resp) => print_response(&resp),
                Err(e) => eprintln!("decode error: {e}"),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!(
        "connected; commands: compute, current, computed, servertype, timerange, cycletimes, username <name>, spectrum <scan>, spectrummjd <mjd>, quit"
    );
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim() == "quit" || line.trim() == "exit" {
            break;
        }
        if let Some(request) = parse_command(&line, &header) {
            let mut buf = BufferTransport::new();
            if let Err(e) = request.encode(&mut buf) {
                eprintln!("encode error: {e}");
                continue;
            }
            if write_message_async(&mut write_half, &buf.into_bytes()).await.is_err() {
                break;
            }
        }
    }

    reader_task.abort();
    Ok(())
}

fn run_offline(path: &Path) -> Result<(), VisError> {
    let snapshot = viscorrd::snapshot::load(path)?;
    println!(
        "snapshot {}: {} cycles, {} option sets",
        path.display(),
        snapshot.cycle_mjds.len(),
        snapshot.options_sets.len()
    );
    for (cycle_index, mjd) in snapshot.cycle_mjds.iter().enumerate() {
        let num_entries = snapshot.vis_by_cycle.get(cycle_index).map(|v| v.len()).unwrap_or(0);
        println!("  cycle {cycle_index}: mjd {mjd}, {num_entries} vis-quantities entries");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let opt = Opt::parse();

    if let Some(path) = &opt.file {
        return match run_offline(path) {
            Ok(()) => std::process::ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("failed to load {}: {e}", path.display());
                std::process::ExitCode::FAILURE
            }
        };
    }

    match run_online(opt).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("connection failure: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
