// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end wire protocol test: a real client task talks to a real
//! [`Server`] over a loopback TCP socket, exercising framing, codec, and
//! dispatch together (§4.J, §8).

use std::f64::consts::PI;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use viscorrd::codec::{read_message_async, write_message_async, BufferTransport, WireDecode, WireEncode};
use viscorrd::options::{AveragingMethod, IfOptions, OptionsSet};
use viscorrd::protocol::{generate_client_id, Request, RequestBody, RequestHeader, Response, ResponseBody};
use viscorrd::scan::{self, Antenna, IfWindow, Record, Scan, ScanHeader, SourceEntry, VisPol};
use viscorrd::server::{Server, ServerData};

fn sample_header() -> ScanHeader {
    ScanHeader {
        base_date_mjd: 59000.0,
        ut_offset_sec: 0.0,
        obs_type: "normal".to_string(),
        cal_code: "".to_string(),
        cycle_duration_sec: 10.0,
        sources: vec![SourceEntry { name: "1934-638".to_string(), ra_rad: 0.1, dec_rad: -0.3 }],
        antennas: vec![
            Antenna { label: 1, name: "CA01".to_string(), x_m: 0.0, y_m: 0.0, z_m: 0.0 },
            Antenna { label: 2, name: "CA02".to_string(), x_m: 10.0, y_m: 0.0, z_m: 0.0 },
        ],
        ifs: vec![IfWindow {
            label: 1,
            centre_freq_hz: 2.1e9,
            bandwidth_hz: 32e6,
            num_channels: 32,
            num_pols: 2,
            sideband: 1,
            chain: 1,
            names: ["f1".to_string(), "".to_string(), "".to_string()],
            pols: vec![VisPol::XX, VisPol::YY],
        }],
    }
}

fn channel_freq_hz(ifw: &IfWindow, k: u32) -> f64 {
    let n = ifw.num_channels as f64;
    let channel_width_hz = ifw.bandwidth_hz / n;
    ifw.centre_freq_hz + ifw.sideband as f64 * (k as f64 - (n - 1.0) / 2.0) * channel_width_hz
}

fn synthetic_record(header: &ScanHeader, pol: VisPol, tau_ns: f64) -> Record {
    let ifw = &header.ifs[0];
    let n = ifw.num_channels as usize;
    let mut raw = Vec::with_capacity(2 * n);
    for k in 0..n {
        let f = channel_freq_hz(ifw, k as u32);
        let theta = 2.0 * PI * f * tau_ns * 1e-9;
        raw.push(theta.cos() as f32);
        raw.push(theta.sin() as f32);
    }
    Record { baseline: scan::baseline_encode(0, 1), if_index: 0, pol, bin: 0, flagged: false, raw, weight: vec![1.0; n] }
}

fn sample_options() -> OptionsSet {
    OptionsSet {
        phase_in_degrees: false,
        include_flagged: false,
        applicable_to_any: false,
        reverse_online: false,
        apply_computed: false,
        ifs: vec![IfOptions {
            centre_freq_hz: 2.1e9,
            bandwidth_hz: 32e6,
            num_channels: 32,
            min_tvchannel: 0,
            max_tvchannel: 31,
            delay_averaging: 1,
            averaging: AveragingMethod::ScalarMean,
            modifiers: vec![],
        }],
    }
}

fn seeded_data() -> ServerData {
    let header = sample_header();
    let mut scan = Scan { header: header.clone(), cycles: Vec::new() };
    scan::append_cycle(&mut scan);
    scan.cycles[0].mjd_mid = 59000.5;
    scan.cycles[0].records = vec![
        synthetic_record(&header, VisPol::XX, 2.0),
        synthetic_record(&header, VisPol::YY, 2.0),
    ];
    ServerData { scans: vec![scan], met: vec![vec![]], syscal: vec![vec![]], options_sets: vec![], latest_vis: vec![] }
}

async fn send_request(stream: &mut TcpStream, request: &Request) {
    let mut buf = BufferTransport::new();
    request.encode(&mut buf).unwrap();
    let (_, mut write_half) = stream.split();
    write_message_async(&mut write_half, &buf.into_bytes()).await.unwrap();
}

async fn recv_response(stream: &mut TcpStream) -> Response {
    let (mut read_half, _) = stream.split();
    let payload = timeout(Duration::from_secs(5), read_message_async(&mut read_half)).await.unwrap().unwrap();
    let mut buf = BufferTransport::from_bytes(payload);
    Response::decode(&mut buf).unwrap()
}

fn header_for(client_id: &str) -> RequestHeader {
    RequestHeader { client_id: client_id.to_string(), client_username: String::new(), client_type: 1 }
}

#[tokio::test]
async fn test_servertype_roundtrip_over_tcp() {
    let server = Server::new(ServerData::default());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.run(listener));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let client_id = generate_client_id();
    send_request(&mut stream, &Request { header: header_for(&client_id), body: RequestBody::ServerType }).await;

    let response = recv_response(&mut stream).await;
    assert!(matches!(response.body, ResponseBody::ServerType { kind } if kind == "correlator"));
}

#[tokio::test]
async fn test_compute_and_fetch_visdata_over_tcp() {
    let server = Server::new(seeded_data());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.run(listener));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let client_id = generate_client_id();
    let header = header_for(&client_id);

    send_request(&mut stream, &Request { header: header.clone(), body: RequestBody::ComputeVisdata { options: vec![sample_options()] } }).await;
    let computing = recv_response(&mut stream).await;
    assert!(matches!(computing.body, ResponseBody::VisdataComputing));

    let computed = recv_response(&mut stream).await;
    assert!(matches!(computed.body, ResponseBody::VisdataComputed));

    send_request(&mut stream, &Request { header: header.clone(), body: RequestBody::ComputedVisdata }).await;
    let response = recv_response(&mut stream).await;
    match response.body {
        ResponseBody::ComputedVisdata { vis } => {
            assert!(!vis.is_empty());
            assert!(vis.iter().any(|q| q.pol == VisPol::XX));
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn test_time_range_and_cycle_times_over_tcp() {
    let server = Server::new(seeded_data());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.run(listener));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let client_id = generate_client_id();
    let header = header_for(&client_id);

    send_request(&mut stream, &Request { header: header.clone(), body: RequestBody::TimeRange }).await;
    let response = recv_response(&mut stream).await;
    match response.body {
        ResponseBody::TimeRange { min_mjd, max_mjd } => {
            assert!((min_mjd - 59000.5).abs() < 1e-9);
            assert!((max_mjd - 59000.5).abs() < 1e-9);
        }
        other => panic!("unexpected response: {other:?}"),
    }

    send_request(&mut stream, &Request { header, body: RequestBody::CycleTimes }).await;
    let response = recv_response(&mut stream).await;
    match response.body {
        ResponseBody::CycleTimes { mjds } => assert_eq!(mjds, vec![59000.5]),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn test_username_group_broadcasts_computed_and_username_exists() {
    let server = Server::new(seeded_data());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.run(listener));

    let mut client_a = TcpStream::connect(addr).await.unwrap();
    let mut client_b = TcpStream::connect(addr).await.unwrap();
    let id_a = generate_client_id();
    let id_b = generate_client_id();
    let header_a = header_for(&id_a);
    let header_b = header_for(&id_b);

    send_request(&mut client_a, &Request { header: header_a.clone(), body: RequestBody::SupplyUsername { username: "groupx".to_string() } }).await;
    assert!(matches!(recv_response(&mut client_a).await.body, ResponseBody::SupplyUsername));
    send_request(&mut client_b, &Request { header: header_b.clone(), body: RequestBody::SupplyUsername { username: "groupx".to_string() } }).await;
    assert!(matches!(recv_response(&mut client_b).await.body, ResponseBody::SupplyUsername));

    let options = sample_options();
    send_request(&mut client_a, &Request { header: header_a, body: RequestBody::ComputeVisdata { options: vec![options] } }).await;
    assert!(matches!(recv_response(&mut client_a).await.body, ResponseBody::VisdataComputing));

    // The triggering client hears the computed notice but is excluded from
    // the sibling-changed-options notice (§4.E "every client in the group
    // except the triggerer").
    assert!(matches!(recv_response(&mut client_a).await.body, ResponseBody::VisdataComputed));

    // Its groupmate hears both: the computed notice, then that a sibling's
    // options changed.
    assert!(matches!(recv_response(&mut client_b).await.body, ResponseBody::VisdataComputed));
    assert!(matches!(recv_response(&mut client_b).await.body, ResponseBody::UsernameExists { .. }));
}

#[tokio::test]
async fn test_compute_coalescing_keeps_last_submitted_options() {
    let server = Server::new(seeded_data());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.run(listener));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let client_id = generate_client_id();
    let header = header_for(&client_id);

    // A normal delay_averaging group size yields a finite group delay fit
    // over these 32 channels; an overly coarse one collapses below the
    // minimum 4 bins the fit needs and yields NaN (§4.C step 5).
    let options_fine = OptionsSet { ifs: vec![IfOptions { delay_averaging: 1, ..sample_options().ifs[0].clone() }], ..sample_options() };
    let options_coarse = OptionsSet { ifs: vec![IfOptions { delay_averaging: 16, ..sample_options().ifs[0].clone() }], ..sample_options() };

    send_request(&mut stream, &Request { header: header.clone(), body: RequestBody::ComputeVisdata { options: vec![options_fine] } }).await;
    send_request(&mut stream, &Request { header: header.clone(), body: RequestBody::ComputeVisdata { options: vec![options_coarse] } }).await;

    // Two requests were submitted, so two acks come back, but the "last
    // options set wins" discipline means only the coarse set's results
    // ever land in server state, whether or not the two jobs coalesced
    // into a single run on the watch channel.
    assert!(matches!(recv_response(&mut stream).await.body, ResponseBody::VisdataComputing));
    assert!(matches!(recv_response(&mut stream).await.body, ResponseBody::VisdataComputing));

    let mut settled = None;
    for _ in 0..20 {
        let response = recv_response(&mut stream).await;
        if matches!(response.body, ResponseBody::VisdataComputed) {
            settled = Some(());
            break;
        }
    }
    settled.expect("expected a VisdataComputed notice");

    send_request(&mut stream, &Request { header, body: RequestBody::ComputedVisdata }).await;
    let response = recv_response(&mut stream).await;
    match response.body {
        ResponseBody::ComputedVisdata { vis } => {
            let xx = vis.iter().find(|q| q.pol == VisPol::XX).expect("XX entry");
            let delay = xx.baselines[0].bins[0].delay_ns[0];
            assert!(delay.is_nan(), "expected coarse options' NaN delay fit, got {delay}");
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn test_shutdown_notifies_connected_client() {
    let server = Server::new(ServerData::default());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let run_server = server.clone();
    tokio::spawn(run_server.run(listener));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let client_id = generate_client_id();
    send_request(&mut stream, &Request { header: header_for(&client_id), body: RequestBody::ServerType }).await;
    let _ = recv_response(&mut stream).await;

    server.shutdown().await;
    let response = recv_response(&mut stream).await;
    assert!(matches!(response.body, ResponseBody::Shutdown));
}
