// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
The server runtime (§4.E/§5): one Tokio accept loop, one task per connected
client, and compute dispatched onto `spawn_blocking` so the kernel's
floating-point work never stalls the reactor. `ServerState::Computing`
coalesces further compute requests onto the latest-wins `watch` channel,
matching the reference implementation's "last options set wins" discipline.
*/

pub mod error;

pub use error::ServerError;

use crate::codec::{read_message_async, write_message_async, BufferTransport, WireDecode, WireEncode};
use crate::kernel::{self, MetSnapshot, Spectrum, SyscalSnapshot, VisQuantities};
use crate::options::{find_options_set, OptionsSet};
use crate::protocol::{Request, RequestBody, Response, ResponseBody};
use crate::scan::{Scan, VisPol};
use crate::session::{ClientSession, SessionTable};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex, RwLock};

/// Server state machine (§4.E). `Computing` records the client whose request
/// triggered the recompute, so broadcast can preserve provenance.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerState {
    Ready,
    Computing { client_id: String, options: Vec<OptionsSet> },
    ShuttingDown,
}

/// The canonical, server-owned scan/cycle store plus the option sets and
/// most recently computed vis-quantities (§5 "Shared resources").
#[derive(Default)]
pub struct ServerData {
    pub scans: Vec<Scan>,
    pub met: Vec<Vec<MetSnapshot>>,
    pub syscal: Vec<Vec<SyscalSnapshot>>,
    pub options_sets: Vec<OptionsSet>,
    pub latest_vis: Vec<VisQuantities>,
}

#[derive(Clone)]
struct ComputeJob {
    client_id: String,
    options: Vec<OptionsSet>,
}

pub struct Server {
    data: Arc<RwLock<ServerData>>,
    state: Arc<RwLock<ServerState>>,
    sessions: Arc<Mutex<SessionTable>>,
    compute_tx: watch::Sender<Option<ComputeJob>>,
}

impl Server {
    pub fn new(initial: ServerData) -> Arc<Self> {
        let (compute_tx, compute_rx) = watch::channel(None);
        let server = Arc::new(Server {
            data: Arc::new(RwLock::new(initial)),
            state: Arc::new(RwLock::new(ServerState::Ready)),
            sessions: Arc::new(Mutex::new(SessionTable::new())),
            compute_tx,
        });
        tokio::spawn(Server::compute_worker(server.clone(), compute_rx));
        server
    }

    /// Accepts connections forever, spawning one task per client (§5).
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            let (socket, _addr) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                server.handle_client(socket).await;
            });
        }
    }

    /// The client, not the server, mints the 20-char session ID (§4.F
    /// "Client accounting"); a session is only registered once its first
    /// request header reveals that ID.
    async fn handle_client(self: Arc<Self>, mut socket: TcpStream) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Response>();
        let mut id: Option<String> = None;
        let (mut read_half, mut write_half) = socket.split();

        loop {
            tokio::select! {
                incoming = read_message_async(&mut read_half) => {
                    let payload = match incoming {
                        Ok(payload) => payload,
                        Err(_) => break,
                    };
                    let mut buf = BufferTransport::from_bytes(payload);
                    let request = match Request::decode(&mut buf) {
                        Ok(r) => r,
                        Err(e) => {
                            log::warn!("client {}: decode failure: {e}", id.as_deref().unwrap_or("?"));
                            continue;
                        }
                    };
                    if id.is_none() {
                        let new_id = request.header.client_id.clone();
                        let mut sessions = self.sessions.lock().await;
                        sessions.insert(ClientSession::new(new_id.clone(), request.header.client_type, tx.clone()));
                        log::info!("client {new_id} connected");
                        id = Some(new_id);
                    }
                    let id = id.as_deref().unwrap();
                    let response = self.dispatch(id, request).await;
                    if let Some(response) = response {
                        if send_response(&mut write_half, &response).await.is_err() {
                            break;
                        }
                    }
                }
                outgoing = rx.recv() => {
                    match outgoing {
                        Some(response) => {
                            if send_response(&mut write_half, &response).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        if let Some(id) = &id {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(id);
            log::info!("client {id} disconnected");
        }
    }

    async fn dispatch(&self, client_id: &str, request: Request) -> Option<Response> {
        {
            let mut sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get_mut(client_id) {
                if request.header.client_username != session.username && !request.header.client_username.is_empty() {
                    session.username = request.header.client_username.clone();
                }
            }
        }

        let body = match request.body {
            RequestBody::CurrentSpectrum { scan_number } => {
                let data = self.data.read().await;
                let spectrum = usize::try_from(scan_number)
                    .ok()
                    .and_then(|idx| data.scans.get(idx).map(|scan| (idx, scan)))
                    .and_then(|(idx, scan)| {
                        let cycle_index = scan.cycles.len().checked_sub(1)?;
                        spectrum_for(scan, idx, cycle_index, &data.options_sets, &data.met, &data.syscal)
                    });
                ResponseBody::CurrentSpectrum { spectrum }
            }
            RequestBody::CurrentVisdata => {
                let data = self.data.read().await;
                ResponseBody::CurrentVisdata { vis: data.latest_vis.clone() }
            }
            RequestBody::ComputedVisdata => {
                let data = self.data.read().await;
                ResponseBody::ComputedVisdata { vis: data.latest_vis.clone() }
            }
            RequestBody::ComputeVisdata { options } => {
                return self.dispatch_compute(client_id, options).await;
            }
            RequestBody::ServerType => ResponseBody::ServerType { kind: "correlator".to_string() },
            RequestBody::SpectrumMjd { mjd } => {
                let data = self.data.read().await;
                let spectrum = data.scans.len().checked_sub(1).and_then(|idx| {
                    let scan = &data.scans[idx];
                    let cycle_index = nearest_cycle_index(scan, mjd)?;
                    spectrum_for(scan, idx, cycle_index, &data.options_sets, &data.met, &data.syscal)
                });
                ResponseBody::SpectrumMjd { spectrum }
            }
            RequestBody::TimeRange => {
                let data = self.data.read().await;
                let (min_mjd, max_mjd) = data
                    .scans
                    .last()
                    .map(|scan| {
                        scan.cycles.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| {
                            (lo.min(c.mjd_mid), hi.max(c.mjd_mid))
                        })
                    })
                    .unwrap_or((0.0, 0.0));
                ResponseBody::TimeRange { min_mjd, max_mjd }
            }
            RequestBody::CycleTimes => {
                let data = self.data.read().await;
                let mjds = data.scans.last().map(|s| s.cycles.iter().map(|c| c.mjd_mid).collect()).unwrap_or_default();
                ResponseBody::CycleTimes { mjds }
            }
            RequestBody::SupplyUsername { username } => {
                let mut sessions = self.sessions.lock().await;
                let _ = sessions.set_username(client_id, username);
                ResponseBody::SupplyUsername
            }
            RequestBody::Acal { fluxdensities, .. } => ResponseBody::Acal { noise_diode_jy: fluxdensities.iter().map(|f| *f as f64).collect() },
        };

        Some(Response { client_id: client_id.to_string(), body })
    }

    async fn dispatch_compute(&self, client_id: &str, mut options: Vec<OptionsSet>) -> Option<Response> {
        if matches!(*self.state.read().await, ServerState::ShuttingDown) {
            return Some(Response { client_id: client_id.to_string(), body: ResponseBody::Shutdown });
        }

        if options.is_empty() {
            let sessions = self.sessions.lock().await;
            options = sessions.get(client_id).map(|s| s.last_options.clone()).unwrap_or_default();
        }
        {
            let mut sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get_mut(client_id) {
                session.last_options = options.clone();
                session.pending = true;
            }
        }

        let _ = self.compute_tx.send(Some(ComputeJob { client_id: client_id.to_string(), options }));
        Some(Response { client_id: client_id.to_string(), body: ResponseBody::VisdataComputing })
    }

    /// Background worker: watches for the latest requested compute job and
    /// runs it on the blocking thread pool. A new job arriving mid-compute
    /// simply replaces the watched value — the "last options set wins"
    /// at-most-one-in-flight discipline (§4.E) falls out of `watch`'s
    /// single-slot semantics.
    async fn compute_worker(server: Arc<Server>, mut compute_rx: watch::Receiver<Option<ComputeJob>>) {
        loop {
            if compute_rx.changed().await.is_err() {
                return;
            }
            let job = compute_rx.borrow_and_update().clone();
            let Some(job) = job else { continue };

            *server.state.write().await = ServerState::Computing { client_id: job.client_id.clone(), options: job.options.clone() };
            let started = std::time::Instant::now();

            let data_snapshot = {
                let data = server.data.read().await;
                (data.scans.last().cloned(), data.met.last().cloned().unwrap_or_default(), data.syscal.last().cloned().unwrap_or_default())
            };

            let options_for_compute = job.options.clone();
            let result = tokio::task::spawn_blocking(move || compute_all(data_snapshot, options_for_compute)).await;

            match result {
                Ok(Ok(vis)) => {
                    {
                        let mut data = server.data.write().await;
                        data.latest_vis = vis;
                        if let Some(opts) = job.options.first() {
                            data.options_sets = job.options.clone();
                            let _ = opts;
                        }
                    }
                    log::info!("compute for client {} completed in {:?}", job.client_id, started.elapsed());

                    let username = {
                        let sessions = server.sessions.lock().await;
                        sessions.get(&job.client_id).map(|s| s.username.clone())
                    };
                    if let Some(username) = username {
                        if !username.is_empty() {
                            let sessions = server.sessions.lock().await;
                            let computed = Response { client_id: String::new(), body: ResponseBody::VisdataComputed };
                            sessions.broadcast_to_group(&username, None, &computed);
                            let reuse = Response {
                                client_id: String::new(),
                                body: ResponseBody::UsernameExists { options: job.options.first().cloned().unwrap_or_default() },
                            };
                            sessions.broadcast_to_group(&username, Some(&job.client_id), &reuse);
                        } else if let Some(session) = server.sessions.lock().await.get(&job.client_id) {
                            let _ = session.send(Response { client_id: String::new(), body: ResponseBody::VisdataComputed });
                        }
                    }
                }
                Ok(Err(e)) => log::warn!("compute for client {} failed: {e}", job.client_id),
                Err(e) => log::warn!("compute task for client {} panicked: {e}", job.client_id),
            }

            {
                let mut sessions = server.sessions.lock().await;
                if let Some(session) = sessions.get_mut(&job.client_id) {
                    session.pending = false;
                }
            }
            *server.state.write().await = ServerState::Ready;
        }
    }

    /// Broadcasts a shutdown notice to every connected client and moves the
    /// server to `SHUTTING_DOWN` (§4.E).
    pub async fn shutdown(&self) {
        *self.state.write().await = ServerState::ShuttingDown;
        let sessions = self.sessions.lock().await;
        let notice = Response { client_id: String::new(), body: ResponseBody::Shutdown };
        for session in sessions.iter_in_order() {
            let _ = session.send(notice.clone());
        }
    }
}

fn compute_all(
    snapshot: (Option<Scan>, Vec<MetSnapshot>, Vec<SyscalSnapshot>),
    options: Vec<OptionsSet>,
) -> Result<Vec<VisQuantities>, ServerError> {
    let (scan, met_table, syscal_table) = snapshot;
    let Some(scan) = scan else { return Ok(Vec::new()) };

    let opts = match find_options_set(&scan.header, &options, 1.0) {
        Some(opts) => opts.clone(),
        None => return Ok(Vec::new()),
    };

    let mut results = Vec::new();
    for (cycle_index, cycle) in scan.cycles.iter().enumerate() {
        let met = met_table.get(cycle_index).cloned().unwrap_or_default();
        let syscal = syscal_table.get(cycle_index).cloned().unwrap_or_default();
        for (if_index, ifw) in scan.header.ifs.iter().enumerate() {
            for &pol in &ifw.pols {
                // A kernel failure on one if/pol (bad selection, singular
                // design matrix, ...) marks this entry degraded and moves on;
                // it never aborts the rest of the cycle loop.
                let spectrum = match kernel::compute_spectrum(&scan.header, cycle, if_index, pol, &opts, &met, &syscal) {
                    Ok(spectrum) => spectrum,
                    Err(e) => {
                        log::warn!("cycle {cycle_index} if {if_index} pol {pol}: kernel failed: {e}");
                        results.push(kernel::degraded_vis_quantities(if_index, pol));
                        continue;
                    }
                };
                let averaging = opts.ifs[if_index].averaging;
                let xy_companion = if pol == VisPol::XX || pol == VisPol::YY {
                    kernel::compute_spectrum(&scan.header, cycle, if_index, VisPol::XY, &opts, &met, &syscal).ok()
                } else {
                    None
                };
                results.push(kernel::reduce_to_vis_quantities(&spectrum, averaging, xy_companion.as_ref()));
            }
        }
    }
    Ok(results)
}

/// Nearest cycle to `mjd` by midpoint, or `None` if the scan has no cycles.
fn nearest_cycle_index(scan: &Scan, mjd: f64) -> Option<usize> {
    scan.cycles
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (a.mjd_mid - mjd).abs().partial_cmp(&(b.mjd_mid - mjd).abs()).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
}

/// Builds the single displayed spectrum for `CURRENT_SPECTRUM`/`SPECTRUM_MJD`:
/// the scan's first IF and that IF's first polarization, since neither
/// request carries an if/pol selector (§6.1).
fn spectrum_for(
    scan: &Scan,
    scan_index: usize,
    cycle_index: usize,
    options_sets: &[OptionsSet],
    met_table: &[Vec<MetSnapshot>],
    syscal_table: &[Vec<SyscalSnapshot>],
) -> Option<Spectrum> {
    let cycle = scan.cycles.get(cycle_index)?;
    let ifw = scan.header.ifs.first()?;
    let pol = *ifw.pols.first()?;
    let opts = find_options_set(&scan.header, options_sets, 1.0)?;
    let met = met_table.get(scan_index).and_then(|c| c.get(cycle_index)).cloned().unwrap_or_default();
    let syscal = syscal_table.get(scan_index).and_then(|c| c.get(cycle_index)).cloned().unwrap_or_default();
    kernel::compute_spectrum(&scan.header, cycle, 0, pol, opts, &met, &syscal).ok()
}

async fn send_response<W>(w: &mut W, response: &Response) -> Result<(), crate::codec::CodecError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut buf = BufferTransport::new();
    response.encode(&mut buf)?;
    write_message_async(w, &buf.into_bytes()).await
}
