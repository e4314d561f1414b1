// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
On-disk vis-data snapshot I/O (§4.G / §6.2): `dump` serializes a
[`VisDataSnapshot`] header-first using the same codec as the wire protocol;
`load` reverses it. Used by `viscorrd --load` to preload a captured session
and by the demonstration client's `--file` mode to replay one offline.
*/

pub mod error;

pub use error::SnapshotError;

use crate::codec::{read_vec, write_vec, FileTransport, WireDecode, WireEncode, WireReader, WireWriter};
use crate::kernel::{MetSnapshot, SyscalSnapshot, VisQuantities};
use crate::options::OptionsSet;
use crate::scan::ScanHeader;
use std::path::Path;

/// Everything a client needs to replay a session offline: the scan header,
/// one meteorological/syscal snapshot per cycle, the vis-quantities computed
/// for each cycle (one entry per IF/polarization), and the option sets used.
#[derive(Clone, Debug, PartialEq)]
pub struct VisDataSnapshot {
    pub header: ScanHeader,
    pub cycle_mjds: Vec<f64>,
    pub vis_by_cycle: Vec<Vec<VisQuantities>>,
    pub met: Vec<MetSnapshot>,
    pub syscal: Vec<SyscalSnapshot>,
    pub options_sets: Vec<OptionsSet>,
}

pub fn dump(path: &Path, snapshot: &VisDataSnapshot) -> Result<(), SnapshotError> {
    let mut f = FileTransport::create(path)?;

    let (min_mjd, max_mjd) = snapshot
        .cycle_mjds
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &m| (lo.min(m), hi.max(m)));
    let (min_mjd, max_mjd) = if snapshot.cycle_mjds.is_empty() { (0.0, 0.0) } else { (min_mjd, max_mjd) };

    f.write_u32(snapshot.cycle_mjds.len() as u32)?;
    f.write_f64(min_mjd)?;
    f.write_f64(max_mjd)?;
    snapshot.header.encode(&mut f)?;
    for mjd in &snapshot.cycle_mjds {
        f.write_f64(*mjd)?;
    }
    for per_cycle in &snapshot.vis_by_cycle {
        write_vec(&mut f, per_cycle)?;
    }
    write_vec(&mut f, &snapshot.met)?;
    write_vec(&mut f, &snapshot.syscal)?;
    write_vec(&mut f, &snapshot.options_sets)?;
    f.flush()?;
    Ok(())
}

pub fn load(path: &Path) -> Result<VisDataSnapshot, SnapshotError> {
    let mut f = FileTransport::open(path)?;

    let num_cycles = f.read_u32()? as usize;
    let _min_mjd = f.read_f64()?;
    let _max_mjd = f.read_f64()?;
    let header = ScanHeader::decode(&mut f)?;
    let cycle_mjds: Vec<f64> = (0..num_cycles).map(|_| f.read_f64()).collect::<Result<_, _>>()?;
    let vis_by_cycle = (0..num_cycles).map(|_| read_vec(&mut f, None)).collect::<Result<_, _>>()?;
    let met = read_vec(&mut f, Some(num_cycles))?;
    let syscal = read_vec(&mut f, Some(num_cycles))?;
    let options_sets = read_vec(&mut f, None)?;

    Ok(VisDataSnapshot { header, cycle_mjds, vis_by_cycle, met, syscal, options_sets })
}
