// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Structs and helper methods for the in-memory scan/cycle data model.

A [`Scan`] is one contiguous observation: a [`ScanHeader`] plus the ordered
sequence of [`Cycle`]s read from it. Scans are append-only after creation —
`create_scan` makes the header, `append_cycle` grows the cycle list, and
nothing after that mutates a published scan. This mirrors how `mwalib`
treats a `CorrelatorContext`'s metadata as immutable once read.
*/

use crate::codec::{CodecError, WireDecode, WireEncode, WireReader, WireWriter};
use std::fmt;

pub mod error;

pub use error::ScanError;

/// A channel width at or above this is "continuum"; below it, "zoom".
pub const CONTINUUM_CHANNEL_WIDTH_HZ: f64 = 1.0e6;

/// One antenna in the array: integer label, human name, geocentric Cartesian
/// coordinates in metres.
#[derive(Clone, Debug, PartialEq)]
pub struct Antenna {
    pub label: i32,
    pub name: String,
    pub x_m: f64,
    pub y_m: f64,
    pub z_m: f64,
}

/// One calibrator/target source entry in the scan header's source table.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceEntry {
    pub name: String,
    pub ra_rad: f64,
    pub dec_rad: f64,
}

/// Polarization product carried by a spectrum / vis-quantity record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, num_derive::FromPrimitive)]
pub enum VisPol {
    XX = 0,
    YY = 1,
    XY = 2,
    YX = 3,
}

impl fmt::Display for VisPol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                VisPol::XX => "XX",
                VisPol::YY => "YY",
                VisPol::XY => "XY",
                VisPol::YX => "YX",
            }
        )
    }
}

/// One IF ("window") in the scan header.
#[derive(Clone, Debug, PartialEq)]
pub struct IfWindow {
    /// 1-based label used on the wire and by operators.
    pub label: i32,
    pub centre_freq_hz: f64,
    pub bandwidth_hz: f64,
    pub num_channels: u32,
    pub num_pols: u32,
    /// +1 or -1.
    pub sideband: i8,
    pub chain: i32,
    /// Up to three symbolic names an operator can select this IF by.
    pub names: [String; 3],
    pub pols: Vec<VisPol>,
}

impl IfWindow {
    /// Channel width in Hz: bandwidth divided by channel count.
    pub fn channel_width_hz(&self) -> f64 {
        self.bandwidth_hz / self.num_channels as f64
    }

    pub fn is_continuum(&self) -> bool {
        self.channel_width_hz() >= CONTINUUM_CHANNEL_WIDTH_HZ
    }
}

/// Describes one contiguous observation.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanHeader {
    pub base_date_mjd: f64,
    pub ut_offset_sec: f64,
    pub obs_type: String,
    pub cal_code: String,
    pub cycle_duration_sec: f64,
    pub sources: Vec<SourceEntry>,
    pub antennas: Vec<Antenna>,
    pub ifs: Vec<IfWindow>,
}

/// One correlator output record inside a [`Cycle`]: one baseline, one IF, one
/// polarization product, one bin. `raw` is the complex spectrum for this
/// record, real/imag interleaved (`raw.len() == 2 * num_channels`); `weight`
/// has one entry per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Encoded baseline, see [`baseline_encode`].
    pub baseline: u32,
    /// 0-based index into `ScanHeader::ifs`.
    pub if_index: usize,
    pub pol: VisPol,
    pub bin: u32,
    pub flagged: bool,
    pub raw: Vec<f32>,
    pub weight: Vec<f32>,
}

/// One integration. `mjd_mid` is the MJD of the cycle's midpoint.
#[derive(Clone, Debug, Default)]
pub struct Cycle {
    pub mjd_mid: f64,
    pub records: Vec<Record>,
}

/// A scan header plus its ordered cycles.
#[derive(Clone, Debug)]
pub struct Scan {
    pub header: ScanHeader,
    pub cycles: Vec<Cycle>,
}

/// Creates a new scan with an empty cycle list.
pub fn create_scan(header: ScanHeader) -> Scan {
    Scan {
        header,
        cycles: Vec::new(),
    }
}

/// Appends a zero-length cycle to `scan` and returns its index. The caller
/// is expected to fill in `records` (and `mjd_mid`) via the returned index,
/// since a scan's cycle list is otherwise append-only.
pub fn append_cycle(scan: &mut Scan) -> usize {
    scan.cycles.push(Cycle::default());
    scan.cycles.len() - 1
}

/// Matches `name` against each IF's three symbolic names and returns its
/// 1-based label, or `1` as a safe fallback if nothing matches.
pub fn find_if_by_name(header: &ScanHeader, name: &str) -> i32 {
    find_if_by_name_nosafe(header, name).unwrap_or(1)
}

/// As [`find_if_by_name`], but returns `None` (rather than falling back to 1)
/// when no IF's symbolic names match.
pub fn find_if_by_name_nosafe(header: &ScanHeader, name: &str) -> Option<i32> {
    header
        .ifs
        .iter()
        .find(|w| w.names.iter().any(|n| n == name))
        .map(|w| w.label)
}

/// Encodes an antenna pair as `256*low + high` with `low <= high`.
pub fn baseline_encode(a1: u16, a2: u16) -> u32 {
    let (low, high) = if a1 <= a2 { (a1, a2) } else { (a2, a1) };
    256 * low as u32 + high as u32
}

/// Decodes a baseline encoded by [`baseline_encode`] into `(low, high)` with
/// `low <= high`.
pub fn baseline_decode(b: u32) -> (u16, u16) {
    let high = (b % 256) as u16;
    let low = ((b - high as u32) / 256) as u16;
    (low, high)
}

lazy_static::lazy_static! {
    /// Static catalog mapping a (rounded-to-metre) geocentric offset to a
    /// station-name code. Illustrative of a real telescope's fixed pad
    /// catalog, not an exhaustive one.
    static ref STATION_CATALOG: Vec<((i64, i64, i64), &'static str)> = vec![
        ((-4751640, 2791700, -3200480), "W104"),
        ((-4751691, 2791860, -3200296), "W098"),
        ((-4751739, 2792002, -3200140), "W084"),
        ((-4752146, 2791301, -3200211), "W045"),
        ((-4752680, 2790300, -3200320), "W000"),
        ((-4751512, 2792052, -3200483), "N002"),
        ((-4751330, 2792460, -3200512), "N014"),
    ];

    /// Static array-configuration catalog keyed by the sorted set of station
    /// codes present.
    static ref ARRAY_CONFIG_CATALOG: Vec<(Vec<&'static str>, &'static str)> = vec![
        (vec!["N002", "N014", "W000", "W045", "W084", "W104"], "6A"),
        (vec!["N002", "N014", "W000", "W045", "W084", "W098"], "6B"),
        (vec!["W000", "W045", "W084", "W098", "W104"], "H75"),
    ];
}

fn round_to_metre(v: f64) -> i64 {
    v.round() as i64
}

/// Maps each antenna's Cartesian coordinates to a station-name code via
/// [`STATION_CATALOG`] (tolerance one metre per axis, achieved by rounding),
/// then looks the ordered station list up in [`ARRAY_CONFIG_CATALOG`].
/// Returns the per-antenna station codes and the matched configuration name
/// (`"UNKNOWN"` if the station set isn't in the catalog).
pub fn array_signature(header: &ScanHeader) -> (Vec<String>, String) {
    let stations: Vec<String> = header
        .antennas
        .iter()
        .map(|a| {
            let key = (
                round_to_metre(a.x_m),
                round_to_metre(a.y_m),
                round_to_metre(a.z_m),
            );
            STATION_CATALOG
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, name)| name.to_string())
                .unwrap_or_else(|| "UNKNOWN".to_string())
        })
        .collect();

    let mut sorted = stations.clone();
    sorted.sort();

    let config = ARRAY_CONFIG_CATALOG
        .iter()
        .find(|(set, _)| {
            let mut s = set.iter().map(|s| s.to_string()).collect::<Vec<_>>();
            s.sort();
            s == sorted
        })
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string());

    (stations, config)
}

impl WireEncode for Antenna {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_i32(self.label)?;
        w.write_string(&self.name)?;
        w.write_f64(self.x_m)?;
        w.write_f64(self.y_m)?;
        w.write_f64(self.z_m)
    }
}

impl WireDecode for Antenna {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Antenna {
            label: r.read_i32()?,
            name: r.read_string()?,
            x_m: r.read_f64()?,
            y_m: r.read_f64()?,
            z_m: r.read_f64()?,
        })
    }
}

impl WireEncode for SourceEntry {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_string(&self.name)?;
        w.write_f64(self.ra_rad)?;
        w.write_f64(self.dec_rad)
    }
}

impl WireDecode for SourceEntry {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        Ok(SourceEntry { name: r.read_string()?, ra_rad: r.read_f64()?, dec_rad: r.read_f64()? })
    }
}

impl VisPol {
    fn to_code(self) -> i32 {
        self as i32
    }

    fn from_code(code: i32) -> Result<Self, CodecError> {
        use num_traits::FromPrimitive;
        Self::from_i32(code).ok_or_else(|| CodecError::DecodeValue { context: "VisPol".to_string() })
    }
}

impl WireEncode for VisPol {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_i32(self.to_code())
    }
}

impl WireDecode for VisPol {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        VisPol::from_code(r.read_i32()?)
    }
}

impl WireEncode for IfWindow {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_i32(self.label)?;
        w.write_f64(self.centre_freq_hz)?;
        w.write_f64(self.bandwidth_hz)?;
        w.write_u32(self.num_channels)?;
        w.write_u32(self.num_pols)?;
        w.write_i32(self.sideband as i32)?;
        w.write_i32(self.chain)?;
        for name in &self.names {
            w.write_string(name)?;
        }
        crate::codec::write_vec(w, &self.pols)
    }
}

impl WireDecode for IfWindow {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        let label = r.read_i32()?;
        let centre_freq_hz = r.read_f64()?;
        let bandwidth_hz = r.read_f64()?;
        let num_channels = r.read_u32()?;
        let num_pols = r.read_u32()?;
        let sideband = r.read_i32()? as i8;
        let chain = r.read_i32()?;
        let names = [r.read_string()?, r.read_string()?, r.read_string()?];
        let pols = crate::codec::read_vec(r, None)?;
        Ok(IfWindow { label, centre_freq_hz, bandwidth_hz, num_channels, num_pols, sideband, chain, names, pols })
    }
}

impl WireEncode for ScanHeader {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_f64(self.base_date_mjd)?;
        w.write_f64(self.ut_offset_sec)?;
        w.write_string(&self.obs_type)?;
        w.write_string(&self.cal_code)?;
        w.write_f64(self.cycle_duration_sec)?;
        crate::codec::write_vec(w, &self.sources)?;
        crate::codec::write_vec(w, &self.antennas)?;
        crate::codec::write_vec(w, &self.ifs)
    }
}

impl WireDecode for ScanHeader {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        Ok(ScanHeader {
            base_date_mjd: r.read_f64()?,
            ut_offset_sec: r.read_f64()?,
            obs_type: r.read_string()?,
            cal_code: r.read_string()?,
            cycle_duration_sec: r.read_f64()?,
            sources: crate::codec::read_vec(r, None)?,
            antennas: crate::codec::read_vec(r, None)?,
            ifs: crate::codec::read_vec(r, None)?,
        })
    }
}
