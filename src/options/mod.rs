// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Options sets and time-windowed calibration modifiers.

An [`OptionsSet`] is the long-lived, client-mutable bundle of per-IF
computation options the kernel consumes. Each [`IfOptions`] additionally
carries a list of [`Modifier`]s: time-windowed corrections injected into the
raw visibilities before amplitude/phase are derived.
*/

use crate::codec::{read_vec, write_vec, CodecError, WireDecode, WireEncode, WireReader, WireWriter};

pub mod error;

pub use error::OptionsError;

/// The `100000` MJD sentinel ("all time"/"all future"), preserved from the
/// reference implementation per the open-question note in SPEC_FULL.md §9.
pub const ALL_TIME_END_MJD: f64 = 100_000.0;

/// Polarization index used inside a modifier's per-antenna correction table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModPol {
    X = 0,
    Y = 1,
    /// Cross-pol (XY), carried by its own row since the correction doesn't
    /// split cleanly into per-antenna X/Y contributions.
    XY = 2,
}

/// Averaging method used to reduce a filtered spectrum to one scalar value
/// per baseline/bin (kernel §4.C step 6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, num_derive::FromPrimitive)]
pub enum AveragingMethod {
    VectorMean = 0,
    ScalarMean = 1,
    VectorMedian = 2,
    ScalarMedian = 3,
}

/// Which kind of correction a [`Modifier`] carries. At most one modifier of
/// a given kind may be active for any (MJD, IF) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModifierKind {
    AddDelay,
    AddPhase,
    SetNoiseDiodeAmplitude,
}

/// A time-windowed correction. The per-antenna table is indexed by antenna
/// index (matching `ScanHeader::antennas`'s order) and [`ModPol`].
#[derive(Clone, Debug, PartialEq)]
pub struct Modifier {
    pub start_mjd: f64,
    pub end_mjd: f64,
    pub effect: ModifierEffect,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ModifierEffect {
    /// Delay correction in nanoseconds, indexed `[antenna][pol]`.
    AddDelay(Vec<[f64; 3]>),
    /// Phase correction in radians, indexed `[antenna][pol]`.
    AddPhase(Vec<[f64; 3]>),
    /// Noise-diode amplitude in Jy, indexed `[antenna][pol]`.
    SetNoiseDiodeAmplitude(Vec<[f64; 3]>),
}

impl Modifier {
    pub fn kind(&self) -> ModifierKind {
        match &self.effect {
            ModifierEffect::AddDelay(_) => ModifierKind::AddDelay,
            ModifierEffect::AddPhase(_) => ModifierKind::AddPhase,
            ModifierEffect::SetNoiseDiodeAmplitude(_) => ModifierKind::SetNoiseDiodeAmplitude,
        }
    }

    pub fn contains_mjd(&self, mjd: f64) -> bool {
        self.start_mjd <= mjd && mjd <= self.end_mjd
    }

    /// A zero-initialized modifier of `kind`, spanning all time, for
    /// `num_antennas` antennas. Used by [`add_modifier`] when no template is
    /// supplied.
    pub fn zeroed(kind: ModifierKind, num_antennas: usize) -> Self {
        let table = vec![[0.0; 3]; num_antennas];
        let effect = match kind {
            ModifierKind::AddDelay => ModifierEffect::AddDelay(table),
            ModifierKind::AddPhase => ModifierEffect::AddPhase(table),
            ModifierKind::SetNoiseDiodeAmplitude => {
                ModifierEffect::SetNoiseDiodeAmplitude(table)
            }
        };
        Modifier {
            start_mjd: 0.0,
            end_mjd: ALL_TIME_END_MJD,
            effect,
        }
    }
}

/// Per-IF computation options, plus the frequency/bandwidth/channel triple
/// used only to match this IF's options against a scan header's IF table.
#[derive(Clone, Debug, PartialEq)]
pub struct IfOptions {
    pub centre_freq_hz: f64,
    pub bandwidth_hz: f64,
    pub num_channels: u32,

    pub min_tvchannel: u32,
    pub max_tvchannel: u32,
    pub delay_averaging: u32,
    pub averaging: AveragingMethod,

    pub modifiers: Vec<Modifier>,
}

impl IfOptions {
    /// The active modifier of `kind` at `mjd`, if any (the first one whose
    /// window contains `mjd` — creation is responsible for keeping windows
    /// of the same kind disjoint, so "first" is also "only").
    pub fn active_modifier(&self, kind: ModifierKind, mjd: f64) -> Option<&Modifier> {
        self.modifiers
            .iter()
            .find(|m| m.kind() == kind && m.contains_mjd(mjd))
    }
}

/// A full options set: global flags plus one [`IfOptions`] per IF.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OptionsSet {
    pub phase_in_degrees: bool,
    pub include_flagged: bool,
    /// When true, this set matches any scan header lacking a more specific
    /// match (the "applicable to any" fallback from [`find_options_set`]).
    pub applicable_to_any: bool,
    pub reverse_online: bool,
    pub apply_computed: bool,
    pub ifs: Vec<IfOptions>,
}

impl OptionsSet {
    /// True iff the header's IF count and each IF's (centre frequency,
    /// bandwidth, channel count) equal this set's values within `tol_hz`.
    pub fn matches_header(&self, header: &crate::scan::ScanHeader, tol_hz: f64) -> bool {
        if header.ifs.len() != self.ifs.len() {
            return false;
        }
        header.ifs.iter().zip(self.ifs.iter()).all(|(hw, opt)| {
            (hw.centre_freq_hz - opt.centre_freq_hz).abs() <= tol_hz
                && (hw.bandwidth_hz - opt.bandwidth_hz).abs() <= tol_hz
                && hw.num_channels == opt.num_channels
        })
    }
}

/// Returns the first set in `candidates` whose IF triples match `header`
/// within `tol_hz`; failing that, the first set flagged
/// `applicable_to_any`; failing that, `None`.
pub fn find_options_set<'a>(
    header: &crate::scan::ScanHeader,
    candidates: &'a [OptionsSet],
    tol_hz: f64,
) -> Option<&'a OptionsSet> {
    candidates
        .iter()
        .find(|set| set.matches_header(header, tol_hz))
        .or_else(|| candidates.iter().find(|set| set.applicable_to_any))
}

/// Pushes a new modifier onto `set.ifs[if_index]`'s modifier list. If
/// `template` is `None`, the pushed modifier is [`Modifier::zeroed`] for
/// `kind` spanning all time.
pub fn add_modifier(
    set: &mut OptionsSet,
    if_index: usize,
    num_antennas: usize,
    kind: ModifierKind,
    template: Option<Modifier>,
) {
    let modifier = template.unwrap_or_else(|| Modifier::zeroed(kind, num_antennas));
    set.ifs[if_index].modifiers.push(modifier);
}

/// Removes the modifiers at `indices` from `set.ifs[if_index]`, processing
/// indices in descending order so earlier ones stay valid as later ones are
/// removed.
pub fn remove_modifiers(set: &mut OptionsSet, if_index: usize, indices: &[usize]) {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.dedup();
    let modifiers = &mut set.ifs[if_index].modifiers;
    for i in sorted {
        if i < modifiers.len() {
            modifiers.remove(i);
        }
    }
}

/// Merges `src` into `dst`: every scalar option field is overwritten with
/// `src`'s value, and per-IF modifier lists are concatenated, then coalesced
/// so that two modifiers of the same kind with identical time windows keep
/// only `src`'s (the later one logically wins — "overwriting rather than
/// appending").
pub fn merge_options_set(dst: &mut OptionsSet, src: &OptionsSet) {
    dst.phase_in_degrees = src.phase_in_degrees;
    dst.include_flagged = src.include_flagged;
    dst.reverse_online = src.reverse_online;
    dst.apply_computed = src.apply_computed;

    for (dst_if, src_if) in dst.ifs.iter_mut().zip(src.ifs.iter()) {
        dst_if.min_tvchannel = src_if.min_tvchannel;
        dst_if.max_tvchannel = src_if.max_tvchannel;
        dst_if.delay_averaging = src_if.delay_averaging;
        dst_if.averaging = src_if.averaging;

        for incoming in &src_if.modifiers {
            if let Some(existing) = dst_if.modifiers.iter_mut().find(|m| {
                m.kind() == incoming.kind()
                    && m.start_mjd == incoming.start_mjd
                    && m.end_mjd == incoming.end_mjd
            }) {
                *existing = incoming.clone();
            } else {
                dst_if.modifiers.push(incoming.clone());
            }
        }
    }
}

fn write_table<W: WireWriter>(w: &mut W, table: &[[f64; 3]]) -> Result<(), CodecError> {
    w.write_array_len(table.len())?;
    for row in table {
        for v in row {
            w.write_f64(*v)?;
        }
    }
    Ok(())
}

fn read_table<R: WireReader>(r: &mut R) -> Result<Vec<[f64; 3]>, CodecError> {
    let len = r.read_array_len(None)?;
    (0..len)
        .map(|_| Ok([r.read_f64()?, r.read_f64()?, r.read_f64()?]))
        .collect()
}

impl WireEncode for Modifier {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_f64(self.start_mjd)?;
        w.write_f64(self.end_mjd)?;
        let (kind, table): (i32, &[[f64; 3]]) = match &self.effect {
            ModifierEffect::AddDelay(t) => (0, t),
            ModifierEffect::AddPhase(t) => (1, t),
            ModifierEffect::SetNoiseDiodeAmplitude(t) => (2, t),
        };
        w.write_i32(kind)?;
        write_table(w, table)
    }
}

impl WireDecode for Modifier {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        let start_mjd = r.read_f64()?;
        let end_mjd = r.read_f64()?;
        let kind = r.read_i32()?;
        let table = read_table(r)?;
        let effect = match kind {
            0 => ModifierEffect::AddDelay(table),
            1 => ModifierEffect::AddPhase(table),
            2 => ModifierEffect::SetNoiseDiodeAmplitude(table),
            _ => return Err(CodecError::DecodeValue { context: "ModifierEffect".to_string() }),
        };
        Ok(Modifier { start_mjd, end_mjd, effect })
    }
}

impl AveragingMethod {
    fn to_code(self) -> i32 {
        self as i32
    }

    fn from_code(code: i32) -> Result<Self, CodecError> {
        use num_traits::FromPrimitive;
        Self::from_i32(code).ok_or_else(|| CodecError::DecodeValue { context: "AveragingMethod".to_string() })
    }
}

impl WireEncode for IfOptions {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_f64(self.centre_freq_hz)?;
        w.write_f64(self.bandwidth_hz)?;
        w.write_u32(self.num_channels)?;
        w.write_u32(self.min_tvchannel)?;
        w.write_u32(self.max_tvchannel)?;
        w.write_u32(self.delay_averaging)?;
        w.write_i32(self.averaging.to_code())?;
        write_vec(w, &self.modifiers)
    }
}

impl WireDecode for IfOptions {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        Ok(IfOptions {
            centre_freq_hz: r.read_f64()?,
            bandwidth_hz: r.read_f64()?,
            num_channels: r.read_u32()?,
            min_tvchannel: r.read_u32()?,
            max_tvchannel: r.read_u32()?,
            delay_averaging: r.read_u32()?,
            averaging: AveragingMethod::from_code(r.read_i32()?)?,
            modifiers: read_vec(r, None)?,
        })
    }
}

impl WireEncode for OptionsSet {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_bool(self.phase_in_degrees)?;
        w.write_bool(self.include_flagged)?;
        w.write_bool(self.applicable_to_any)?;
        w.write_bool(self.reverse_online)?;
        w.write_bool(self.apply_computed)?;
        write_vec(w, &self.ifs)
    }
}

impl WireDecode for OptionsSet {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        Ok(OptionsSet {
            phase_in_degrees: r.read_bool()?,
            include_flagged: r.read_bool()?,
            applicable_to_any: r.read_bool()?,
            reverse_online: r.read_bool()?,
            apply_computed: r.read_bool()?,
            ifs: read_vec(r, None)?,
        })
    }
}
