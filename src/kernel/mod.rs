// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
The amp-phase kernel (§4.C): turns one cycle's raw correlator records for a
chosen IF/polarization into a [`Spectrum`], then reduces a spectrum to
[`VisQuantities`]. Baseline computation is embarrassingly parallel and runs
across `rayon`'s thread pool; the kernel never mutates its inputs.
*/

use crate::codec::{
    read_complex_array, read_vec, write_complex_array, write_vec, CodecError, WireDecode, WireEncode, WireReader,
    WireWriter,
};
use crate::options::{AveragingMethod, ModifierEffect, ModifierKind, OptionsSet};
use crate::scan::{baseline_decode, Cycle, IfWindow, Record, ScanHeader, VisPol};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::f64::consts::PI;

pub mod error;
#[cfg(test)]
mod test;

pub use error::KernelError;

/// A scalar reading with a validity flag, as the correlator reports met and
/// syscal fields it couldn't measure this cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ValidValue {
    pub value: f64,
    pub valid: bool,
}

/// Meteorological snapshot for one cycle (§3 "Meteorological info").
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetSnapshot {
    pub temperature: ValidValue,
    pub pressure: ValidValue,
    pub humidity: ValidValue,
    pub wind_speed: ValidValue,
    pub wind_direction: ValidValue,
    pub rain: ValidValue,
    pub seeing_phase: ValidValue,
    pub seeing_rms: ValidValue,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AntennaSyscal {
    pub parallactic_angle_rad: f64,
    pub track_err_max: f64,
    pub track_err_rms: f64,
    pub coarse_flag: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CrosstalkEntry {
    pub phase_rad: f64,
    pub amp: f64,
}

/// One antenna/IF/pol's Tsys bookkeeping. `gtp`, `sdo`, and `caljy` feed the
/// gated-cal computed-Tsys estimator `(gtp * caljy) / (2 * sdo)` — the
/// standard synchronous-demodulation identity collapses the textbook
/// `GTP_on - GTP_off` denominator to `2 * sdo`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TsysEntry {
    pub online_tsys: f64,
    pub online_tsys_applied: bool,
    pub computed_tsys: f64,
    pub computed_tsys_applied: bool,
    pub gtp: f64,
    pub sdo: f64,
    pub caljy: f64,
}

/// Per-cycle syscal data. `tsys` and `crosstalk` are indexed
/// `[antenna][if]`/`[antenna][if][pol]`; the pol row is 0 = X, 1 = Y (§3
/// "Syscal data").
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyscalSnapshot {
    pub antennas: Vec<AntennaSyscal>,
    pub crosstalk: Vec<Vec<CrosstalkEntry>>,
    pub tsys: Vec<Vec<[TsysEntry; 2]>>,
}

impl SyscalSnapshot {
    fn tsys_entry(&self, antenna_index: usize, if_index: usize, pol_row: usize) -> Option<&TsysEntry> {
        self.tsys.get(antenna_index)?.get(if_index)?.get(pol_row)
    }
}

/// Running min/max over amplitude, phase, real, and imaginary parts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MinMax {
    pub min_amp: f32,
    pub max_amp: f32,
    pub min_phase: f32,
    pub max_phase: f32,
    pub min_real: f32,
    pub max_real: f32,
    pub min_imag: f32,
    pub max_imag: f32,
}

impl MinMax {
    pub(crate) fn empty() -> Self {
        MinMax {
            min_amp: f32::INFINITY,
            max_amp: f32::NEG_INFINITY,
            min_phase: f32::INFINITY,
            max_phase: f32::NEG_INFINITY,
            min_real: f32::INFINITY,
            max_real: f32::NEG_INFINITY,
            min_imag: f32::INFINITY,
            max_imag: f32::NEG_INFINITY,
        }
    }

    fn update(&mut self, amp: f32, phase: f32, re: f32, im: f32) {
        self.min_amp = self.min_amp.min(amp);
        self.max_amp = self.max_amp.max(amp);
        self.min_phase = self.min_phase.min(phase);
        self.max_phase = self.max_phase.max(phase);
        self.min_real = self.min_real.min(re);
        self.max_real = self.max_real.max(re);
        self.min_imag = self.min_imag.min(im);
        self.max_imag = self.max_imag.max(im);
    }

    fn merge(&mut self, other: &MinMax) {
        self.min_amp = self.min_amp.min(other.min_amp);
        self.max_amp = self.max_amp.max(other.max_amp);
        self.min_phase = self.min_phase.min(other.min_phase);
        self.max_phase = self.max_phase.max(other.max_phase);
        self.min_real = self.min_real.min(other.min_real);
        self.max_real = self.max_real.max(other.max_real);
        self.min_imag = self.min_imag.min(other.min_imag);
        self.max_imag = self.max_imag.max(other.max_imag);
    }
}

/// One bin's worth of channel data for one baseline: full and flagged-excluded
/// ("filtered", `f_*`) parallel arrays, plus the fitted group delay.
#[derive(Clone, Debug, PartialEq)]
pub struct BinSpectrum {
    pub bin: u32,
    pub weight: Vec<f32>,
    pub raw: Vec<(f32, f32)>,
    pub amp: Vec<f32>,
    pub phase: Vec<f32>,
    pub f_channel: Vec<u32>,
    pub f_weight: Vec<f32>,
    pub f_raw: Vec<(f32, f32)>,
    pub f_amp: Vec<f32>,
    pub f_phase: Vec<f32>,
    /// Fitted group delay in nanoseconds; `NaN` if fewer than 4 binned points
    /// survived flagging.
    pub delay_ns: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BaselineSpectrum {
    pub baseline: u32,
    pub bins: Vec<BinSpectrum>,
    pub minmax: MinMax,
    /// Set when every channel of every bin on this baseline was flagged.
    pub flagged_bad: bool,
}

/// The per-IF, per-polarization derived product for one cycle (§3
/// "Spectrum").
#[derive(Clone, Debug, PartialEq)]
pub struct Spectrum {
    pub if_index: usize,
    pub pol: VisPol,
    pub options: OptionsSet,
    pub met: MetSnapshot,
    pub syscal: SyscalSnapshot,
    pub baselines: Vec<BaselineSpectrum>,
    pub minmax: MinMax,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BinVis {
    pub bin: u32,
    pub amp: f32,
    pub phase: f32,
    /// `[0]` is this polarization's delay; `[1]` is the companion
    /// cross-polarization delay, populated only for same-antenna
    /// ("autocorrelation") baselines when a companion spectrum is supplied.
    pub delay_ns: [f64; 2],
}

#[derive(Clone, Debug, PartialEq)]
pub struct BaselineVis {
    pub baseline: u32,
    pub bins: Vec<BinVis>,
}

/// The cycle-level scalar reduction from a [`Spectrum`] (§3 "Vis-quantities").
#[derive(Clone, Debug, PartialEq)]
pub struct VisQuantities {
    pub if_index: usize,
    pub pol: VisPol,
    pub baselines: Vec<BaselineVis>,
    pub minmax: MinMax,
    /// Set when the kernel failed to compute this if/pol for this cycle
    /// (`baselines` is empty); the cycle loop emits this marker and moves on
    /// rather than aborting the whole job (§4.C "kernel failures").
    pub degraded: bool,
}

/// A placeholder entry for an if/pol the kernel failed to compute this cycle.
pub fn degraded_vis_quantities(if_index: usize, pol: VisPol) -> VisQuantities {
    VisQuantities { if_index, pol, baselines: Vec::new(), minmax: MinMax::empty(), degraded: true }
}

fn channel_freq_hz(ifw: &IfWindow, k: u32) -> f64 {
    let n = ifw.num_channels as f64;
    ifw.centre_freq_hz + ifw.sideband as f64 * (k as f64 - (n - 1.0) / 2.0) * ifw.channel_width_hz()
}

/// Net per-antenna-pair correction read out of a modifier's `[antenna][pol]`
/// table (§4.B). `XX`/`YY` take the straightforward per-antenna difference;
/// a cross-pol product only has one physically meaningful contributor, so
/// `XY` reads antenna 2's row and `YX` reads antenna 1's — the pair's "high"
/// antenna is conventionally the Y end (see DESIGN.md).
fn pair_correction(table: &[[f64; 3]], ant1: Option<usize>, ant2: Option<usize>, pol: VisPol) -> f64 {
    let row = |idx: Option<usize>, pol_row: usize| -> f64 {
        idx.and_then(|i| table.get(i)).map(|r| r[pol_row]).unwrap_or(0.0)
    };
    match pol {
        VisPol::XX => row(ant1, 0) - row(ant2, 0),
        VisPol::YY => row(ant1, 1) - row(ant2, 1),
        VisPol::XY => row(ant2, 2),
        VisPol::YX => row(ant1, 2),
    }
}

fn antenna_index(header: &ScanHeader, label: u16) -> Option<usize> {
    header.antennas.iter().position(|a| a.label == label as i32)
}

fn rotate(raw: &mut [(f32, f32)], theta: f64) {
    let (s, c) = theta.sin_cos();
    for ch in raw.iter_mut() {
        let (re, im) = (ch.0 as f64, ch.1 as f64);
        *ch = ((re * c - im * s) as f32, (re * s + im * c) as f32);
    }
}

fn unwrap_phase(phases: &mut [f64]) {
    for i in 1..phases.len() {
        loop {
            let diff = phases[i] - phases[i - 1];
            if diff > PI {
                phases[i] -= 2.0 * PI;
            } else if diff < -PI {
                phases[i] += 2.0 * PI;
            } else {
                break;
            }
        }
    }
}

/// Weighted least-squares slope of `phi = 2*pi*tau*f + phi0` in `tau` (in
/// seconds, since `freq_hz` is in Hz). `None` if the weighted design matrix
/// is singular.
fn weighted_line_slope(freq_hz: &[f64], phase_rad: &[f64], weight: &[f64]) -> Option<f64> {
    let (mut sw, mut swf, mut swp, mut swff, mut swfp) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for ((f, p), w) in freq_hz.iter().zip(phase_rad).zip(weight) {
        sw += w;
        swf += w * f;
        swp += w * p;
        swff += w * f * f;
        swfp += w * f * p;
    }
    let denom = sw * swff - swf * swf;
    if denom.abs() < 1e-30 {
        return None;
    }
    let slope = (sw * swfp - swf * swp) / denom;
    Some(slope / (2.0 * PI))
}

/// Group delay fit (§4.C step 5): bin `delay_averaging` consecutive channels,
/// unwrap phase, fit a weighted line, and convert slope to nanoseconds with
/// the sideband sign applied.
fn fit_group_delay(
    channels: &[u32],
    raw: &[(f32, f32)],
    weight: &[f32],
    ifw: &IfWindow,
    delay_averaging: u32,
) -> f64 {
    let group = delay_averaging.max(1) as usize;
    let mut bin_freq = Vec::new();
    let mut bin_re = Vec::new();
    let mut bin_im = Vec::new();
    let mut bin_weight = Vec::new();

    let mut i = 0;
    while i < channels.len() {
        let end = (i + group).min(channels.len());
        let n = (end - i) as f64;
        let (mut re, mut im, mut freq, mut w) = (0.0, 0.0, 0.0, 0.0);
        for k in i..end {
            re += raw[k].0 as f64;
            im += raw[k].1 as f64;
            freq += channel_freq_hz(ifw, channels[k]);
            w += weight[k] as f64;
        }
        bin_re.push(re / n);
        bin_im.push(im / n);
        bin_freq.push(freq / n);
        bin_weight.push(w / n);
        i = end;
    }

    if bin_freq.len() < 4 {
        return f64::NAN;
    }

    let mut phase: Vec<f64> = bin_re.iter().zip(&bin_im).map(|(re, im)| im.atan2(*re)).collect();
    unwrap_phase(&mut phase);

    match weighted_line_slope(&bin_freq, &phase, &bin_weight) {
        Some(tau_sec) => tau_sec * 1e9 * ifw.sideband as f64,
        None => f64::NAN,
    }
}

/// Computes the amp-phase spectrum for one cycle, IF, and polarization
/// (§4.C steps 1-5). Never mutates `cycle`.
pub fn compute_spectrum(
    header: &ScanHeader,
    cycle: &Cycle,
    if_index: usize,
    pol: VisPol,
    options: &OptionsSet,
    met: &MetSnapshot,
    syscal: &SyscalSnapshot,
) -> Result<Spectrum, KernelError> {
    let ifw = header.ifs.get(if_index).ok_or(KernelError::BadSelectionIf(if_index))?;
    if !ifw.pols.contains(&pol) {
        return Err(KernelError::BadSelectionPol(pol.to_string()));
    }
    let if_opts = options.ifs.get(if_index).ok_or(KernelError::BadSelectionIf(if_index))?;
    if if_opts.min_tvchannel > if_opts.max_tvchannel || if_opts.max_tvchannel >= ifw.num_channels {
        return Err(KernelError::BadSelectionChannelRange { num_channels: ifw.num_channels });
    }

    let degrees = options.phase_in_degrees;
    let mjd = cycle.mjd_mid;
    let num_channels = ifw.num_channels as usize;

    let delay_table = if_opts.active_modifier(ModifierKind::AddDelay, mjd).and_then(|m| match &m.effect {
        ModifierEffect::AddDelay(t) => Some(t.clone()),
        _ => None,
    });
    let phase_table = if_opts.active_modifier(ModifierKind::AddPhase, mjd).and_then(|m| match &m.effect {
        ModifierEffect::AddPhase(t) => Some(t.clone()),
        _ => None,
    });
    let noise_diode_table = if_opts
        .active_modifier(ModifierKind::SetNoiseDiodeAmplitude, mjd)
        .and_then(|m| match &m.effect {
            ModifierEffect::SetNoiseDiodeAmplitude(t) => Some(t.clone()),
            _ => None,
        });

    let mut grouped: BTreeMap<u32, BTreeMap<u32, &Record>> = BTreeMap::new();
    for record in &cycle.records {
        if record.if_index == if_index && record.pol == pol {
            grouped.entry(record.baseline).or_default().insert(record.bin, record);
        }
    }
    let baseline_keys: Vec<u32> = grouped.keys().copied().collect();

    let baselines: Vec<BaselineSpectrum> = baseline_keys
        .par_iter()
        .map(|&baseline| {
            let (low, high) = baseline_decode(baseline);
            let ant1 = antenna_index(header, low);
            let ant2 = antenna_index(header, high);

            let bins: Vec<BinSpectrum> = grouped[&baseline]
                .values()
                .map(|record| {
                    let mut raw: Vec<(f32, f32)> =
                        (0..num_channels).map(|k| (record.raw[2 * k], record.raw[2 * k + 1])).collect();
                    let weight = record.weight.clone();

                    if let Some(table) = &delay_table {
                        let dtau_sec = pair_correction(table, ant1, ant2, pol) * 1e-9;
                        for (k, cell) in raw.iter_mut().enumerate() {
                            let f = channel_freq_hz(ifw, k as u32);
                            let pair = std::slice::from_mut(cell);
                            rotate(pair, -2.0 * PI * f * dtau_sec);
                        }
                    }
                    if let Some(table) = &phase_table {
                        let dphi = pair_correction(table, ant1, ant2, pol);
                        rotate(&mut raw, -dphi);
                    }

                    if options.reverse_online {
                        let row1 = if pol == VisPol::YY { 1 } else { 0 };
                        let row2 = if pol == VisPol::XX { 0 } else { 1 };
                        let e1 = ant1.and_then(|a| syscal.tsys_entry(a, if_index, row1));
                        let e2 = ant2.and_then(|a| syscal.tsys_entry(a, if_index, row2));
                        if let (Some(e1), Some(e2)) = (e1, e2) {
                            if e1.online_tsys_applied && e2.online_tsys_applied {
                                let scale = (e1.online_tsys * e2.online_tsys).sqrt();
                                if scale > 0.0 {
                                    for ch in raw.iter_mut() {
                                        ch.0 = (ch.0 as f64 / scale) as f32;
                                        ch.1 = (ch.1 as f64 / scale) as f32;
                                    }
                                }
                            }
                            if options.apply_computed {
                                let caljy = |ant: Option<usize>, row: usize, fallback: f64| -> f64 {
                                    noise_diode_table
                                        .as_ref()
                                        .and_then(|t| ant.and_then(|a| t.get(a)))
                                        .map(|r| r[row])
                                        .unwrap_or(fallback)
                                };
                                let t1 = (e1.gtp * caljy(ant1, row1, e1.caljy)) / (2.0 * e1.sdo);
                                let t2 = (e2.gtp * caljy(ant2, row2, e2.caljy)) / (2.0 * e2.sdo);
                                let scale = (t1 * t2).sqrt();
                                if scale.is_finite() {
                                    for ch in raw.iter_mut() {
                                        ch.0 = (ch.0 as f64 * scale) as f32;
                                        ch.1 = (ch.1 as f64 * scale) as f32;
                                    }
                                }
                            }
                        }
                    }

                    let amp: Vec<f32> = raw.iter().map(|(re, im)| re.hypot(*im)).collect();
                    let phase: Vec<f32> = raw
                        .iter()
                        .map(|(re, im)| {
                            let p = im.atan2(*re);
                            if degrees {
                                p.to_degrees()
                            } else {
                                p
                            }
                        })
                        .collect();

                    let mut f_channel = Vec::new();
                    let mut f_weight = Vec::new();
                    let mut f_raw = Vec::new();
                    let mut f_amp = Vec::new();
                    let mut f_phase = Vec::new();

                    for k in 0..num_channels {
                        let ku = k as u32;
                        let hard_invalid = weight[k] <= 0.0 || raw[k].0.is_nan() || raw[k].1.is_nan();
                        let soft_flagged =
                            record.flagged || ku < if_opts.min_tvchannel || ku > if_opts.max_tvchannel;
                        let flagged = hard_invalid || (soft_flagged && !options.include_flagged);
                        if !flagged {
                            f_channel.push(ku);
                            f_weight.push(weight[k]);
                            f_raw.push(raw[k]);
                            f_amp.push(amp[k]);
                            f_phase.push(phase[k]);
                        }
                    }

                    let delay_ns = fit_group_delay(&f_channel, &f_raw, &f_weight, ifw, if_opts.delay_averaging);

                    BinSpectrum {
                        bin: record.bin,
                        weight,
                        raw,
                        amp,
                        phase,
                        f_channel,
                        f_weight,
                        f_raw,
                        f_amp,
                        f_phase,
                        delay_ns,
                    }
                })
                .collect();

            let mut minmax = MinMax::empty();
            let mut any_filtered = false;
            for bin in &bins {
                for (i, &(re, im)) in bin.f_raw.iter().enumerate() {
                    any_filtered = true;
                    minmax.update(bin.f_amp[i], bin.f_phase[i], re, im);
                }
            }

            BaselineSpectrum { baseline, bins, minmax, flagged_bad: !any_filtered }
        })
        .collect();

    let mut minmax = MinMax::empty();
    for b in &baselines {
        if !b.flagged_bad {
            minmax.merge(&b.minmax);
        }
    }

    Ok(Spectrum { if_index, pol, options: options.clone(), met: met.clone(), syscal: syscal.clone(), baselines, minmax })
}

fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return f32::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn reduce_amp_phase(bin: &BinSpectrum, method: AveragingMethod) -> (f32, f32) {
    if bin.f_raw.is_empty() {
        return (f32::NAN, f32::NAN);
    }
    match method {
        AveragingMethod::VectorMean => {
            let n = bin.f_raw.len() as f32;
            let (sre, sim) = bin.f_raw.iter().fold((0.0f32, 0.0f32), |(sre, sim), (re, im)| (sre + re, sim + im));
            let (re, im) = (sre / n, sim / n);
            (re.hypot(im), im.atan2(re))
        }
        AveragingMethod::ScalarMean => {
            let n = bin.f_amp.len() as f32;
            let amp = bin.f_amp.iter().sum::<f32>() / n;
            let (ssin, scos) =
                bin.f_phase.iter().fold((0.0f32, 0.0f32), |(ssin, scos), p| (ssin + p.sin(), scos + p.cos()));
            (amp, ssin.atan2(scos))
        }
        AveragingMethod::VectorMedian => {
            let re = median(&bin.f_raw.iter().map(|(re, _)| *re).collect::<Vec<_>>());
            let im = median(&bin.f_raw.iter().map(|(_, im)| *im).collect::<Vec<_>>());
            (re.hypot(im), im.atan2(re))
        }
        AveragingMethod::ScalarMedian => (median(&bin.f_amp), median(&bin.f_phase)),
    }
}

/// Reduces a spectrum to vis-quantities (§4.C step 6). `xy_companion`, when
/// given, supplies the cross-polarization delay stored at `delay_ns[1]` for
/// autocorrelation baselines (both ends the same antenna).
pub fn reduce_to_vis_quantities(
    spectrum: &Spectrum,
    averaging: AveragingMethod,
    xy_companion: Option<&Spectrum>,
) -> VisQuantities {
    let baselines: Vec<BaselineVis> = spectrum
        .baselines
        .par_iter()
        .map(|bs| {
            let (low, high) = baseline_decode(bs.baseline);
            let is_auto = low == high;
            let companion_bins = xy_companion
                .and_then(|c| c.baselines.iter().find(|b| b.baseline == bs.baseline))
                .map(|b| &b.bins);

            let bins: Vec<BinVis> = bs
                .bins
                .iter()
                .map(|bin| {
                    let (amp, phase) = reduce_amp_phase(bin, averaging);
                    let companion_delay = if is_auto {
                        companion_bins
                            .and_then(|cb| cb.iter().find(|c| c.bin == bin.bin))
                            .map(|c| c.delay_ns)
                            .unwrap_or(f64::NAN)
                    } else {
                        f64::NAN
                    };
                    BinVis { bin: bin.bin, amp, phase, delay_ns: [bin.delay_ns, companion_delay] }
                })
                .collect();

            BaselineVis { baseline: bs.baseline, bins }
        })
        .collect();

    let mut minmax = MinMax::empty();
    for b in &spectrum.baselines {
        if !b.flagged_bad {
            minmax.merge(&b.minmax);
        }
    }

    VisQuantities { if_index: spectrum.if_index, pol: spectrum.pol, baselines, minmax, degraded: false }
}

/// One closure-phase triangle value over baselines (i,j), (j,ref), (ref,i).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClosurePhase {
    pub antenna_i: i32,
    pub antenna_j: i32,
    pub bin: u32,
    pub closure_rad: f64,
}

/// Closure phase over `ref_label` for every baseline triangle in `vis`
/// (§4.C step 7). Swapping a pair's endpoints negates its contribution,
/// since a baseline's stored phase is directional (low antenna to high).
pub fn closure_phase(header: &ScanHeader, vis: &VisQuantities, ref_label: i32) -> Vec<ClosurePhase> {
    let mut by_pair: BTreeMap<(u16, u16), &BaselineVis> = BTreeMap::new();
    for bv in &vis.baselines {
        by_pair.insert(baseline_decode(bv.baseline), bv);
    }

    let phase_at = |a: i32, b: i32, bin: u32| -> Option<f64> {
        let (a, b) = (a as u16, b as u16);
        let (lo, hi, sign) = if a <= b { (a, b, 1.0) } else { (b, a, -1.0) };
        by_pair
            .get(&(lo, hi))
            .and_then(|bv| bv.bins.iter().find(|bin_v| bin_v.bin == bin))
            .map(|bin_v| sign * bin_v.phase as f64)
    };

    let labels: Vec<i32> = header.antennas.iter().map(|a| a.label).filter(|&l| l != ref_label).collect();
    let bins: Vec<u32> = vis.baselines.first().map(|b| b.bins.iter().map(|x| x.bin).collect()).unwrap_or_default();

    let mut out = Vec::new();
    for (idx, &i) in labels.iter().enumerate() {
        for &j in &labels[idx + 1..] {
            for &bin in &bins {
        if let (Some(p_ij), Some(p_jref), Some(p_refi)) =
                    (phase_at(i, j, bin), phase_at(j, ref_label, bin), phase_at(ref_label, i, bin))
                {
                    out.push(ClosurePhase { antenna_i: i, antenna_j: j, bin, closure_rad: p_ij + p_jref + p_refi });
                }
            }
        }
    }
    out
}

impl WireEncode for ValidValue {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_f64(self.value)?;
        w.write_bool(self.valid)
    }
}

impl WireDecode for ValidValue {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        Ok(ValidValue { value: r.read_f64()?, valid: r.read_bool()? })
    }
}

impl WireEncode for MetSnapshot {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        self.temperature.encode(w)?;
        self.pressure.encode(w)?;
        self.humidity.encode(w)?;
        self.wind_speed.encode(w)?;
        self.wind_direction.encode(w)?;
        self.rain.encode(w)?;
        self.seeing_phase.encode(w)?;
        self.seeing_rms.encode(w)
    }
}

impl WireDecode for MetSnapshot {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        Ok(MetSnapshot {
            temperature: ValidValue::decode(r)?,
            pressure: ValidValue::decode(r)?,
            humidity: ValidValue::decode(r)?,
            wind_speed: ValidValue::decode(r)?,
            wind_direction: ValidValue::decode(r)?,
            rain: ValidValue::decode(r)?,
            seeing_phase: ValidValue::decode(r)?,
            seeing_rms: ValidValue::decode(r)?,
        })
    }
}

impl WireEncode for AntennaSyscal {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_f64(self.parallactic_angle_rad)?;
        w.write_f64(self.track_err_max)?;
        w.write_f64(self.track_err_rms)?;
        w.write_bool(self.coarse_flag)
    }
}

impl WireDecode for AntennaSyscal {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        Ok(AntennaSyscal {
            parallactic_angle_rad: r.read_f64()?,
            track_err_max: r.read_f64()?,
            track_err_rms: r.read_f64()?,
            coarse_flag: r.read_bool()?,
        })
    }
}

impl WireEncode for CrosstalkEntry {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_f64(self.phase_rad)?;
        w.write_f64(self.amp)
    }
}

impl WireDecode for CrosstalkEntry {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        Ok(CrosstalkEntry { phase_rad: r.read_f64()?, amp: r.read_f64()? })
    }
}

impl WireEncode for TsysEntry {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_f64(self.online_tsys)?;
        w.write_bool(self.online_tsys_applied)?;
        w.write_f64(self.computed_tsys)?;
        w.write_bool(self.computed_tsys_applied)?;
        w.write_f64(self.gtp)?;
        w.write_f64(self.sdo)?;
        w.write_f64(self.caljy)
    }
}

impl WireDecode for TsysEntry {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        Ok(TsysEntry {
            online_tsys: r.read_f64()?,
            online_tsys_applied: r.read_bool()?,
            computed_tsys: r.read_f64()?,
            computed_tsys_applied: r.read_bool()?,
            gtp: r.read_f64()?,
            sdo: r.read_f64()?,
            caljy: r.read_f64()?,
        })
    }
}

impl WireEncode for SyscalSnapshot {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        write_vec(w, &self.antennas)?;
        w.write_array_len(self.crosstalk.len())?;
        for per_if in &self.crosstalk {
            write_vec(w, per_if)?;
        }
        w.write_array_len(self.tsys.len())?;
        for per_if in &self.tsys {
            w.write_array_len(per_if.len())?;
            for pair in per_if {
                pair[0].encode(w)?;
                pair[1].encode(w)?;
            }
        }
        Ok(())
    }
}

impl WireDecode for SyscalSnapshot {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        let antennas = read_vec(r, None)?;
        let n_crosstalk = r.read_array_len(None)?;
        let crosstalk = (0..n_crosstalk).map(|_| read_vec(r, None)).collect::<Result<_, _>>()?;
        let n_tsys = r.read_array_len(None)?;
        let tsys = (0..n_tsys)
            .map(|_| {
                let n = r.read_array_len(None)?;
                (0..n).map(|_| Ok([TsysEntry::decode(r)?, TsysEntry::decode(r)?])).collect::<Result<_, CodecError>>()
            })
            .collect::<Result<_, CodecError>>()?;
        Ok(SyscalSnapshot { antennas, crosstalk, tsys })
    }
}

impl WireEncode for BinVis {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_u32(self.bin)?;
        w.write_f32(self.amp)?;
        w.write_f32(self.phase)?;
        w.write_f64(self.delay_ns[0])?;
        w.write_f64(self.delay_ns[1])
    }
}

impl WireDecode for BinVis {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        Ok(BinVis {
            bin: r.read_u32()?,
            amp: r.read_f32()?,
            phase: r.read_f32()?,
            delay_ns: [r.read_f64()?, r.read_f64()?],
        })
    }
}

impl WireEncode for BaselineVis {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_u32(self.baseline)?;
        write_vec(w, &self.bins)
    }
}

impl WireDecode for BaselineVis {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        Ok(BaselineVis { baseline: r.read_u32()?, bins: read_vec(r, None)? })
    }
}

impl WireEncode for VisQuantities {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_u32(self.if_index as u32)?;
        self.pol.encode(w)?;
        write_vec(w, &self.baselines)?;
        w.write_bool(self.degraded)
    }
}

impl WireDecode for VisQuantities {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        let if_index = r.read_u32()? as usize;
        let pol = VisPol::decode(r)?;
        let baselines = read_vec(r, None)?;
        let degraded = r.read_bool()?;
        Ok(VisQuantities { if_index, pol, baselines, minmax: MinMax::empty(), degraded })
    }
}

impl WireEncode for MinMax {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_f32(self.min_amp)?;
        w.write_f32(self.max_amp)?;
        w.write_f32(self.min_phase)?;
        w.write_f32(self.max_phase)?;
        w.write_f32(self.min_real)?;
        w.write_f32(self.max_real)?;
        w.write_f32(self.min_imag)?;
        w.write_f32(self.max_imag)
    }
}

impl WireDecode for MinMax {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        Ok(MinMax {
            min_amp: r.read_f32()?,
            max_amp: r.read_f32()?,
            min_phase: r.read_f32()?,
            max_phase: r.read_f32()?,
            min_real: r.read_f32()?,
            max_real: r.read_f32()?,
            min_imag: r.read_f32()?,
            max_imag: r.read_f32()?,
        })
    }
}

fn write_f32_vec<W: WireWriter>(w: &mut W, values: &[f32]) -> Result<(), CodecError> {
    w.write_array_len(values.len())?;
    for v in values {
        w.write_f32(*v)?;
    }
    Ok(())
}

fn read_f32_vec<R: WireReader>(r: &mut R, expected: Option<usize>) -> Result<Vec<f32>, CodecError> {
    let len = r.read_array_len(expected)?;
    (0..len).map(|_| r.read_f32()).collect()
}

fn write_u32_vec<W: WireWriter>(w: &mut W, values: &[u32]) -> Result<(), CodecError> {
    w.write_array_len(values.len())?;
    for v in values {
        w.write_u32(*v)?;
    }
    Ok(())
}

fn read_u32_vec<R: WireReader>(r: &mut R, expected: Option<usize>) -> Result<Vec<u32>, CodecError> {
    let len = r.read_array_len(expected)?;
    (0..len).map(|_| r.read_u32()).collect()
}

impl WireEncode for BinSpectrum {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_u32(self.bin)?;
        write_f32_vec(w, &self.weight)?;
        write_complex_array(w, &self.raw)?;
        write_f32_vec(w, &self.amp)?;
        write_f32_vec(w, &self.phase)?;
        write_u32_vec(w, &self.f_channel)?;
        write_f32_vec(w, &self.f_weight)?;
        write_complex_array(w, &self.f_raw)?;
        write_f32_vec(w, &self.f_amp)?;
        write_f32_vec(w, &self.f_phase)?;
        w.write_f64(self.delay_ns)
    }
}

impl WireDecode for BinSpectrum {
    /// Each array validates against the count declared by the array decoded
    /// just before it, rather than against an externally supplied channel
    /// count (§4.D).
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        let bin = r.read_u32()?;
        let weight = read_f32_vec(r, None)?;
        let num_channels = weight.len();
        let raw = read_complex_array(r, num_channels)?;
        let amp = read_f32_vec(r, Some(num_channels))?;
        let phase = read_f32_vec(r, Some(num_channels))?;
        let f_channel = read_u32_vec(r, None)?;
        let num_filtered = f_channel.len();
        let f_weight = read_f32_vec(r, Some(num_filtered))?;
        let f_raw = read_complex_array(r, num_filtered)?;
        let f_amp = read_f32_vec(r, Some(num_filtered))?;
        let f_phase = read_f32_vec(r, Some(num_filtered))?;
        let delay_ns = r.read_f64()?;
        Ok(BinSpectrum { bin, weight, raw, amp, phase, f_channel, f_weight, f_raw, f_amp, f_phase, delay_ns })
    }
}

impl WireEncode for BaselineSpectrum {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_u32(self.baseline)?;
        write_vec(w, &self.bins)?;
        self.minmax.encode(w)?;
        w.write_bool(self.flagged_bad)
    }
}

impl WireDecode for BaselineSpectrum {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        Ok(BaselineSpectrum {
            baseline: r.read_u32()?,
            bins: read_vec(r, None)?,
            minmax: MinMax::decode(r)?,
            flagged_bad: r.read_bool()?,
        })
    }
}

impl WireEncode for Spectrum {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_u32(self.if_index as u32)?;
        self.pol.encode(w)?;
        self.options.encode(w)?;
        self.met.encode(w)?;
        self.syscal.encode(w)?;
        write_vec(w, &self.baselines)?;
        self.minmax.encode(w)
    }
}

impl WireDecode for Spectrum {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Spectrum {
            if_index: r.read_u32()? as usize,
            pol: VisPol::decode(r)?,
            options: OptionsSet::decode(r)?,
            met: MetSnapshot::decode(r)?,
            syscal: SyscalSnapshot::decode(r)?,
            baselines: read_vec(r, None)?,
            minmax: MinMax::decode(r)?,
        })
    }
}
