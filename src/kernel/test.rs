use super::*;
use crate::options::{IfOptions, OptionsSet};
use crate::scan::{Antenna, IfWindow, Record, ScanHeader, SourceEntry, VisPol};

fn header(num_channels: u32, sideband: i8) -> ScanHeader {
    ScanHeader {
        base_date_mjd: 59000.0,
        ut_offset_sec: 0.0,
        obs_type: "normal".to_string(),
        cal_code: "".to_string(),
        cycle_duration_sec: 10.0,
        sources: vec![SourceEntry { name: "x".to_string(), ra_rad: 0.0, dec_rad: 0.0 }],
        antennas: vec![
            Antenna { label: 1, name: "A1".to_string(), x_m: 0.0, y_m: 0.0, z_m: 0.0 },
            Antenna { label: 2, name: "A2".to_string(), x_m: 10.0, y_m: 0.0, z_m: 0.0 },
            Antenna { label: 3, name: "A3".to_string(), x_m: 20.0, y_m: 0.0, z_m: 0.0 },
        ],
        ifs: vec![IfWindow {
            label: 1,
            centre_freq_hz: 2.1e9,
            bandwidth_hz: num_channels as f64 * 1.0e6,
            num_channels,
            num_pols: 2,
            sideband,
            chain: 1,
            names: ["a".into(), "".into(), "".into()],
            pols: vec![VisPol::XX, VisPol::YY],
        }],
    }
}

fn options(num_channels: u32) -> OptionsSet {
    OptionsSet {
        phase_in_degrees: false,
        include_flagged: false,
        applicable_to_any: false,
        reverse_online: false,
        apply_computed: false,
        ifs: vec![IfOptions {
            centre_freq_hz: 2.1e9,
            bandwidth_hz: num_channels as f64 * 1.0e6,
            num_channels,
            min_tvchannel: 0,
            max_tvchannel: num_channels - 1,
            delay_averaging: 1,
            averaging: AveragingMethod::ScalarMean,
            modifiers: vec![],
        }],
    }
}

fn synthetic_record(header: &ScanHeader, baseline: u32, pol: VisPol, tau_ns: f64, amp: f32) -> Record {
    let ifw = &header.ifs[0];
    let n = ifw.num_channels as usize;
    let mut raw = Vec::with_capacity(2 * n);
    for k in 0..n {
        let f = channel_freq_hz(ifw, k as u32);
        let theta = 2.0 * PI * f * tau_ns * 1e-9;
        raw.push(amp * theta.cos() as f32);
        raw.push(amp * theta.sin() as f32);
    }
    Record { baseline, if_index: 0, pol, bin: 0, flagged: false, raw, weight: vec![1.0; n] }
}

fn cycle_with(records: Vec<Record>) -> Cycle {
    Cycle { mjd_mid: 59000.5, records }
}

#[test]
fn test_delay_fit_recovers_synthetic_tau() {
    let hdr = header(64, 1);
    let opts = options(64);
    let record = synthetic_record(&hdr, crate::scan::baseline_encode(1, 2), VisPol::XX, 3.5, 1.0);
    let cycle = cycle_with(vec![record]);

    let spectrum = compute_spectrum(
        &hdr,
        &cycle,
        0,
        VisPol::XX,
        &opts,
        &MetSnapshot::default(),
        &SyscalSnapshot::default(),
    )
    .unwrap();

    let delay = spectrum.baselines[0].bins[0].delay_ns;
    assert!((delay - 3.5).abs() < 1e-4, "delay={delay}");
}

#[test]
fn test_bad_selection_errors() {
    let hdr = header(16, 1);
    let opts = options(16);
    let cycle = cycle_with(vec![]);

    let err = compute_spectrum(&hdr, &cycle, 7, VisPol::XX, &opts, &MetSnapshot::default(), &SyscalSnapshot::default())
        .unwrap_err();
    assert!(matches!(err, KernelError::BadSelectionIf(7)));

    let err =
        compute_spectrum(&hdr, &cycle, 0, VisPol::XY, &opts, &MetSnapshot::default(), &SyscalSnapshot::default())
            .unwrap_err();
    assert!(matches!(err, KernelError::BadSelectionPol(_)));
}

#[test]
fn test_reverse_online_divides_out_tsys() {
    let hdr = header(8, 1);
    let opts = OptionsSet { reverse_online: true, ..options(8) };
    let record = synthetic_record(&hdr, crate::scan::baseline_encode(1, 2), VisPol::XX, 0.0, 4.0);
    let cycle = cycle_with(vec![record]);

    let syscal = SyscalSnapshot {
        tsys: vec![
            vec![[TsysEntry { online_tsys: 4.0, online_tsys_applied: true, ..Default::default() }, Default::default()]],
            vec![[TsysEntry { online_tsys: 9.0, online_tsys_applied: true, ..Default::default() }, Default::default()]],
            vec![[Default::default(), Default::default()]],
        ],
        ..Default::default()
    };

    let spectrum =
        compute_spectrum(&hdr, &cycle, 0, VisPol::XX, &opts, &MetSnapshot::default(), &syscal).unwrap();
    let amp0 = spectrum.baselines[0].bins[0].amp[0];
    assert!((amp0 - 4.0 / (4.0f64 * 9.0).sqrt() as f32).abs() < 1e-4, "amp0={amp0}");
}

#[test]
fn test_channel_flagging_excludes_channel_from_filtered_arrays() {
    let hdr = header(8, 1);
    let opts = options(8);
    let mut record = synthetic_record(&hdr, crate::scan::baseline_encode(1, 2), VisPol::XX, 0.0, 1.0);
    record.weight[3] = 0.0;
    let cycle = cycle_with(vec![record]);

    let spectrum = compute_spectrum(
        &hdr,
        &cycle,
        0,
        VisPol::XX,
        &opts,
        &MetSnapshot::default(),
        &SyscalSnapshot::default(),
    )
    .unwrap();
    let bin = &spectrum.baselines[0].bins[0];
    assert_eq!(bin.raw.len(), 8);
    assert_eq!(bin.f_raw.len(), 7);
    assert!(!bin.f_channel.contains(&3));
}

#[test]
fn test_include_flagged_retains_out_of_tvchannel_range() {
    let hdr = header(8, 1);
    let mut opts = options(8);
    opts.ifs[0].min_tvchannel = 2;
    opts.ifs[0].max_tvchannel = 5;
    let record = synthetic_record(&hdr, crate::scan::baseline_encode(1, 2), VisPol::XX, 0.0, 1.0);
    let cycle = cycle_with(vec![record]);

    let narrowed = compute_spectrum(
        &hdr,
        &cycle,
        0,
        VisPol::XX,
        &opts,
        &MetSnapshot::default(),
        &SyscalSnapshot::default(),
    )
    .unwrap();
    assert_eq!(narrowed.baselines[0].bins[0].f_raw.len(), 4);

    opts.include_flagged = true;
    let widened = compute_spectrum(
        &hdr,
        &cycle,
        0,
        VisPol::XX,
        &opts,
        &MetSnapshot::default(),
        &SyscalSnapshot::default(),
    )
    .unwrap();
    assert_eq!(widened.baselines[0].bins[0].f_raw.len(), 8);
}

#[test]
fn test_include_flagged_does_not_retain_hard_invalid_channels() {
    let hdr = header(8, 1);
    let mut opts = options(8);
    opts.include_flagged = true;
    let mut record = synthetic_record(&hdr, crate::scan::baseline_encode(1, 2), VisPol::XX, 0.0, 1.0);
    record.weight[3] = 0.0;
    let cycle = cycle_with(vec![record]);

    let spectrum = compute_spectrum(
        &hdr,
        &cycle,
        0,
        VisPol::XX,
        &opts,
        &MetSnapshot::default(),
        &SyscalSnapshot::default(),
    )
    .unwrap();
    assert_eq!(spectrum.baselines[0].bins[0].f_raw.len(), 7);
}

#[test]
fn test_apply_computed_scales_by_gated_cal_tsys() {
    let hdr = header(8, 1);
    let opts = OptionsSet { reverse_online: true, apply_computed: true, ..options(8) };
    let record = synthetic_record(&hdr, crate::scan::baseline_encode(1, 2), VisPol::XX, 0.0, 4.0);
    let cycle = cycle_with(vec![record]);

    let entry = |gtp: f64, sdo: f64, caljy: f64| TsysEntry {
        online_tsys_applied: false,
        gtp,
        sdo,
        caljy,
        ..Default::default()
    };
    let syscal = SyscalSnapshot {
        tsys: vec![
            vec![[entry(2.0, 1.0, 3.0), Default::default()]],
            vec![[entry(4.0, 2.0, 5.0), Default::default()]],
            vec![[Default::default(), Default::default()]],
        ],
        ..Default::default()
    };

    let spectrum =
        compute_spectrum(&hdr, &cycle, 0, VisPol::XX, &opts, &MetSnapshot::default(), &syscal).unwrap();
    let t1: f64 = (2.0 * 3.0) / (2.0 * 1.0);
    let t2: f64 = (4.0 * 5.0) / (2.0 * 2.0);
    let scale = (t1 * t2).sqrt() as f32;
    let amp0 = spectrum.baselines[0].bins[0].amp[0];
    assert!((amp0 - 4.0 * scale).abs() < 1e-3, "amp0={amp0}, expected={}", 4.0 * scale);
}

#[test]
fn test_closure_phase_near_zero_for_antenna_based_errors() {
    let hdr = header(4, 1);
    let opts = options(4);
    // phi_i is a per-antenna phase error; baseline (i,j) phase = phi_i - phi_j,
    // which must close to zero for any triangle regardless of the phi values.
    let phi = [0.3, -0.7, 1.1];

    let mut records = Vec::new();
    for (i, &a1) in [1u16, 2, 3].iter().enumerate() {
        for (j, &a2) in [1u16, 2, 3].iter().enumerate() {
            if a1 < a2 {
                let dphi = phi[i] - phi[j];
                records.push(synthetic_phase_record(&hdr, crate::scan::baseline_encode(a1, a2), dphi));
            }
        }
    }
    let cycle = cycle_with(records);

    let spectrum = compute_spectrum(
        &hdr,
        &cycle,
        0,
        VisPol::XX,
        &opts,
        &MetSnapshot::default(),
        &SyscalSnapshot::default(),
    )
    .unwrap();
    let vis = reduce_to_vis_quantities(&spectrum, AveragingMethod::ScalarMean, None);
    let closures = closure_phase(&hdr, &vis, 3);

    assert!(!closures.is_empty());
    for c in closures {
        assert!(c.closure_rad.abs() < 1e-4, "closure={}", c.closure_rad);
    }
}

fn synthetic_phase_record(header: &ScanHeader, baseline: u32, phase_rad: f64) -> Record {
    let n = header.ifs[0].num_channels as usize;
    let mut raw = Vec::with_capacity(2 * n);
    for _ in 0..n {
        raw.push(phase_rad.cos() as f32);
        raw.push(phase_rad.sin() as f32);
    }
    Record { baseline, if_index: 0, pol: VisPol::XX, bin: 0, flagged: false, raw, weight: vec![1.0; n] }
}
