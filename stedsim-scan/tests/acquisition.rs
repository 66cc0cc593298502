//! End-to-end acquisition behaviour.

use approx::assert_relative_eq;
use ndarray::Array2;
use stedsim_core::{
    Datamap, DepletionBeam, Error, ExcitationBeam, Fluorophore, MoleculeMap, RoiMode,
};
use stedsim_optics::{Detector, Objective, OpticalSystem};
use stedsim_scan::{pixel_sampling, Dwell, Microscope, ScanOptions};

const PX: f64 = 20e-9;
const DWELL: f64 = 10e-6;

fn microscope(fluo: Fluorophore, detector: Detector, seed: u64) -> Microscope {
    let optics = OpticalSystem::new(
        ExcitationBeam::new(488e-9),
        DepletionBeam::new(575e-9),
        detector,
        Objective::default(),
        fluo,
    )
    .unwrap();
    Microscope::with_seed(optics, seed)
}

fn uniform_grid(microscope: &mut Microscope, dim: (usize, usize), count: u32) -> Datamap {
    let psf = microscope.optics_mut().get_effective(PX, 1e-6, 0.0).unwrap();
    let mut dmap = Datamap::uniform(dim, count, PX).unwrap();
    dmap.set_roi_padded(&psf, RoiMode::Max);
    dmap
}

fn bleaching_egfp() -> Fluorophore {
    Fluorophore::egfp().with_bleaching(0.0, 1e-5, 1.4)
}

#[test]
fn test_signal_scales_linearly_with_excitation() {
    let mut microscope = microscope(Fluorophore::egfp(), Detector::default().with_noise(true), 1);
    let mut dmap = uniform_grid(&mut microscope, (64, 64), 10);
    let before = dmap.total_molecules();
    let dwell = Dwell::from(DWELL);

    let low = microscope
        .get_signal_and_bleach(&mut dmap, PX, &dwell, 1e-6, 0.0, ScanOptions::new())
        .unwrap();
    let high = microscope
        .get_signal_and_bleach(&mut dmap, PX, &dwell, 2e-6, 0.0, ScanOptions::new())
        .unwrap();

    assert_eq!(low.signal.dim(), (64, 64));
    let low_mean = low.signal.mean().unwrap();
    let high_mean = high.signal.mean().unwrap();
    assert!(low_mean > 10.0, "mean signal too low to test: {low_mean}");
    assert_relative_eq!(high_mean / low_mean, 2.0, max_relative = 0.05);
    assert_eq!(dmap.total_molecules(), before);
}

#[test]
fn test_bleaching_scan_removes_molecules() {
    let mut microscope = microscope(bleaching_egfp(), Detector::default(), 2);
    let mut dmap = uniform_grid(&mut microscope, (64, 64), 10);
    let before = dmap.whole().clone();

    microscope
        .get_signal_and_bleach(
            &mut dmap,
            PX,
            &Dwell::from(DWELL),
            1e-6,
            0.0,
            ScanOptions::new().with_bleach(true).with_update(true),
        )
        .unwrap();

    let after = dmap.whole();
    let before_sum: u64 = before.iter().map(|&n| u64::from(n)).sum();
    assert!(dmap.total_molecules() < before_sum);
    // Bleaching never adds molecules anywhere.
    assert!(before.iter().zip(after.iter()).all(|(b, a)| a <= b));
}

#[test]
fn test_no_bleaching_without_excitation() {
    let mut microscope = microscope(bleaching_egfp(), Detector::default(), 3);
    let mut dmap = uniform_grid(&mut microscope, (16, 16), 10);
    let before = dmap.total_molecules();

    let acquisition = microscope
        .get_signal_and_bleach(
            &mut dmap,
            PX,
            &Dwell::from(DWELL),
            0.0,
            50e-3,
            ScanOptions::new().with_bleach(true).with_update(true),
        )
        .unwrap();
    assert_eq!(dmap.total_molecules(), before);
    assert_eq!(acquisition.signal.sum(), 0.0);
}

#[test]
fn test_split_scan_matches_single_scan() {
    let mut single = microscope(Fluorophore::egfp(), Detector::default(), 4);
    let mut split = microscope(Fluorophore::egfp(), Detector::default(), 4);
    let mut grid_a = uniform_grid(&mut single, (12, 12), 10);
    let mut grid_b = uniform_grid(&mut split, (12, 12), 10);
    let dwell = Dwell::from(DWELL);
    let pixels = pixel_sampling((12, 12), 1);

    let whole = single
        .get_signal_and_bleach(&mut grid_a, PX, &dwell, 1e-6, 0.0, ScanOptions::new())
        .unwrap();

    let (head, tail) = pixels.split_at(50);
    let first = split
        .get_signal_and_bleach(
            &mut grid_b,
            PX,
            &dwell,
            1e-6,
            0.0,
            ScanOptions::new().with_pixel_list(head.to_vec()),
        )
        .unwrap();
    let second = split
        .get_signal_and_bleach(
            &mut grid_b,
            PX,
            &dwell,
            1e-6,
            0.0,
            ScanOptions::new()
                .with_pixel_list(tail.to_vec())
                .with_acquired_intensity(first.intensity),
        )
        .unwrap();

    for (a, b) in whole.intensity.iter().zip(second.intensity.iter()) {
        assert_relative_eq!(*a, *b, max_relative = 1e-12);
    }
    assert_eq!(second.signal.dim(), whole.signal.dim());
}

#[test]
fn test_per_pixel_dwell_scales_signal() {
    let mut microscope = microscope(Fluorophore::egfp(), Detector::default(), 5);
    let mut dmap = uniform_grid(&mut microscope, (4, 4), 10);
    let dwell = Dwell::from(Array2::from_shape_fn((4, 4), |(row, _)| {
        if row == 0 {
            2.0 * DWELL
        } else {
            DWELL
        }
    }));
    let acquisition = microscope
        .get_signal_and_bleach(&mut dmap, PX, &dwell, 1e-6, 0.0, ScanOptions::new())
        .unwrap();
    // Border pixels see fewer molecules; compare pixels in the same column.
    let ratio = acquisition.intensity[[0, 1]] / acquisition.intensity[[3, 1]];
    assert_relative_eq!(ratio, 2.0, max_relative = 1e-9);
}

#[test]
fn test_coarse_acquisition_pixels() {
    let mut microscope = microscope(Fluorophore::egfp(), Detector::default(), 6);
    let mut dmap = uniform_grid(&mut microscope, (9, 9), 10);
    let acquisition = microscope
        .get_signal_and_bleach(
            &mut dmap,
            3.0 * PX,
            &Dwell::from(DWELL),
            1e-6,
            0.0,
            ScanOptions::new(),
        )
        .unwrap();
    assert_eq!(acquisition.signal.dim(), (3, 3));
    assert_eq!(acquisition.pixels_scanned, 9);

    let err = microscope
        .get_signal_and_bleach(
            &mut dmap,
            1.5 * PX,
            &Dwell::from(DWELL),
            1e-6,
            0.0,
            ScanOptions::new(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
fn test_out_of_bounds_pixel_leaves_grid_untouched() {
    let mut microscope = microscope(bleaching_egfp(), Detector::default(), 7);
    let mut dmap = uniform_grid(&mut microscope, (8, 8), 10);
    let before = dmap.whole().clone();

    for fast in [false, true] {
        let options = ScanOptions::new()
            .with_pixel_list(vec![(0, 0), (1, 1), (8, 2)])
            .with_bleach(true)
            .with_update(true)
            .with_filter_bypass(true);
        let dwell = Dwell::from(DWELL);
        let result = if fast {
            microscope.get_signal_and_bleach_fast(&mut dmap, PX, &dwell, 1e-6, 0.0, options)
        } else {
            microscope.get_signal_and_bleach(&mut dmap, PX, &dwell, 1e-6, 0.0, options)
        };
        assert!(matches!(
            result,
            Err(Error::OutOfBounds { row: 8, col: 2, .. })
        ));
        assert_eq!(dmap.whole(), &before);
    }
}

#[test]
fn test_roi_without_padding_rejects_edge_footprint() {
    let mut microscope = microscope(Fluorophore::egfp(), Detector::default(), 8);
    let psf = microscope.optics_mut().get_effective(PX, 1e-6, 0.0).unwrap();
    let mut dmap = Datamap::uniform((60, 60), 1, PX).unwrap();
    // A narrower PSF sets a padding too small for the real beam.
    dmap.set_roi(&psf.slice(ndarray::s![10..33, 10..33]), RoiMode::Max)
        .unwrap();

    let err = microscope
        .get_signal_and_bleach(
            &mut dmap,
            PX,
            &Dwell::from(DWELL),
            1e-6,
            0.0,
            ScanOptions::new().with_pixel_list(vec![(0, 0)]),
        )
        .unwrap_err();
    assert!(matches!(err, Error::OutOfBounds { .. }));
}

#[test]
fn test_full_raster_with_narrow_roi_is_out_of_bounds() {
    let mut microscope = microscope(bleaching_egfp(), Detector::default(), 10);
    let mut dmap = Datamap::uniform((60, 60), 1, PX).unwrap();
    dmap.set_roi(&Array2::<f64>::ones((5, 5)), RoiMode::Max)
        .unwrap();
    let before = dmap.whole().clone();

    for fast in [false, true] {
        let options = ScanOptions::new().with_bleach(true).with_update(true);
        let dwell = Dwell::from(DWELL);
        let result = if fast {
            microscope.get_signal_and_bleach_fast(&mut dmap, PX, &dwell, 1e-6, 0.0, options)
        } else {
            microscope.get_signal_and_bleach(&mut dmap, PX, &dwell, 1e-6, 0.0, options)
        };
        assert!(matches!(
            result,
            Err(Error::OutOfBounds { row: 0, col: 0, .. })
        ));
        assert_eq!(dmap.whole(), &before);
    }
}

#[test]
fn test_fast_path_matches_filtered_path_on_raster_list() {
    let mut slow = microscope(Fluorophore::egfp(), Detector::default(), 9);
    let mut fast = microscope(Fluorophore::egfp(), Detector::default(), 9);
    let mut grid_a = uniform_grid(&mut slow, (6, 6), 3);
    let mut grid_b = uniform_grid(&mut fast, (6, 6), 3);
    let dwell = Dwell::from(DWELL);
    let pixels = pixel_sampling((6, 6), 1);

    let a = slow
        .get_signal_and_bleach(
            &mut grid_a,
            PX,
            &dwell,
            1e-6,
            0.0,
            ScanOptions::new().with_pixel_list(pixels.clone()),
        )
        .unwrap();
    let b = fast
        .get_signal_and_bleach_fast(
            &mut grid_b,
            PX,
            &dwell,
            1e-6,
            0.0,
            ScanOptions::new()
                .with_pixel_list(pixels)
                .with_filter_bypass(true),
        )
        .unwrap();
    assert_eq!(a.intensity, b.intensity);
}
