//! Confocal and STED acquisitions of the same random sample.
//!
//! Run with: cargo run --bin tutorial -- [`psf_cache_dir`]
//!
//! With a directory argument, sampled beam kernels are persisted there and
//! reused by later runs.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stedsim_core::{
    Datamap, DepletionBeam, ExcitationBeam, Fluorophore, MoleculeMap, RoiMode,
};
use stedsim_io::JsonPsfStore;
use stedsim_optics::{Detector, Objective, OpticalSystem};
use stedsim_scan::{Dwell, Microscope, ScanOptions};
use std::env;
use std::error::Error;

const PIXELSIZE: f64 = 20e-9;
const DWELL: f64 = 10e-6;
const P_EX: f64 = 2e-6;
const P_STED: f64 = 2.5e-3;

fn sample(rng: &mut StdRng, dim: (usize, usize), spots: usize) -> Array2<u32> {
    let mut frame = Array2::<u32>::zeros(dim);
    for _ in 0..spots {
        let row = rng.gen_range(0..dim.0);
        let col = rng.gen_range(0..dim.1);
        frame[[row, col]] += rng.gen_range(5..40);
    }
    frame
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let fluo = Fluorophore::egfp().with_bleaching(0.0, 8.25e-6, 1.4);
    let mut optics = OpticalSystem::new(
        ExcitationBeam::new(488e-9),
        DepletionBeam::new(575e-9).with_zero_residual(0.01),
        Detector::default().with_noise(true).with_background(5e3),
        Objective::default(),
        fluo,
    )?;
    if let Some(dir) = env::args().nth(1) {
        optics = optics.with_store(Box::new(JsonPsfStore::open(dir)?));
    }
    let mut microscope = Microscope::with_seed(optics, 7);

    let mut rng = StdRng::seed_from_u64(7);
    let psf = microscope
        .optics_mut()
        .get_effective(PIXELSIZE, P_EX, P_STED)?;
    let mut dmap = Datamap::new(sample(&mut rng, (64, 64), 120), PIXELSIZE)?;
    dmap.set_roi_padded(&psf, RoiMode::Max);

    let confocal_rms = microscope
        .optics_mut()
        .effective_spread(PIXELSIZE, P_EX, 0.0)?;
    let sted_rms = microscope
        .optics_mut()
        .effective_spread(PIXELSIZE, P_EX, P_STED)?;
    println!(
        "effective PSF RMS radius: confocal {:.1} nm, STED {:.1} nm",
        confocal_rms * 1e9,
        sted_rms * 1e9
    );

    let dwell = Dwell::from(DWELL);
    let start = dmap.total_molecules();
    for (label, p_sted) in [("confocal", 0.0), ("STED", P_STED), ("confocal", 0.0)] {
        let acquisition = microscope.get_signal_and_bleach(
            &mut dmap,
            PIXELSIZE,
            &dwell,
            P_EX,
            p_sted,
            ScanOptions::new().with_bleach(true).with_update(true),
        )?;
        let signal = &acquisition.signal;
        let peak = signal.iter().copied().fold(0.0, f64::max);
        println!(
            "{label:>8}: {}x{} image, mean {:.1} counts, peak {peak:.0}, {} molecules left",
            signal.nrows(),
            signal.ncols(),
            signal.mean().unwrap_or(0.0),
            dmap.total_molecules()
        );
    }

    let end = dmap.total_molecules();
    #[allow(clippy::cast_precision_loss)]
    let fraction = if start > 0 {
        1.0 - end as f64 / start as f64
    } else {
        0.0
    };
    println!(
        "bleached {} of {start} molecules ({:.1}%)",
        start - end,
        100.0 * fraction
    );
    Ok(())
}
