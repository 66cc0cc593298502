//! Confocal imaging of a spine-like sample while its nanodomains flash.
//!
//! Run with: cargo run --bin timed-experiment
//!
//! Prints one line per completed image so the flash rise and decay, and the
//! bleaching it causes, can be followed over time.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stedsim_core::{
    DepletionBeam, ExcitationBeam, Fluorophore, HandCraftedLightCurve, MoleculeMap, Nanodomain,
    RoiMode, StochasticFlashes, TemporalDatamap,
};
use stedsim_optics::{Detector, Objective, OpticalSystem};
use stedsim_scan::{time_correspondence, Dwell, ExperimentConfig, Microscope, TimedExperiment};
use std::error::Error;

const PIXELSIZE: f64 = 20e-9;
const DWELL: f64 = 10e-6;
const P_EX: f64 = 1e-6;
const DIM: (usize, usize) = (32, 32);

/// A round blob of molecules with a few nanodomains inside it.
fn spine(rng: &mut StdRng) -> (Array2<u32>, Vec<Nanodomain>) {
    let center = (DIM.0 as f64 / 2.0, DIM.1 as f64 / 2.0);
    let radius = DIM.0 as f64 / 3.0;
    let frame = Array2::from_shape_fn(DIM, |(row, col)| {
        let dy = row as f64 - center.0;
        let dx = col as f64 - center.1;
        if dx.hypot(dy) <= radius {
            3
        } else {
            0
        }
    });
    let domains = (0..4)
        .map(|_| {
            let angle = rng.gen_range(0.0..std::f64::consts::TAU);
            let r = rng.gen_range(0.0..radius * 0.8);
            let row = (center.0 + r * angle.sin()) as usize;
            let col = (center.1 + r * angle.cos()) as usize;
            Nanodomain::new(row, col, 6)
        })
        .collect();
    (frame, domains)
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let mut rng = StdRng::seed_from_u64(3);

    let optics = OpticalSystem::new(
        ExcitationBeam::new(488e-9),
        DepletionBeam::new(575e-9),
        Detector::default().with_noise(true),
        Objective::default(),
        Fluorophore::egfp().with_bleaching(0.0, 8.25e-6, 1.4),
    )?;
    let mut microscope = Microscope::with_seed(optics, 3);
    let psf = microscope.optics_mut().get_effective(PIXELSIZE, P_EX, 0.0)?;

    let (frame, domains) = spine(&mut rng);
    let n_domains = domains.len();
    let mut temporal = TemporalDatamap::new(frame, PIXELSIZE, domains)?;
    temporal.set_roi_padded(&psf, RoiMode::Max)?;

    // Preview which nanodomains a stochastic schedule would light up first.
    let mut light_curve = HandCraftedLightCurve::default();
    let mut schedule = StochasticFlashes::new(n_domains, 0.5, 1.0)?;
    schedule.step(&mut rng, &mut light_curve);
    let active: Vec<usize> = (0..n_domains).filter(|&id| schedule.is_flashing(id)).collect();
    println!("nanodomains flashing on the first step: {active:?}");

    temporal.create_t_stack_dmap(50_000, &mut light_curve, 1.0)?;
    let step_us = temporal.time_usec_between_flash_updates();
    let step_s = step_us as f64 * 1e-6;
    let (pixels_per_step, steps) = time_correspondence(
        step_s,
        temporal.n_flash_steps() as f64 * step_s,
        DWELL,
    );
    println!(
        "{} flash frames, {step_us} us apart: {pixels_per_step:.0} pixels per frame over {steps} frames",
        temporal.n_flash_steps()
    );

    let runtime_us = step_us * temporal.n_flash_steps() as u64;
    let config =
        ExperimentConfig::new(PIXELSIZE, Dwell::from(DWELL), P_EX).with_timing(10, runtime_us);
    let mut experiment = TimedExperiment::new(microscope, temporal, config)?;
    let report = experiment.run()?;

    for (i, image) in report.images.iter().enumerate() {
        println!(
            "image {i:>3}: mean {:.2} counts, peak {:.0}",
            image.mean().unwrap_or(0.0),
            image.iter().copied().fold(0.0, f64::max)
        );
    }
    println!(
        "{} partial scans, {} flash updates, molecules {} -> {} ({} live now)",
        report.partial_scans,
        report.flash_updates,
        report.molecules_before,
        report.molecules_after,
        experiment.temporal().total_molecules()
    );
    Ok(())
}
