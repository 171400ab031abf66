// ============================================================================
// headless.rs — Heatmask
// Headless runner: drives the pipeline on an offscreen device with demo
// heat sources and optionally exports the final mask.
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::HeatmaskConfig;
use crate::error::HeatmaskError;
use crate::export;
use crate::gpu::WgpuBackend;
use crate::heatmask::HeatmaskPipeline;
use crate::source::{HeatSource, RegistryHandle};

/// One explicitly placed building.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub position: [f32; 2],
    pub range: f32,
    pub heat: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadlessConfig {
    pub frames: u32,
    pub progress_interval: u32,
    /// Random buildings to place when `sources` is empty.
    pub demo_sources: u32,
    pub seed: u64,
    pub sources: Vec<SourceConfig>,
    /// Pulse each building's heat over time.
    pub animate: bool,
    pub output_path: Option<PathBuf>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            frames: 600,
            progress_interval: 120,
            demo_sources: 24,
            seed: 42,
            sources: Vec::new(),
            animate: true,
            output_path: None,
        }
    }
}

/// A registered building and the heat it pulses around.
pub struct DemoSource {
    pub source: Arc<HeatSource>,
    pub base_heat: f32,
}

/// Build the configured sources, or seeded random ones inside the map.
pub fn spawn_sources(config: &HeadlessConfig, map_size: f32) -> Vec<DemoSource> {
    let make = |s: &SourceConfig| DemoSource {
        source: HeatSource::new(s.position, s.range, s.heat),
        base_heat: s.heat,
    };
    if !config.sources.is_empty() {
        return config.sources.iter().map(make).collect();
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let half = map_size * 0.5;
    (0..config.demo_sources)
        .map(|_| {
            make(&SourceConfig {
                position: [rng.gen_range(-half..half), rng.gen_range(-half..half)],
                range: rng.gen_range(map_size * 0.01..map_size * 0.05),
                heat: rng.gen_range(5.0..40.0),
            })
        })
        .collect()
}

/// Heat of source `index` at `frame` when animation is on.
pub fn pulsed_heat(base: f32, index: usize, frame: u64) -> f32 {
    let phase = frame as f32 * 0.05 + index as f32 * 0.7;
    base * (0.75 + 0.25 * phase.sin())
}

fn register_all(handle: &RegistryHandle, sources: &[DemoSource]) -> Result<(), HeatmaskError> {
    for s in sources {
        handle.register(&s.source)?;
    }
    Ok(())
}

pub fn run_headless(config: &HeatmaskConfig) -> Result<(), HeatmaskError> {
    let params = config.to_static_parameters()?;
    let backend = WgpuBackend::headless()?;
    let mut pipeline = HeatmaskPipeline::new(backend, &params)?;

    let run = &config.headless;
    let sources = spawn_sources(run, params.map_size);
    register_all(&pipeline.registration_handle(), &sources)?;

    log::info!(
        "Headless run started: {} frames, {} sources, {}x{} mask",
        run.frames,
        sources.len(),
        params.surface_edge,
        params.surface_edge
    );

    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut last_report_frame = 0u32;
    let mut reallocations = 0u32;

    for step in 0..run.frames {
        if run.animate {
            for (i, s) in sources.iter().enumerate() {
                s.source.set_heat(pulsed_heat(s.base_heat, i, pipeline.frame()));
            }
        }

        let stats = pipeline.tick()?;
        if stats.reallocated {
            reallocations += 1;
        }

        if run.progress_interval > 0 && (step + 1) % run.progress_interval == 0 {
            let done = step + 1;
            let total_elapsed = started.elapsed().as_secs_f64().max(1e-6);
            let total_fps = done as f64 / total_elapsed;

            let window_elapsed = last_report.elapsed().as_secs_f64().max(1e-6);
            let window_fps = (done - last_report_frame) as f64 / window_elapsed;

            log::info!(
                "Headless progress: {}/{} | fps={:.0} (window {:.0}) | sources={} | tiles={}x{}",
                done,
                run.frames,
                total_fps,
                window_fps,
                stats.source_count,
                stats.grid.x,
                stats.grid.y,
            );

            last_report = Instant::now();
            last_report_frame = done;
        }
    }

    log::info!(
        "Headless run finished: {} frames in {:.2}s, {} buffer reallocation(s)",
        run.frames,
        started.elapsed().as_secs_f64(),
        reallocations
    );

    if let Some(path) = &run.output_path {
        if let Some(mask) = pipeline.mask() {
            let pixels = pipeline.backend().read_mask(mask.surface)?;
            export::save_mask_png(path, mask.edge, &pixels)?;
        }
    }

    pipeline.teardown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_sources_win_over_demo() {
        let config = HeadlessConfig {
            sources: vec![SourceConfig {
                position: [1.0, 2.0],
                range: 3.0,
                heat: 4.0,
            }],
            demo_sources: 50,
            ..Default::default()
        };
        let spawned = spawn_sources(&config, 100.0);
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].source.state().position, [1.0, 2.0]);
        assert_eq!(spawned[0].base_heat, 4.0);
    }

    #[test]
    fn test_demo_sources_stay_inside_map() {
        let config = HeadlessConfig {
            demo_sources: 40,
            ..Default::default()
        };
        let spawned = spawn_sources(&config, 200.0);
        assert_eq!(spawned.len(), 40);
        for s in &spawned {
            let st = s.source.state();
            assert!(st.position.iter().all(|p| (-100.0..100.0).contains(p)));
            assert!(st.range > 0.0 && st.heat > 0.0);
        }
    }

    #[test]
    fn test_demo_sources_are_seeded() {
        let config = HeadlessConfig::default();
        let a: Vec<_> = spawn_sources(&config, 64.0).iter().map(|s| s.source.state()).collect();
        let b: Vec<_> = spawn_sources(&config, 64.0).iter().map(|s| s.source.state()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_pulsed_heat_stays_in_band() {
        for frame in 0..500 {
            let h = pulsed_heat(20.0, 3, frame);
            assert!((10.0..=20.0).contains(&h), "frame {} heat {}", frame, h);
        }
    }

    #[test]
    fn test_register_all_uses_handle() {
        let registry = crate::source::SourceRegistry::new();
        let sources = spawn_sources(&HeadlessConfig::default(), 64.0);
        register_all(&registry.handle(), &sources).unwrap();
        assert_eq!(registry.snapshot().len(), sources.len());
    }
}
