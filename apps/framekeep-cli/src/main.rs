use std::collections::VecDeque;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use framekeep_assets::{AssetStore, Material, MaterialParams, MeshSource};
use framekeep_buffer::{GpuBuffer, HeadlessBackend};
use framekeep_common::{BufferKind, EntityId, RenderConfig, Transform};
use framekeep_kernel::{SceneError, connect};
use framekeep_registry::SharedResourceRegistry;
use framekeep_render::spawn_render_thread;
use framekeep_tools::BufferInspector;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "framekeep-cli", about = "Drive the framekeep render-resource core")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Render configuration (JSON); defaults are used when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate info and the effective configuration
    Info,
    /// Write the default configuration to a file
    WriteConfig { path: PathBuf },
    /// Run the allocator and registry walkthroughs step by step
    Scenario,
    /// Spawn and delete entities on two threads, then report buffer state
    Churn {
        /// Entities kept alive at once
        #[arg(short, long, default_value = "64")]
        entities: usize,
        /// Spawns to perform
        #[arg(short = 'n', long, default_value = "2000")]
        cycles: usize,
        /// Simulated GPU latency, in backend steps
        #[arg(short, long, default_value = "3")]
        latency: u64,
        /// Bound the command channel (backpressure) instead of leaving it unbounded
        #[arg(short, long)]
        bound: Option<usize>,
        /// Asset catalog (JSON) to save after the run
        #[arg(long)]
        save_assets: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = match &cli.config {
        Some(path) => RenderConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RenderConfig::default(),
    };

    match cli.command {
        Commands::Info => {
            println!("framekeep-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", framekeep_common::crate_info());
            println!("buffer: {}", framekeep_buffer::crate_info());
            println!("assets: {}", framekeep_assets::crate_info());
            println!("registry: {}", framekeep_registry::crate_info());
            println!("render: {}", framekeep_render::crate_info());
            println!("kernel: {}", framekeep_kernel::crate_info());
            println!("tools: {}", framekeep_tools::crate_info());
            println!("frames_in_flight: {}", config.frames_in_flight);
            for kind in [
                BufferKind::Vertex,
                BufferKind::Index,
                BufferKind::Instance,
                BufferKind::Material,
                BufferKind::Mapping,
            ] {
                let b = config.buffer(kind);
                println!("{kind}: capacity={} alignment={}", b.capacity, b.alignment);
            }
        }
        Commands::WriteConfig { path } => {
            RenderConfig::default().save(&path)?;
            println!("Wrote default config to {}", path.display());
        }
        Commands::Scenario => scenario()?,
        Commands::Churn {
            entities,
            cycles,
            latency,
            bound,
            save_assets,
        } => churn(&config, entities, cycles, latency, bound, save_assets)?,
    }

    Ok(())
}

fn scenario() -> anyhow::Result<()> {
    println!("Scenario 1: capacity 100, alignment 1");
    let mut buffer = GpuBuffer::new(BufferKind::Vertex, 100, 1)?;
    for (id, size) in [(0, 10), (1, 30), (2, 30)] {
        let offset = buffer.reserve_slot(EntityId(id), size)?;
        println!("  reserve({size}) -> offset {offset}");
    }
    buffer.free_slot(EntityId(1))?;
    match buffer.reserve_slot(EntityId(3), 60) {
        Ok(offset) => println!("  reserve(60) -> offset {offset} (unexpected)"),
        Err(err) => println!("  reserve(60) -> {err}"),
    }
    buffer.free_slot(EntityId(0))?;
    buffer.free_slot(EntityId(2))?;
    println!("  reserve(100) -> offset {}", buffer.reserve_slot(EntityId(4), 100)?);

    println!("Scenario 2: capacity 100, alignment 4");
    let mut buffer = GpuBuffer::new(BufferKind::Index, 100, 4)?;
    for (id, size) in [(0, 10), (1, 30), (2, 24)] {
        let offset = buffer.reserve_slot(EntityId(id), size)?;
        let slot = buffer.get_slot(EntityId(id))?;
        println!("  reserve({size}) -> offset {offset} capacity {}", slot.capacity);
    }
    buffer.check_invariants()?;

    println!("Scenario 3: shared mesh refcount");
    let mut backend = HeadlessBackend::new(0);
    let mut registry = SharedResourceRegistry::new(&RenderConfig::default(), &mut backend)?;
    let mut store = AssetStore::new();
    let cube = store.register_default_cube()?;
    let source: MeshSource = store.mesh_source(cube)?;
    println!("  acquire -> {:?}", registry.acquire_mesh(&source, &mut backend)?);
    println!("  acquire -> {:?}", registry.acquire_mesh(&source, &mut backend)?);
    println!("  release -> {:?}", registry.release_mesh(cube)?);
    println!("  resident: {}", registry.mesh_slots(cube).is_some());
    println!("  release -> {:?}", registry.release_mesh(cube)?);
    println!("  resident: {}", registry.mesh_slots(cube).is_some());
    Ok(())
}

fn churn(
    config: &RenderConfig,
    entities: usize,
    cycles: usize,
    latency: u64,
    bound: Option<usize>,
    save_assets: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut store = AssetStore::new();
    let meshes = [store.register_default_cube()?, store.register_default_quad()?];
    let grey = store.register_default_material();
    let red = store.register_material(Material {
        name: "red".into(),
        params: MaterialParams {
            base_color: [1.0, 0.0, 0.0, 1.0],
            ..Material::default().params
        },
    });
    let materials = [grey, red];

    let (mut scene, world) = connect(config, HeadlessBackend::new(latency), bound)?;
    let handle = spawn_render_thread(world)?;
    tracing::info!(entities, cycles, latency, ?bound, "churn started");

    let mut live = VecDeque::new();
    let mut reclaimed = 0;
    let mut rejected = 0;
    for cycle in 0..cycles {
        let position = glam::Vec3::new((cycle % 32) as f32, 0.0, (cycle / 32) as f32);
        let id = scene.spawn_assets(
            &store,
            Transform::from_position(position),
            &[meshes[cycle % 2]],
            &[materials[cycle % 3 % 2]],
        )?;
        live.push_back(id);
        if cycle % 7 == 0 {
            scene.highlight(id)?;
        }
        if live.len() > entities {
            if let Some(victim) = live.pop_front() {
                match scene.delete(victim) {
                    // rejected by the renderer and already dropped
                    Err(SceneError::NotFound(_)) => {}
                    other => other?,
                }
            }
        }
        let report = scene.tick()?;
        reclaimed += report.reclaimed.len();
        rejected += report.rejected.len();
    }

    for id in live.drain(..) {
        match scene.delete(id) {
            Err(SceneError::NotFound(_)) => {}
            other => other?,
        }
    }
    while scene.pending_deletions() > 0 && !handle.is_finished() {
        reclaimed += scene.tick()?.reclaimed.len();
        std::thread::yield_now();
    }
    if !scene.is_shut_down() && !handle.is_finished() {
        scene.shutdown()?;
    }

    let world = handle
        .join()
        .map_err(|_| anyhow::anyhow!("render thread panicked"))??;
    println!(
        "Churn: spawned={cycles} reclaimed={reclaimed} rejected={rejected} epoch={}",
        scene.completed_epoch()
    );
    println!("{}", BufferInspector::summary(&world));
    for report in BufferInspector::reports(&world) {
        println!("  {report}");
    }

    if let Some(path) = save_assets {
        store.save(&path)?;
        println!("Saved {} assets to {}", store.len(), path.display());
    }
    Ok(())
}
