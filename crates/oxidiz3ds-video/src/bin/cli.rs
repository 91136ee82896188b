use clap::Parser;
use oxidiz3ds_video::backend::software::SoftwareBackend;
use oxidiz3ds_video::custom_tex::{TexturePack, TexturePackOptions};
use oxidiz3ds_video::trace::{build_memory, parse_trace, replay};
use oxidiz3ds_video::{Args, Renderer};
use tracing::info;

fn main() {
    // Parse command-line arguments
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load and parse the trace
    info!("Loading trace from file: {:?}", args.trace);
    let source = match std::fs::read_to_string(&args.trace) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Failed to read trace file: {}", e);
            std::process::exit(2);
        }
    };
    let commands = match parse_trace(&source) {
        Ok(commands) => commands,
        Err(e) => {
            eprintln!("Failed to parse trace: {}", e);
            std::process::exit(2);
        }
    };
    let memory = match build_memory(&commands) {
        Ok(memory) => memory,
        Err(e) => {
            eprintln!("Failed to map memory: {}", e);
            std::process::exit(2);
        }
    };

    let config = args.to_cache_config();
    let pack = TexturePack::new(TexturePackOptions {
        async_loading: config.async_custom_loading,
        ..Default::default()
    });
    let mut renderer = Renderer::new(
        Box::new(memory),
        SoftwareBackend::with_conversion(args.convert),
        Box::new(pack),
        config.clone(),
    );

    // Replay
    info!("=== Replaying {} commands ===", commands.len());
    let output = match replay(&mut renderer, &commands, &config) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("Trace replay failed: {}", e);
            std::process::exit(2);
        }
    };
    print!("{}", output);

    if args.flush_on_exit {
        renderer.cache_mut().flush_all();
    }

    // Log final state
    info!("=== Replay Complete ===");
    let stats = renderer.stats();
    let backend = renderer.cache().backend().stats();
    println!("frames: {}", renderer.frame());
    println!(
        "surfaces: {} ({} fills), created: {}, cubes: {}",
        stats.surfaces, stats.fill_surfaces, stats.surfaces_created, stats.texture_cubes
    );
    println!(
        "dirty bytes: {}, cached pages: {}, pending custom uploads: {}",
        stats.dirty_bytes, stats.cached_pages, stats.pending_custom_uploads
    );
    println!(
        "backend: {} textures, {} uploads, {} downloads, {} blits, {} copies, {} clears, {} reinterpretations",
        backend.textures_created,
        backend.uploads,
        backend.downloads,
        backend.blits,
        backend.copies,
        backend.clears,
        backend.reinterpretations
    );
}
