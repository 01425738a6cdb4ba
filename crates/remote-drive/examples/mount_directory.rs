//! Example: project a local directory through ProjFS.
//!
//! Every file below the source directory appears under the mount point and
//! is hydrated on first access.
//!
//! Usage:
//!   cargo run --example mount_directory -- <source_dir> <mount_point>

#[cfg(target_os = "windows")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::path::PathBuf;
    use std::sync::Arc;

    use remote_drive::{DirectoryProvider, EngineOptions, ProjFsInstance, VirtualizationEngine};

    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <source_dir> <mount_point>", args[0]);
        std::process::exit(1);
    }

    let source_dir = PathBuf::from(&args[1]);
    let mount_point = PathBuf::from(&args[2]);

    let options = EngineOptions::new(&mount_point);
    let source = Arc::new(DirectoryProvider::new(&source_dir, &mount_point));
    let projection = Arc::new(ProjFsInstance::new(&options));
    let engine = VirtualizationEngine::new(source, projection, options)?;

    engine.start()?;
    println!(
        "Projecting {} at {}",
        source_dir.display(),
        mount_point.display()
    );
    println!("Press Ctrl+C to unmount...");

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(tokio::signal::ctrl_c())?;

    println!("Unmounting...");
    engine.stop()?;
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn main() {
    eprintln!("This example requires Windows with ProjFS enabled.");
    std::process::exit(1);
}
