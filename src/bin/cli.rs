use slidescan::config::ScannerConfig;
use slidescan::errors::ScanError;
use slidescan::stitch;
use slidescan::sweep::session::Session;
use slidescan::sweep::{RegionReport, SweepController};
use slidescan::testing::SimulatedRig;
use slidescan::types::CornerSet;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    slidescan::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: slidescan-cli <command> [args]");
        eprintln!("Commands: scan, stitch");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "scan" => cmd_scan(&args),
        "stitch" => cmd_stitch(&args),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn cmd_scan(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    // Parse args: scan [--corners <path>] [--calibration-corners <path>]
    //   [--output <dir>] [--config <path>] [--skip-calibration] [--skip-scan]
    //   [--stitch-only]
    let mut corners_path: Option<String> = None;
    let mut calibration_path: Option<String> = None;
    let mut output: Option<String> = None;
    let mut config_path: Option<String> = None;
    let mut skip_calibration = false;
    let mut skip_scan = false;
    let mut stitch_only = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--corners" => {
                i += 1;
                corners_path = Some(args[i].clone());
            }
            "--calibration-corners" => {
                i += 1;
                calibration_path = Some(args[i].clone());
            }
            "--output" => {
                i += 1;
                output = Some(args[i].clone());
            }
            "--config" => {
                i += 1;
                config_path = Some(args[i].clone());
            }
            "--skip-calibration" => skip_calibration = true,
            "--skip-scan" => skip_scan = true,
            "--stitch-only" => stitch_only = true,
            other => {
                eprintln!("Unknown scan option: {}", other);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let config = match config_path {
        Some(path) => ScannerConfig::load_from_file(path)?,
        None => ScannerConfig::load_from_file(ScannerConfig::default_path())?,
    };
    let output = output.unwrap_or_else(|| config.storage.output_directory.clone());

    if stitch_only || (skip_calibration && skip_scan) {
        println!("STITCHING ONLY MODE");
        return stitch_latest_session(&output, &config);
    }

    let mut session = Session::create(&output)?;
    println!("Session: {}", session.name);

    // Honor Ctrl-C at cell boundaries; the cell in flight finishes first.
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            eprintln!("Stop requested, finishing current cell...");
            stop.store(true, std::sync::atomic::Ordering::SeqCst);
        })?;
    }

    let mut regions: Vec<(&str, String)> = Vec::new();
    if !skip_calibration {
        if let Some(path) = calibration_path {
            regions.push(("calibration", path));
        }
    }
    if !skip_scan {
        match corners_path {
            Some(path) => regions.push(("slide", path)),
            None => {
                eprintln!("scan requires --corners <path> (or --stitch-only)");
                std::process::exit(1);
            }
        }
    }

    for (region, corners_file) in regions {
        let outcome = scan_region(&mut session, region, &corners_file, &config, &stop);
        if let Err(e) = outcome {
            // Persist what we have before giving up.
            session.write_summary()?;
            return Err(e.into());
        }
        if stop.load(std::sync::atomic::Ordering::SeqCst) {
            break;
        }
    }

    session.write_summary()?;
    println!("Session complete: {:?}", session.root);
    Ok(())
}

/// Sweep one region and assemble its composite.
///
/// Hardware note: drivers for real stages and cameras live outside this
/// crate; until one is wired in, scans run against the simulated rig with
/// its focal plane at the region's bottom-left corner Z.
fn scan_region(
    session: &mut Session,
    region: &str,
    corners_file: &str,
    config: &ScannerConfig,
    stop: &Arc<AtomicBool>,
) -> Result<(), ScanError> {
    println!("Scanning region '{}' from {}", region, corners_file);

    let corners = CornerSet::load_from_file(corners_file)?;
    let positions = slidescan::planner::plan(
        &corners,
        config.grid.step_x_mm,
        config.grid.step_y_mm,
    )?;

    let rig = SimulatedRig::new(corners.bottom_left.z);
    let mut stage = rig.stage();
    let mut camera = rig.camera();

    let directory = session.region_dir(region);
    let mut report = RegionReport::new(region, directory.clone(), &positions);

    let run_result = SweepController::new(&mut stage, &mut camera, &config.focus, &config.sweep)
        .with_stop_flag(Arc::clone(stop))
        .run(&positions, &mut report);

    let (cols, rows) = (report.cols, report.rows);
    session.push_region(report);
    run_result?;

    let tiles = stitch::discover_tiles(&directory)?;
    if tiles.is_empty() {
        println!("Region '{}' produced no tiles; skipping composite", region);
        return Ok(());
    }
    let (_, _, tile_w, tile_h) = stitch::infer_layout(&tiles)?;
    let path = stitch::assemble_to_file(&directory, cols, rows, tile_w, tile_h, &config.stitch)?;
    println!("Composite written: {:?}", path);
    Ok(())
}

fn stitch_latest_session(
    output: &str,
    config: &ScannerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let latest = latest_session_dir(Path::new(output))
        .ok_or_else(|| ScanError::Io(format!("no scan_session_* directories under {}", output)))?;
    let session = Session::open(&latest)?;
    println!("Using session directory: {:?}", session.root);

    let slide_dir = session.region_dir("slide");
    let dir = if slide_dir.is_dir() {
        slide_dir
    } else {
        session.root.clone()
    };
    stitch_directory(&dir, None, config)?;
    Ok(())
}

fn cmd_stitch(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    // Parse args: stitch <dir> [--cols <n>] [--rows <n>]
    //   [--tile-width <px>] [--tile-height <px>]
    let mut dir: Option<String> = None;
    let mut cols: Option<u32> = None;
    let mut rows: Option<u32> = None;
    let mut tile_width: Option<u32> = None;
    let mut tile_height: Option<u32> = None;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--cols" => {
                i += 1;
                cols = Some(args[i].parse()?);
            }
            "--rows" => {
                i += 1;
                rows = Some(args[i].parse()?);
            }
            "--tile-width" => {
                i += 1;
                tile_width = Some(args[i].parse()?);
            }
            "--tile-height" => {
                i += 1;
                tile_height = Some(args[i].parse()?);
            }
            other => {
                if dir.is_none() {
                    dir = Some(other.to_string());
                } else {
                    eprintln!("Unknown stitch option: {}", other);
                    std::process::exit(1);
                }
            }
        }
        i += 1;
    }

    let dir = dir.ok_or("stitch requires a tile directory")?;
    let config = ScannerConfig::load_from_file(ScannerConfig::default_path())?;

    let geometry = match (cols, rows, tile_width, tile_height) {
        (Some(c), Some(r), Some(w), Some(h)) => Some((c, r, w, h)),
        (None, None, None, None) => None,
        _ => {
            eprintln!("stitch needs either all of --cols/--rows/--tile-width/--tile-height or none");
            std::process::exit(1);
        }
    };

    stitch_directory(Path::new(&dir), geometry, &config)?;
    Ok(())
}

fn stitch_directory(
    dir: &Path,
    geometry: Option<(u32, u32, u32, u32)>,
    config: &ScannerConfig,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let (cols, rows, tile_w, tile_h) = match geometry {
        Some(g) => g,
        None => {
            let tiles = stitch::discover_tiles(dir)?;
            stitch::infer_layout(&tiles)?
        }
    };

    let path = stitch::assemble_to_file(dir, cols, rows, tile_w, tile_h, &config.stitch)?;
    println!("Composite written: {:?}", path);
    Ok(path)
}

/// Most recent `scan_session_*` directory under `parent`, by name.
fn latest_session_dir(parent: &Path) -> Option<PathBuf> {
    let mut sessions: Vec<PathBuf> = std::fs::read_dir(parent)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("scan_session_"))
        })
        .collect();
    sessions.sort();
    sessions.pop()
}
