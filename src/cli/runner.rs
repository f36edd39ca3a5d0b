use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use flexcal::api::{WorkspaceLayout, run_workspace};
use flexcal::core::params::CalValParams;

use super::args::CliArgs;
use super::errors::AppError;

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // a subscriber may already be installed when embedded
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn layout_from(args: &CliArgs) -> WorkspaceLayout {
    let mut layout = WorkspaceLayout::new(&args.work_dir);
    if let Some(sites) = &args.sites {
        layout.sites = sites.clone();
    }
    if let Some(flox) = &args.flox {
        layout.flox = flox.clone();
    }
    layout
}

/// Defaults, then the config file, then command-line flags.
fn build_params(args: &CliArgs, layout: &WorkspaceLayout) -> Result<CalValParams, AppError> {
    let mut params = match &args.config {
        Some(path) if !path.exists() => {
            return Err(AppError::ConfigNotFound { path: path.clone() });
        }
        Some(path) => CalValParams::from_json_file(path)?,
        None if layout.config_file().exists() => {
            CalValParams::from_json_file(&layout.config_file())?
        }
        None => CalValParams::default(),
    };

    if let Some(mode) = args.mode {
        params.mode = mode;
    }
    if let Some(roi) = args.roi {
        params.roi_size = roi;
    }
    if let Some(v) = args.cv_threshold {
        params.cv_threshold = v;
    }
    if let Some(v) = args.cloud_threshold {
        params.cloud_threshold = v;
    }
    if let Some(v) = args.vegetation_threshold {
        params.vegetation_threshold = v;
    }
    if let Some(days) = args.time_window {
        params.time_window_days = days;
    }
    if let Some(proxy) = args.proxy {
        params.proxy = proxy;
    }
    if args.delete_cache {
        params.delete_cache = true;
    }
    if let Some(keep) = args.keep_interim {
        params.keep_interim = keep;
    }
    params.validate()?;
    Ok(params)
}

pub fn run(args: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(args.log);

    if !args.work_dir.is_dir() {
        return Err(AppError::WorkDirNotFound {
            path: args.work_dir.clone(),
        }
        .into());
    }
    let layout = layout_from(&args);
    let params = build_params(&args, &layout)?;
    debug!("Effective parameters: {:?}", params);

    info!("Work directory: {:?}", layout.work_dir);
    let report = run_workspace(&layout, &params).map_err(AppError::from)?;

    info!("Sites: {}", report.counters.sites);
    info!("FLEX images: {}", report.counters.flex_images);
    info!("Processed: {}", report.counters.processed);
    info!("Skipped: {}", report.counters.skipped);
    info!("Errors: {}", report.counters.errors);
    info!("Matchups: {}", report.counters.matchups);
    Ok(())
}
