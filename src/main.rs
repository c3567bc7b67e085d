use anyhow::Context;
use clap::Parser;
use iq_slurper::{
    args::{convert_filter, Args},
    Recorder, RecorderConfig, SimulatedSource,
};
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    // Setup logging
    let filter = convert_filter(args.verbose.log_level_filter());
    tracing_subscriber::fmt().with_max_level(filter).init();
    info!("Starting iq_slurper!");

    let mut config = match &args.config {
        Some(path) => RecorderConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RecorderConfig::default(),
    };
    args.apply(&mut config);
    let recorder = Recorder::new(config).context("invalid recorder settings")?;

    // Ctrl-C stops acquisition, everything already captured is still written
    let stop = recorder.stop_handle();
    ctrlc::set_handler(move || {
        if stop.stop() {
            warn!("Interrupted, finishing up");
        }
    })
    .context("installing Ctrl-C handler")?;

    let mut source = SimulatedSource::new().overflow_rate(args.overflow_rate);
    let outcome = recorder.run(&mut source).context("recording failed")?;

    println!("{}", outcome.report);
    println!("Data written to {}", outcome.data_path.display());
    if let Some(meta) = &outcome.meta_path {
        println!("Metadata written to {}", meta.display());
    }
    outcome.into_result().context("recording ended with an error")?;
    Ok(())
}
