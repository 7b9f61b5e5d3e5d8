use clap::Parser;
use ecg_dataset::ValidationOutcome;
use ecg_training::util::{init_tracing, run_summary, SummaryArgs};

fn main() -> anyhow::Result<()> {
    init_tracing();
    let report = run_summary(SummaryArgs::parse())?;
    if report.outcome == ValidationOutcome::Fail {
        std::process::exit(1);
    }
    Ok(())
}
