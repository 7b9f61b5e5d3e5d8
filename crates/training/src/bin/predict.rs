use clap::Parser;
use ecg_training::util::{init_tracing, run_predict, PredictArgs};

fn main() -> anyhow::Result<()> {
    init_tracing();
    run_predict(PredictArgs::parse())?;
    Ok(())
}
