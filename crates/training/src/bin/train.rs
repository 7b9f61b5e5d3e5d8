use clap::Parser;
use ecg_training::util::{init_tracing, run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = TrainArgs::parse();
    let report = run_train(args)?;
    if let Some(path) = &report.best_checkpoint {
        println!("best checkpoint: {}", path.display());
    }
    println!("last checkpoint: {}", report.last_checkpoint.display());
    if let Some(test) = &report.test {
        println!("test: {test}");
    }
    Ok(())
}
