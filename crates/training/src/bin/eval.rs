use clap::Parser;
use ecg_training::util::{init_tracing, run_eval, EvalArgs};

fn main() -> anyhow::Result<()> {
    init_tracing();
    let summary = run_eval(EvalArgs::parse())?;
    println!("Eval complete: {summary}");
    Ok(())
}
