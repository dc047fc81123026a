#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use voxseg::data;
use voxseg::predict;
use voxseg::train;

// ========================================================================
//                      Command-line interface definition
// ========================================================================

#[derive(Parser)]
#[command(
    name = "voxseg",
    about = "Voxel-wise brain tissue classification from MRI feature volumes",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serialize a subject's text feature/label tables as .npy arrays
    Dump(DumpArgs),
    /// Train the tissue classifier from dumped training subjects
    Train(TrainArgs),
    /// Predict tissue classes for a subject's feature volume
    Predict(PredictArgs),
}

#[derive(Args)]
struct DumpArgs {
    /// Directory holding the t1_features and labels tables
    #[arg(default_value = ".")]
    dir: PathBuf,
}

#[derive(Args)]
struct TrainArgs {
    /// Study rsxn directory holding per-subject trainMsk dumps
    rsxn_dir: PathBuf,

    /// Training subject ids
    #[arg(required = true, num_args = 3..=5)]
    subjects: Vec<String>,
}

#[derive(Args)]
struct PredictArgs {
    /// Study data directory containing the trained classifier
    data_dir: PathBuf,

    /// Subject working directory holding t1.nii
    #[arg(default_value = ".")]
    work_dir: PathBuf,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Dump(args) => run_dump(args),
        Commands::Train(args) => run_train(args),
        Commands::Predict(args) => run_predict(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_dump(args: DumpArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Dumping training arrays from: {}", args.dir.display());
    let summary = data::dump(&args.dir)?;
    println!(
        "Wrote {} and {} ({} voxels x {} feature channels)",
        data::FEATURES_NPY,
        data::LABELS_NPY,
        summary.n_samples,
        summary.n_features
    );
    Ok(())
}

fn run_train(args: TrainArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "Training tissue classifier from: {}",
        args.rsxn_dir.display()
    );
    let outcome = train::train(&args.rsxn_dir, &args.subjects)?;
    println!(
        "Trained on {} voxels ({} feature channels, {} classes)",
        outcome.n_samples, outcome.n_features, outcome.n_classes
    );
    println!("Held-out accuracy: {:.4}", outcome.accuracy);
    println!("Classifier saved to: {}", outcome.classifier_dir.display());
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "Predicting tissue classes in: {}",
        args.work_dir.display()
    );
    let outcome = predict::predict(&args.data_dir, &args.work_dir)?;
    println!(
        "Classified {} voxels over {} classes",
        outcome.n_voxels, outcome.n_classes
    );
    println!(
        "Predictions saved to: {} and {}",
        outcome.class_image.display(),
        outcome.probability_image.display()
    );
    Ok(())
}
