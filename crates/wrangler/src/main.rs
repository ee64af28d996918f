use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tch::Tensor;

use wrangler::{DatasetManager, ModelTester, ModelWrangler};
use wrangler_core::corral::{LinearRegressionModel, LogisticRegressionModel, LstmModel, TextLstmModel};
use wrangler_core::{Architecture, ModelParams, Shape};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model and checkpoint it after every epoch
    Train {
        #[command(flatten)]
        run: RunArgs,

        /// Fraction of samples held out for scoring
        #[arg(long, default_value_t = 0.1)]
        holdout_fraction: f64,
    },
    /// Run the sanity checks against a freshly built model
    Check {
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Model params file (.yaml, .yml or .json)
    #[arg(short, long)]
    params: PathBuf,

    /// JSON data file with `inputs` and `targets`, one list per source
    #[arg(short, long)]
    data: PathBuf,

    /// Model family to build
    #[arg(short, long, value_enum)]
    model: ModelKind,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModelKind {
    Linear,
    Logistic,
    Lstm,
    TextLstm,
}

/// Numeric data: per source, per sample, the sample's values flattened.
#[derive(Deserialize)]
struct NumericData {
    inputs: Vec<Vec<Vec<f32>>>,
    targets: Vec<Vec<Vec<f32>>>,
}

#[derive(Deserialize)]
struct TextData {
    inputs: Vec<Vec<String>>,
    targets: Vec<Vec<String>>,
}

fn to_tensor(samples: Vec<Vec<f32>>, shape: &Shape) -> Result<Tensor> {
    let n = samples.len() as i64;
    let width = shape.numel() as usize;
    let mut flat = Vec::with_capacity(samples.len() * width);
    for (idx, sample) in samples.into_iter().enumerate() {
        if sample.len() != width {
            bail!("Sample {} has {} values, expected {} for shape {:?}", idx, sample.len(), width, shape.dims());
        }
        flat.extend(sample);
    }
    Ok(Tensor::from_slice(&flat).view(shape.with_batch(n).as_slice()))
}

fn load_numeric(path: &Path, params: &ModelParams) -> Result<DatasetManager<Tensor, Tensor>> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read data file {:?}", path))?;
    let data: NumericData = serde_json::from_str(&content).context("Failed to parse numeric data")?;
    if data.inputs.len() != params.graph.in_sizes.len() || data.targets.len() != params.graph.out_sizes.len() {
        bail!(
            "Data has {} input and {} target sources, params declare {} and {}",
            data.inputs.len(),
            data.targets.len(),
            params.graph.in_sizes.len(),
            params.graph.out_sizes.len()
        );
    }

    let inputs = data
        .inputs
        .into_iter()
        .zip(&params.graph.in_sizes)
        .map(|(samples, shape)| to_tensor(samples, shape))
        .collect::<Result<Vec<_>>>()?;
    let targets = data
        .targets
        .into_iter()
        .zip(&params.graph.out_sizes)
        .map(|(samples, &size)| to_tensor(samples, &Shape::from(size)))
        .collect::<Result<Vec<_>>>()?;
    DatasetManager::new(inputs, targets)
}

fn load_text(path: &Path) -> Result<DatasetManager<Vec<String>, Vec<String>>> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read data file {:?}", path))?;
    let data: TextData = serde_json::from_str(&content).context("Failed to parse text data")?;
    DatasetManager::new(data.inputs, data.targets)
}

fn run<A: Architecture>(
    params: ModelParams,
    data: DatasetManager<A::Input, A::Target>,
    command: &Commands,
) -> Result<()> {
    let seed = params.training.seed;
    let mut wrangler = ModelWrangler::<A>::new(params)?;

    match command {
        Commands::Train {
            holdout_fraction, ..
        } => {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed as u64),
                None => StdRng::from_entropy(),
            };
            let (training, holdout) = data.split(*holdout_fraction, &mut rng)?;
            wrangler.add_data(training, holdout);

            let report = wrangler.train()?;
            println!(
                "Trained {} steps | final training loss {:.4} | final holdout loss {:?}",
                report.steps, report.final_training_loss, report.final_holdout_loss
            );
        }
        Commands::Check { .. } => {
            let report = ModelTester::new(&mut wrangler).run(data.inputs(), data.targets())?;
            print!("{}", report);
            if !report.all_passed() {
                bail!("{} check(s) failed", report.failures().count());
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let args = match &cli.command {
        Commands::Train { run: args, .. } | Commands::Check { run: args } => args,
    };
    let params = ModelParams::from_file(&args.params)
        .with_context(|| format!("Failed to load params from {:?}", args.params))?;

    match args.model {
        ModelKind::Linear => {
            let data = load_numeric(&args.data, &params)?;
            run::<LinearRegressionModel>(params, data, &cli.command)
        }
        ModelKind::Logistic => {
            let data = load_numeric(&args.data, &params)?;
            run::<LogisticRegressionModel>(params, data, &cli.command)
        }
        ModelKind::Lstm => {
            let data = load_numeric(&args.data, &params)?;
            run::<LstmModel>(params, data, &cli.command)
        }
        ModelKind::TextLstm => {
            let data = load_text(&args.data)?;
            run::<TextLstmModel>(params, data, &cli.command)
        }
    }
}
