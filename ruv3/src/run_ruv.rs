use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use matrix_util::common_io::{mkdir, read_lines, write_lines};
use matrix_util::dmatrix_svd::SvdMethod;
use matrix_util::traits::IoOps;
use ruv3::common::*;
use ruv3::pca::PcaArgs;
use ruv3::pipeline::{run_ruv3, PipelineArgs};
use ruv3::replicate::ReplicateMatrix;
use ruv3::ruv::RuvArgs;
use ruv3::select::*;
use ruv3::standardize::{StandardizeArgs, ZeroVariance};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SvdBackend {
    Exact,
    Truncated,
    Randomized,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Expression matrix (cells x genes, tab-separated)
    #[arg(required = true)]
    expr_file: Box<str>,

    /// batch label per cell, one per line
    #[arg(long, short, required = true)]
    batch_file: Box<str>,

    /// negative-control gene indexes (0-based), one per line
    #[arg(long, short, required = true)]
    controls_file: Box<str>,

    /// replicate (pseudo-replicate) label per cell; cell types are
    /// used when omitted
    #[arg(long, short)]
    replicate_file: Option<Box<str>>,

    /// cell-type label per cell for scoring
    #[arg(long, short = 't')]
    celltype_file: Option<Box<str>>,

    /// candidate numbers of unwanted factors (comma-separated)
    #[arg(long, short, value_delimiter(','), default_values_t = vec![5, 10, 15, 20])]
    k: Vec<usize>,

    /// SVD backend for the factor model
    #[arg(long, value_enum, default_value = "exact")]
    svd: SvdBackend,

    /// rank bound for the truncated and randomized backends
    #[arg(long)]
    svd_k: Option<usize>,

    /// number of principal components for scoring
    #[arg(long, default_value_t = DEFAULT_NUM_PCS)]
    num_pcs: usize,

    /// random seed for PCA and randomized SVD
    #[arg(long, default_value_t = 42)]
    rseed: u64,

    /// block_size (# rows) for parallel processing
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    /// number of worker threads (default: all logical CPUs)
    #[arg(long)]
    threads: Option<usize>,

    /// centre zero-variance genes instead of failing
    #[arg(long)]
    skip_zero_variance: bool,

    /// keep only the corrected matrix of the optimal k
    #[arg(long)]
    optimal_only: bool,

    /// save unwanted factors W for each k
    #[arg(long)]
    return_info: bool,

    /// keep corrected matrices on the standardized scale
    #[arg(long)]
    no_restore: bool,

    /// Output header
    #[arg(long, short, required = true)]
    out: Box<str>,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

/// Progress bar over candidates
struct ProgressObserver {
    pb: ProgressBar,
}

impl SelectObserver for ProgressObserver {
    fn notify(&self, event: &SelectEvent) {
        match event {
            SelectEvent::Scored(_) | SelectEvent::Failed { .. } => self.pb.inc(1),
            SelectEvent::Optimum { .. } => self.pb.finish_and_clear(),
            SelectEvent::Started { .. } => {}
        }
        LogObserver.notify(event);
    }
}

fn read_labels(file: &str) -> anyhow::Result<Vec<Box<str>>> {
    let labels = read_lines(file)?;
    info!("read {} labels from {}", labels.len(), file);
    Ok(labels)
}

pub fn run_ruv(args: &RunArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    // 1. inputs
    let yy = Mat::from_tsv(&args.expr_file, None)?;
    info!("expression: {} x {}", yy.nrows(), yy.ncols());

    let batch = read_labels(&args.batch_file)?;
    let controls = read_lines(&args.controls_file)?
        .iter()
        .map(|x| {
            x.parse::<usize>()
                .map_err(|e| anyhow::anyhow!("control index `{}`: {}", x, e))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let cell_type = args
        .celltype_file
        .as_deref()
        .map(read_labels)
        .transpose()?;

    let replicates = match (args.replicate_file.as_deref(), cell_type.as_ref()) {
        (Some(file), _) => ReplicateMatrix::from_labels(&read_labels(file)?),
        (None, Some(cell_type)) => ReplicateMatrix::from_labels(cell_type),
        (None, None) => {
            return Err(anyhow::anyhow!("need either a replicate file or a cell-type file"));
        }
    };

    // 2. configuration
    let num_threads = args.threads.unwrap_or_else(num_cpus::get);
    info!("will use {} threads", num_threads);

    let svd_rank = args
        .svd_k
        .unwrap_or_else(|| args.k.iter().copied().max().unwrap_or(1));
    let svd = match args.svd {
        SvdBackend::Exact => SvdMethod::Exact,
        SvdBackend::Truncated => SvdMethod::Truncated { rank: svd_rank },
        SvdBackend::Randomized => SvdMethod::Randomized {
            rank: svd_rank,
            seed: args.rseed,
        },
    };

    let pipeline_args = PipelineArgs {
        standardize: StandardizeArgs {
            block_size: args.block_size,
            zero_variance: if args.skip_zero_variance {
                ZeroVariance::Skip
            } else {
                ZeroVariance::Error
            },
        },
        select: SelectArgs {
            ruv: RuvArgs {
                svd,
                svd_k: args.svd_k,
                block_size: args.block_size,
                return_info: args.return_info,
            },
            pca: PcaArgs {
                num_pcs: args.num_pcs,
                seed: args.rseed,
                block_size: args.block_size,
                ..Default::default()
            },
            combine: ScoreCombiner::HarmonicMean,
            keep: if args.optimal_only {
                KeepResults::OptimalOnly
            } else {
                KeepResults::All
            },
            num_threads: Some(num_threads),
        },
        restore: !args.no_restore,
    };

    let observer = if args.verbose {
        let pb = ProgressBar::new(args.k.len() as u64);
        pb.set_style(ProgressStyle::with_template("{bar:40} {pos}/{len} candidates")?);
        Some(ProgressObserver { pb })
    } else {
        None
    };

    // 3. run
    let out = run_ruv3(
        &yy,
        &batch,
        &replicates,
        &controls,
        &args.k,
        cell_type.as_deref(),
        &pipeline_args,
        observer.as_ref().map(|o| o as &dyn SelectObserver),
    )?;

    // 4. outputs
    mkdir(&args.out)?;
    let selected = &out.selected;

    for res in selected.results.iter() {
        let file = format!("{}.k{}.tsv.gz", args.out, res.k);
        res.new_y.to_tsv(&file)?;
        info!("wrote corrected matrix for k = {} to {}", res.k, file);

        if let Some(w) = &res.w {
            w.to_tsv(&format!("{}.k{}.w.tsv.gz", args.out, res.k))?;
        }
    }

    selected
        .model
        .fullalpha()
        .to_tsv(&format!("{}.alpha.tsv.gz", args.out))?;

    write_lines(
        &out.standardized.variance.iter().copied().collect::<Vec<f64>>(),
        &format!("{}.variance.gz", args.out),
    )?;

    let failures: Vec<serde_json::Value> = selected
        .failures
        .iter()
        .map(|(k, reason)| serde_json::json!({ "k": k, "reason": reason }))
        .collect();

    let summary = serde_json::json!({
        "optimal_k": selected.optimal_k,
        "scores": selected.scores,
        "failures": failures,
    });
    let json_file = format!("{}.scores.json", args.out);
    std::fs::write(&json_file, serde_json::to_string_pretty(&summary)?)?;
    info!("optimal k = {}; scores in {}", selected.optimal_k, json_file);

    Ok(())
}
