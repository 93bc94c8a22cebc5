use clap::Args;
use log::info;
use matrix_util::common_io::{mkdir, write_lines};
use matrix_util::traits::IoOps;
use ruv3::simulate::{generate_ruv_data, SimArgs};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Output header
    #[arg(long, short, required = true)]
    out: Box<str>,

    /// number of cells (rows)
    #[arg(long, default_value_t = 200)]
    cells: usize,

    /// number of genes (columns)
    #[arg(long, default_value_t = 1000)]
    genes: usize,

    /// number of negative-control genes (the first ones)
    #[arg(long, default_value_t = 100)]
    controls: usize,

    #[arg(long, default_value_t = 3)]
    cell_types: usize,

    #[arg(long, default_value_t = 2)]
    batches: usize,

    /// number of unwanted factors
    #[arg(long, default_value_t = 2)]
    factors: usize,

    /// variance share of the unwanted factors
    #[arg(long, default_value_t = 0.1)]
    lambda: f64,

    /// variance share of the cell-type signal
    #[arg(long, default_value_t = 0.5)]
    pve_cell_type: f64,

    /// random seed
    #[arg(long, default_value_t = 42)]
    rseed: u64,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

pub fn run_simulate(args: &SimulateArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let sim = generate_ruv_data(&SimArgs {
        cells: args.cells,
        genes: args.genes,
        controls: args.controls,
        cell_types: args.cell_types,
        batches: args.batches,
        factors: args.factors,
        lambda: args.lambda,
        pve_cell_type: args.pve_cell_type,
        rseed: args.rseed,
    })?;

    mkdir(&args.out)?;

    let expr_file = format!("{}.expr.tsv.gz", args.out);
    sim.yy.to_tsv(&expr_file)?;
    write_lines(&sim.batch, &format!("{}.batch.gz", args.out))?;
    write_lines(&sim.cell_type, &format!("{}.celltype.gz", args.out))?;
    write_lines(&sim.controls, &format!("{}.controls.gz", args.out))?;
    sim.w.to_tsv(&format!("{}.factors.tsv.gz", args.out))?;

    info!(
        "wrote {} x {} expression to {} ({} true factors)",
        sim.yy.nrows(),
        sim.yy.ncols(),
        expr_file,
        sim.num_factors()
    );
    Ok(())
}
