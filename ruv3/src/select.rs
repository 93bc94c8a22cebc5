//! Choosing the number of unwanted factors
//!
//! Every candidate `k` reuses one [`FactorModel`]. Each corrected
//! matrix is reduced by PCA and scored by two silhouettes: cells of a
//! type should cluster (higher is better) and batches should mix
//! (lower is better).

use crate::common::*;
use crate::factor_model::{check_controls, FactorModel};
use crate::materialize::CorrectedView;
use crate::pca::{block_pca, PcaArgs};
use crate::replicate::ReplicateMatrix;
use crate::ruv::{apply_correction, RuvArgs, RuvOutput};
use fnv::FnvHashSet as HashSet;
use matrix_util::silhouette::silhouette_score;
use matrix_util::utils::encode_levels;
use rayon::prelude::*;
use std::hash::Hash;

pub type CombineFn = fn(f64, f64) -> f64;

/// How the two normalized silhouettes become one score
///
/// `a = (s_cell_type + 1) / 2` and `b = 1 - (s_batch + 1) / 2`
#[derive(Debug, Clone, Copy, Default)]
pub enum ScoreCombiner {
    /// `2ab / (a + b)`
    #[default]
    HarmonicMean,
    /// `weight * a + (1 - weight) * b`
    WeightedMean { weight: f64 },
    Custom(CombineFn),
}

impl ScoreCombiner {
    pub fn combine(&self, silhouette_cell_type: f64, silhouette_batch: f64) -> f64 {
        let a = (silhouette_cell_type + 1.0) / 2.0;
        let b = 1.0 - (silhouette_batch + 1.0) / 2.0;
        match self {
            ScoreCombiner::HarmonicMean => {
                if a + b > 0.0 {
                    2.0 * a * b / (a + b)
                } else {
                    0.0
                }
            }
            ScoreCombiner::WeightedMean { weight } => weight * a + (1.0 - weight) * b,
            ScoreCombiner::Custom(f) => f(a, b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeepResults {
    #[default]
    All,
    /// drop every corrected matrix but the optimal one
    OptimalOnly,
}

#[derive(Debug, Clone, Default)]
pub struct SelectArgs {
    pub ruv: RuvArgs,
    pub pca: PcaArgs,
    pub combine: ScoreCombiner,
    pub keep: KeepResults,
    /// worker threads; the global rayon pool when `None`
    pub num_threads: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct CandidateScore {
    pub k: usize,
    pub silhouette_cell_type: f64,
    pub silhouette_batch: f64,
    pub combined: f64,
}

/// Progress of a selection run
#[derive(Debug, Clone)]
pub enum SelectEvent {
    Started { k: usize },
    Scored(CandidateScore),
    Failed { k: usize, reason: String },
    Optimum { k: usize, combined: Option<f64> },
}

/// Receives [`SelectEvent`]s, possibly from several worker threads
pub trait SelectObserver: Sync {
    fn notify(&self, event: &SelectEvent);
}

/// Forwards events to the `log` facade
pub struct LogObserver;

impl SelectObserver for LogObserver {
    fn notify(&self, event: &SelectEvent) {
        match event {
            SelectEvent::Started { k } => debug!("k = {}: started", k),
            SelectEvent::Scored(s) => info!(
                "k = {}: cell type {:.4}, batch {:.4}, combined {:.4}",
                s.k, s.silhouette_cell_type, s.silhouette_batch, s.combined
            ),
            SelectEvent::Failed { k, reason } => warn!("k = {}: failed: {}", k, reason),
            SelectEvent::Optimum { k, .. } => info!("optimal k = {}", k),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectOutput {
    /// corrected matrices in candidate order; only the optimum for
    /// [`KeepResults::OptimalOnly`]
    pub results: Vec<RuvOutput>,
    /// empty when a single candidate was given
    pub scores: Vec<CandidateScore>,
    pub optimal_k: usize,
    pub failures: Vec<(usize, String)>,
    pub model: Arc<FactorModel>,
}

impl SelectOutput {
    pub fn result(&self, k: usize) -> Option<&RuvOutput> {
        self.results.iter().find(|r| r.k == k)
    }

    pub fn optimal(&self) -> Option<&RuvOutput> {
        self.result(self.optimal_k)
    }
}

/// Run RUV-III for each candidate `k` and pick the best
///
/// * `y_std` - standardized expression (m x n)
/// * `replicates` - replicate structure (m x r)
/// * `controls` - negative-control features
/// * `candidates` - factor counts to try, in order of preference on ties
/// * `cell_type` - biological labels; replicate sets stand in when `None`
/// * `batch` - batch labels
/// * `observer` - progress callback
#[allow(clippy::too_many_arguments)]
pub fn select<S, C, T>(
    y_std: &S,
    replicates: &ReplicateMatrix,
    controls: &[usize],
    candidates: &[usize],
    cell_type: Option<&[C]>,
    batch: &[T],
    args: &SelectArgs,
    observer: Option<&dyn SelectObserver>,
) -> anyhow::Result<SelectOutput>
where
    S: ExprSource + ?Sized,
    C: Eq + Hash + Clone + Sync,
    T: Eq + Hash + Clone + Sync,
{
    let mm = y_std.nrows();

    if candidates.is_empty() {
        return Err(RuvError::InvalidArgument("no candidate factor counts".into()).into());
    }
    let distinct: HashSet<usize> = candidates.iter().copied().collect();
    if distinct.len() != candidates.len() {
        return Err(
            RuvError::InvalidArgument("candidate factor counts contain duplicates".into()).into(),
        );
    }
    if batch.len() != mm {
        return Err(RuvError::Shape(format!(
            "{} batch labels for {} observations",
            batch.len(),
            mm
        ))
        .into());
    }
    if let Some(cell_type) = cell_type {
        if cell_type.len() != mm {
            return Err(RuvError::Shape(format!(
                "{} cell-type labels for {} observations",
                cell_type.len(),
                mm
            ))
            .into());
        }
    }
    if replicates.nrows() != mm {
        return Err(RuvError::Shape(format!(
            "replicate matrix has {} rows for {} observations",
            replicates.nrows(),
            mm
        ))
        .into());
    }

    let max_k = candidates.iter().copied().max().unwrap_or(0);
    check_controls(y_std.ncols(), controls, max_k)?;
    replicates.check_membership()?;

    let run = || -> anyhow::Result<SelectOutput> {
        let model = Arc::new(FactorModel::fit(
            y_std,
            replicates,
            controls,
            &args.ruv.model_args(max_k),
        )?);

        if let [k] = candidates {
            return select_single(y_std, model, *k, args, observer);
        }

        let cell_labels = match cell_type {
            Some(cell_type) => encode_levels(cell_type).0,
            None => replicates.labels()?,
        };
        let (batch_labels, batch_levels) = encode_levels(batch);
        if batch_levels.len() < 2 {
            return Err(RuvError::Degenerate("batch has a single level".into()).into());
        }
        if cell_labels.iter().collect::<HashSet<_>>().len() < 2 {
            return Err(RuvError::Degenerate("cell types have a single level".into()).into());
        }

        let scorer = Scorer {
            cell_labels,
            batch_labels,
            args,
        };

        let evaluated = candidates
            .par_iter()
            .map(|&k| {
                notify(observer, SelectEvent::Started { k });
                let ret = scorer.evaluate(y_std, &model, k);
                if let Ok((_, score)) = &ret {
                    notify(observer, SelectEvent::Scored(*score));
                }
                (k, ret)
            })
            .collect::<Vec<_>>();

        let (kept, failures) = partition_failures(evaluated, observer);
        if kept.is_empty() {
            return Err(RuvError::AllCandidatesFailed(candidates.len()).into());
        }

        let scores: Vec<CandidateScore> = kept.iter().map(|(_, s)| *s).collect();
        let best = pick_optimal(&scores).ok_or(RuvError::AllCandidatesFailed(candidates.len()))?;
        let optimal_k = best.k;

        let results = match args.keep {
            KeepResults::All => kept.into_iter().filter_map(|(r, _)| r).collect(),
            KeepResults::OptimalOnly => {
                vec![apply_correction(y_std, &model, optimal_k, &args.ruv)?]
            }
        };

        notify(
            observer,
            SelectEvent::Optimum {
                k: optimal_k,
                combined: Some(best.combined),
            },
        );
        info!(
            "selected k = {} out of {} candidates (score {:.4})",
            optimal_k,
            candidates.len(),
            best.combined
        );

        Ok(SelectOutput {
            results,
            scores,
            optimal_k,
            failures,
            model,
        })
    };

    match args.num_threads {
        Some(num_threads) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()?;
            pool.install(run)
        }
        None => run(),
    }
}

/// A single candidate is optimal by definition; its failure is fatal
fn select_single<S>(
    y_std: &S,
    model: Arc<FactorModel>,
    k: usize,
    args: &SelectArgs,
    observer: Option<&dyn SelectObserver>,
) -> anyhow::Result<SelectOutput>
where
    S: ExprSource + ?Sized,
{
    notify(observer, SelectEvent::Started { k });
    let out = apply_correction(y_std, &model, k, &args.ruv)?;
    notify(observer, SelectEvent::Optimum { k, combined: None });
    Ok(SelectOutput {
        results: vec![out],
        scores: vec![],
        optimal_k: k,
        failures: vec![],
        model,
    })
}

struct Scorer<'a> {
    cell_labels: Vec<usize>,
    batch_labels: Vec<usize>,
    args: &'a SelectArgs,
}

impl Scorer<'_> {
    fn evaluate<S>(
        &self,
        y_std: &S,
        model: &FactorModel,
        k: usize,
    ) -> anyhow::Result<(Option<RuvOutput>, CandidateScore)>
    where
        S: ExprSource + ?Sized,
    {
        match self.args.keep {
            KeepResults::All => {
                let out = apply_correction(y_std, model, k, &self.args.ruv)?;
                let score = self.score(&out.new_y, k)?;
                Ok((Some(out), score))
            }
            KeepResults::OptimalOnly => {
                let view = CorrectedView::new(y_std, model, k, None)?;
                Ok((None, self.score(&view, k)?))
            }
        }
    }

    fn score<S>(&self, corrected: &S, k: usize) -> anyhow::Result<CandidateScore>
    where
        S: ExprSource + ?Sized,
    {
        let pcs = block_pca(corrected, &self.args.pca)?;
        let silhouette_cell_type = silhouette_score(&pcs, &self.cell_labels)?;
        let silhouette_batch = silhouette_score(&pcs, &self.batch_labels)?;
        let combined = self
            .args
            .combine
            .combine(silhouette_cell_type, silhouette_batch);

        if !(silhouette_cell_type.is_finite()
            && silhouette_batch.is_finite()
            && combined.is_finite())
        {
            return Err(RuvError::NonFinite {
                stage: "scoring",
                k: Some(k),
            }
            .into());
        }

        Ok(CandidateScore {
            k,
            silhouette_cell_type,
            silhouette_batch,
            combined,
        })
    }
}

fn notify(observer: Option<&dyn SelectObserver>, event: SelectEvent) {
    if let Some(observer) = observer {
        observer.notify(&event);
    }
}

type Evaluated = (Option<RuvOutput>, CandidateScore);

/// Split evaluated candidates into successes and `(k, reason)` failures,
/// preserving candidate order
fn partition_failures(
    evaluated: Vec<(usize, anyhow::Result<Evaluated>)>,
    observer: Option<&dyn SelectObserver>,
) -> (Vec<Evaluated>, Vec<(usize, String)>) {
    let mut kept = vec![];
    let mut failures = vec![];
    for (k, ret) in evaluated {
        match ret {
            Ok(x) => kept.push(x),
            Err(err) => {
                let reason = format!("{:#}", err);
                warn!("skipping k = {}: {}", k, reason);
                notify(
                    observer,
                    SelectEvent::Failed {
                        k,
                        reason: reason.clone(),
                    },
                );
                failures.push((k, reason));
            }
        }
    }
    (kept, failures)
}

/// Highest combined score; the earliest candidate wins ties
pub fn pick_optimal(scores: &[CandidateScore]) -> Option<&CandidateScore> {
    scores.iter().fold(None, |best, s| match best {
        Some(b) if b.combined >= s.combined => Some(b),
        _ => Some(s),
    })
}
