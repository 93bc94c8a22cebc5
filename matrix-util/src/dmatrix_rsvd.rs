use crate::traits::SampleOps;
use log::debug;
use nalgebra::{DMatrix, DVector};

type Mat = DMatrix<f64>;
type DVec = DVector<f64>;

const DEFAULT_OVERSAMPLE: usize = 5;
const DEFAULT_POWER_ITER: usize = 5;

/// Randomized SVD with the default number of power iterations
pub trait RSVD {
    fn rsvd(&self, rank: usize, rseed: u64) -> anyhow::Result<(Mat, DVec, Mat)>;
}

impl RSVD for Mat {
    fn rsvd(&self, rank: usize, rseed: u64) -> anyhow::Result<(Mat, DVec, Mat)> {
        let mut rsvd = RandomizedSVD::new(rank, DEFAULT_POWER_ITER, rseed);
        rsvd.compute(self)?;
        Ok((
            rsvd.matrix_u().clone(),
            rsvd.singular_values().clone(),
            rsvd.matrix_v().clone(),
        ))
    }
}

/// Randomized SVD
///
/// Implement Alg 4.4 of Halko et al. (2009): randomized subspace
/// iteration with re-orthonormalization after every multiplication.
/// The test matrix is drawn from a seeded generator, so the output is
/// a deterministic function of `(xx, max_rank, iter, rseed)`.
///
pub struct RandomizedSVD {
    max_rank: usize,
    iter: usize,
    rseed: u64,
    u_vectors: Mat,
    singular_values: DVec,
    v_vectors: Mat,
    qq: Mat,
}

impl RandomizedSVD {
    pub fn new(max_rank: usize, iter: usize, rseed: u64) -> Self {
        Self {
            max_rank,
            iter,
            rseed,
            u_vectors: Mat::zeros(0, 0),
            singular_values: DVec::zeros(0),
            v_vectors: Mat::zeros(0, 0),
            qq: Mat::zeros(0, 0),
        }
    }

    pub fn matrix_u(&self) -> &Mat {
        &self.u_vectors
    }

    pub fn matrix_v(&self) -> &Mat {
        &self.v_vectors
    }

    pub fn singular_values(&self) -> &DVec {
        &self.singular_values
    }

    pub fn compute(&mut self, xx: &Mat) -> anyhow::Result<()> {
        let nr = xx.nrows();
        let nc = xx.ncols();

        let full_rank = nr.min(nc);
        if full_rank == 0 {
            anyhow::bail!("randomized SVD on an empty [{} x {}] matrix", nr, nc);
        }

        let mut rank = full_rank;
        let mut oversample = 0;

        if self.max_rank > 0 && rank > self.max_rank {
            rank = self.max_rank;
            oversample = DEFAULT_OVERSAMPLE.min(full_rank - rank);
        }

        self.rand_subspace_iteration(xx, rank + oversample);

        let bb = self.qq.transpose() * xx;

        debug!("Final svd on [{} x {}]", bb.nrows(), bb.ncols());

        let svd = bb.svd(true, true);

        if let (Some(svd_u), Some(svd_vt)) = (svd.u, svd.v_t) {
            let dd = &svd.singular_values;
            let mut order: Vec<usize> = (0..dd.len()).collect();
            order.sort_by(|&a, &b| dd[b].total_cmp(&dd[a]));
            order.truncate(rank);

            self.u_vectors = &self.qq * svd_u.select_columns(order.iter());
            self.v_vectors = svd_vt.transpose().select_columns(order.iter());
            self.singular_values =
                DVec::from_iterator(order.len(), order.iter().map(|&j| dd[j]));
        } else {
            anyhow::bail!("SVD failed");
        }

        debug!("Done: RandomizedSVD.compute()");
        Ok(())
    }

    // Find an orthonormal matrix qq whose range approximates the range of xx
    fn rand_subspace_iteration(&mut self, xx: &Mat, rank_and_oversample: usize) {
        let nc = xx.ncols();

        let omega = Mat::rnorm(nc, rank_and_oversample, self.rseed);
        let mut qq = (xx * omega).qr().q();

        for i in 0..self.iter {
            let qt = (xx.transpose() * &qq).qr().q();
            qq = (xx * qt).qr().q();
            debug!("[Done] subspace iteration {:>5}", i + 1);
        }

        let kk = rank_and_oversample.min(qq.ncols());
        self.qq = qq.columns(0, kk).into_owned();

        debug!("Found Q [{} x {}]", self.qq.nrows(), self.qq.ncols());
    }
}
