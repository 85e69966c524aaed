use ndarray::Array1;

/// Observed data for one fit: abscissa `t` (energy axis here), measured
/// values `m` and inverse errors `inv_err` weighting the residuals.
#[derive(Clone, Debug)]
pub struct Data {
    pub t: Array1<f64>,
    pub m: Array1<f64>,
    pub inv_err: Array1<f64>,
}

impl Data {
    /// Unit-weight data.
    pub fn unweighted(t: Array1<f64>, m: Array1<f64>) -> Self {
        let n = t.len();
        assert_eq!(n, m.len(), "t and m must have the same length");
        Self {
            t,
            m,
            inv_err: Array1::ones(n),
        }
    }
}
