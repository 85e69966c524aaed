pub(super) fn clamp_to_bounds<const NPARAMS: usize>(
    x: &mut [f64; NPARAMS],
    lower: &[f64; NPARAMS],
    upper: &[f64; NPARAMS],
) {
    for i in 0..NPARAMS {
        x[i] = x[i].clamp(lower[i], upper[i]);
    }
}
