//! Math utility functions

/// Softmax function, shifted by the maximum for numerical stability
pub fn softmax(x: &[f32]) -> Vec<f32> {
    let max_val = x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp_vals: Vec<f32> = x.iter().map(|v| (v - max_val).exp()).collect();
    let sum: f32 = exp_vals.iter().sum();
    exp_vals.iter().map(|v| v / sum).collect()
}

/// Argmax - index of the maximum value, lowest index on ties
pub fn argmax(x: &[f32]) -> usize {
    let mut best = 0;
    for (idx, v) in x.iter().enumerate().skip(1) {
        if *v > x[best] {
            best = idx;
        }
    }
    best
}
