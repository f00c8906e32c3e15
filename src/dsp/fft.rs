//! Radix-2 FFT and harmonic distortion.
//!
//! Only what THD needs: an in-place complex transform over at most
//! [`FFT_LEN`] points, a Hann window and lobe-summed bin power.

use core::f32::consts::PI;

/// Largest transform size. Blocks longer than this are truncated.
pub const FFT_LEN: usize = 1024;

/// Smallest transform that still resolves the 15th harmonic usefully.
const MIN_FFT_LEN: usize = 64;

/// Highest harmonic included in THD.
pub const MAX_HARMONIC: usize = 15;

/// In-place iterative Cooley-Tukey. `re.len()` must be a power of two and
/// equal to `im.len()`.
pub fn fft_in_place(re: &mut [f32], im: &mut [f32]) {
    let n = re.len();
    debug_assert!(n.is_power_of_two() && im.len() == n);
    if n < 2 {
        return;
    }

    // Bit-reversal permutation.
    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = i.reverse_bits() >> (usize::BITS - bits);
        if j > i {
            re.swap(i, j);
            im.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let step = -2.0 * PI / len as f32;
        let half = len / 2;
        for start in (0..n).step_by(len) {
            for k in 0..half {
                let (sin, cos) = (step * k as f32).sin_cos();
                let a = start + k;
                let b = a + half;
                let tr = re[b] * cos - im[b] * sin;
                let ti = re[b] * sin + im[b] * cos;
                re[b] = re[a] - tr;
                im[b] = im[a] - ti;
                re[a] += tr;
                im[a] += ti;
            }
        }
        len <<= 1;
    }
}

/// Hann window coefficient for sample `i` of `n`.
pub fn hann(i: usize, n: usize) -> f32 {
    0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos()
}

/// Transform length used for a block of `available` samples.
pub fn transform_len(available: usize) -> Option<usize> {
    let n = available.min(FFT_LEN);
    if n < MIN_FFT_LEN {
        return None;
    }
    // Largest power of two not above n.
    Some(1 << (usize::BITS - 1 - n.leading_zeros()))
}

/// Total harmonic distortion in percent.
///
/// `sample` yields the DC-free signal value at index `i`; only the first
/// [`transform_len`] samples are used. The fundamental is the strongest bin
/// within ±2 bins of `nominal_hz`. Each harmonic's power is summed over the
/// 3-bin Hann main lobe; harmonics at or above Nyquist are skipped.
pub fn thd_percent(available: usize, sample: impl Fn(usize) -> f32, sample_rate_hz: f32, nominal_hz: f32) -> f32 {
    let Some(n) = transform_len(available) else {
        return 0.0;
    };
    let mut re = [0.0f32; FFT_LEN];
    let mut im = [0.0f32; FFT_LEN];
    for (i, slot) in re[..n].iter_mut().enumerate() {
        *slot = sample(i) * hann(i, n);
    }
    fft_in_place(&mut re[..n], &mut im[..n]);

    let half = n / 2;
    let power = |k: usize| re[k] * re[k] + im[k] * im[k];
    let lobe = |k: usize| -> f32 { (k.saturating_sub(1)..=(k + 1).min(half - 1)).map(power).sum() };

    let bin_hz = sample_rate_hz / n as f32;
    let expected = (nominal_hz / bin_hz).round() as usize;
    let lo = expected.saturating_sub(2).max(1);
    let hi = (expected + 2).min(half - 2);
    if lo > hi {
        return 0.0;
    }
    let mut fundamental_bin = lo;
    for k in lo..=hi {
        if power(k) > power(fundamental_bin) {
            fundamental_bin = k;
        }
    }

    let fundamental = lobe(fundamental_bin);
    if fundamental <= f32::EPSILON {
        return 0.0;
    }
    let mut harmonics = 0.0;
    for h in 2..=MAX_HARMONIC {
        let k = fundamental_bin * h;
        if k + 1 >= half {
            break;
        }
        harmonics += lobe(k);
    }
    (harmonics / fundamental).sqrt() * 100.0
}
