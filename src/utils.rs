use crate::types::{from_f64, MeasurementId, OutcomeRecord, Precision};
use rand::Rng;

/// Extracts bits from a number in a particular order.
///
/// # Example
///
/// ```
/// use qbranch::utils::extract_bits;
///
/// assert_eq!(extract_bits(0b1010, &[3, 0]), 0b01);
/// ```
#[inline]
pub fn extract_bits(num: usize, indices: &[usize]) -> usize {
    indices.iter().enumerate().fold(0, |acc, (i, index)| {
        let bit = (num >> index) & 1;
        acc | (bit << i)
    })
}

/// Writes the low bits of `bits` into `num` at positions `indices`, bit `i` going to
/// `indices[i]`. The inverse of `extract_bits`.
///
/// # Example
///
/// ```
/// use qbranch::utils::{deposit_bits, extract_bits};
///
/// let num = deposit_bits(0b0000, &[3, 0], 0b01);
/// assert_eq!(num, 0b1000);
/// assert_eq!(extract_bits(num, &[3, 0]), 0b01);
/// ```
#[inline]
pub fn deposit_bits(num: usize, indices: &[usize], bits: usize) -> usize {
    indices.iter().enumerate().fold(num, |acc, (i, index)| {
        let bit = (bits >> i) & 1;
        (acc & !(1 << index)) | (bit << index)
    })
}

/// Index bit of `wire` in an `n` wire big-endian state, `|abc>` means `q0=a`, `q1=b`, `q2=c`.
#[inline]
pub fn wire_bit(n: usize, wire: usize) -> usize {
    n - 1 - wire
}

/// Pack the recorded outcomes of `ids` into an integer, bit `i` taken from `ids[i]`.
/// Returns `None` if one of `ids` has no recorded outcome.
pub fn pack_outcomes(ids: &[MeasurementId], outcomes: &[OutcomeRecord]) -> Option<usize> {
    ids.iter().enumerate().try_fold(0, |acc, (i, id)| {
        outcomes
            .iter()
            .find(|(recorded, _)| recorded == id)
            .map(|(_, outcome)| acc | ((outcome & 1) << i))
    })
}

/// Number of packed values over `len` bits, `None` if they do not fit in a `usize`.
///
/// ```
/// use qbranch::utils::outcome_space;
///
/// assert_eq!(outcome_space(3), Some(8));
/// assert_eq!(outcome_space(64), None);
/// ```
pub fn outcome_space(len: usize) -> Option<usize> {
    u32::try_from(len)
        .ok()
        .and_then(|bits| 1usize.checked_shl(bits))
}

/// Draw an index from `probs`, considering only entries above `tolerance` and renormalizing
/// over them. Consumes exactly one value from `rng`. `None` if nothing is above `tolerance`.
pub fn sample_index<P: Precision, R: Rng + ?Sized>(
    probs: &[P],
    tolerance: P,
    rng: &mut R,
) -> Option<usize> {
    let total: P = probs.iter().copied().filter(|p| *p > tolerance).sum();
    let mut r = from_f64::<P>(rng.gen::<f64>()) * total;
    if !(total > P::zero()) {
        return None;
    }
    let mut drawn = None;
    for (i, p) in probs.iter().enumerate().filter(|(_, p)| **p > tolerance) {
        drawn = Some(i);
        r -= *p;
        if r < P::zero() {
            break;
        }
    }
    drawn
}
