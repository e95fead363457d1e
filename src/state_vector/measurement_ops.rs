use crate::rayon_helper::*;
use crate::types::Precision;
use crate::utils::wire_bit;
use num_complex::Complex;
use num_traits::Zero;

/// Get total magnitude of state.
pub fn prob_magnitude<P: Precision>(input: &[Complex<P>]) -> P {
    iter!(input).map(Complex::<P>::norm_sqr).sum()
}

/// Mask selecting the index bits of `indices`, and the bits which `measured` sets among them.
/// Bit `i` of `measured` corresponds to `indices[i]`.
fn measurement_masks(n: usize, measured: usize, indices: &[usize]) -> (usize, usize) {
    indices
        .iter()
        .enumerate()
        .fold((0, 0), |(row_mask, measured_mask), (i, index)| {
            let bit = 1 << wire_bit(n, *index);
            let sel = if (measured >> i) & 1 == 1 { bit } else { 0 };
            (row_mask | bit, measured_mask | sel)
        })
}

/// Calculate the probability of a given measurement. `measured` gives the bits (as a usize) which
/// have been measured from the qubits at `indices` in the order supplied by `indices`. `input`
/// gives the state from which to measure, representing a total of `n` qubits.
///
/// Keep in mind that qubits are big-endian to match kron product standards.
/// `|abc>` means `q0=a`, `q1=b`, `q2=c`
///
/// # Examples
/// ```
/// use qbranch::state_vector::from_reals;
/// use qbranch::state_vector::measurement_ops::measure_prob;
///
/// // Make the state |10>, index 0 is always |1> and index 1 is always |0>
/// let input = from_reals(&[0.0, 0.0, 1.0, 0.0]);
///
/// assert_eq!(measure_prob(2, 0, &[0], &input), 0.0);
/// assert_eq!(measure_prob(2, 1, &[0], &input), 1.0);
/// assert_eq!(measure_prob(2, 1, &[0, 1], &input), 1.0);
/// assert_eq!(measure_prob(2, 2, &[1, 0], &input), 1.0);
/// ```
pub fn measure_prob<P: Precision>(
    n: usize,
    measured: usize,
    indices: &[usize],
    input: &[Complex<P>],
) -> P {
    let (row_mask, measured_mask) = measurement_masks(n, measured, indices);
    iter!(input)
        .enumerate()
        .filter(|(row, _)| row & row_mask == measured_mask)
        .map(|(_, amp)| amp.norm_sqr())
        .sum()
}

/// Get probability for each possible measurement of `indices` on `input`.
pub fn measure_probs<P: Precision>(n: usize, indices: &[usize], input: &[Complex<P>]) -> Vec<P> {
    let mut probs = vec![P::zero(); 1 << indices.len()];
    // Single pass over the state, binning each amplitude by its measured bits.
    let positions: Vec<usize> = indices.iter().map(|index| wire_bit(n, *index)).collect();
    input.iter().enumerate().for_each(|(row, amp)| {
        let m = positions
            .iter()
            .enumerate()
            .fold(0, |acc, (i, pos)| acc | (((row >> pos) & 1) << i));
        probs[m] += amp.norm_sqr();
    });
    probs
}

/// Normalize the output state such that it matches only states which produce the `measured`
/// result and has the same magnitude.
/// This is done by zeroing out the states which cannot give `measured`, and dividing the remaining
/// by `sqrt(p)` for p=`measured_prob`. See `measure_prob` for details.
///
/// Leaves `output` untouched if `measured_prob` is zero.
pub fn measure_state<P: Precision>(
    n: usize,
    indices: &[usize],
    measured: (usize, P),
    input: &[Complex<P>],
    output: &mut [Complex<P>],
) {
    let (measured, measured_prob) = measured;
    if !measured_prob.is_zero() {
        let p_mult = P::one() / measured_prob.sqrt();
        let (row_mask, measured_mask) = measurement_masks(n, measured, indices);

        let f = |(row, (input, output)): (usize, (&Complex<P>, &mut Complex<P>))| {
            if row & row_mask != measured_mask {
                // This is not a valid measurement, zero out the entry.
                *output = Complex::zero();
            } else {
                *output = (*input) * p_mult;
            }
        };

        iter!(input).zip(iter_mut!(output)).enumerate().for_each(f);
    }
}
