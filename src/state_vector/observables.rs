use crate::errors::BackendResult;
use crate::rayon_helper::*;
use crate::state_vector::gates::{apply_matrix, check_matrix, check_wires};
use crate::types::Precision;
use crate::utils::wire_bit;
use num_complex::Complex;
use num_traits::Zero;

/// Observables whose expectation values the state-vector backend computes.
#[derive(Clone, Debug, PartialEq)]
pub enum Observable<P> {
    /// Tensor product of Pauli Z over the wires.
    Z(Vec<usize>),
    /// Hermitian matrix over the wires, row-major in kron order.
    Hermitian(Vec<usize>, Vec<Complex<P>>),
}

impl<P: Precision> Observable<P> {
    /// Pauli Z on a single wire.
    pub fn z(wire: usize) -> Self {
        Self::Z(vec![wire])
    }

    /// Product of Pauli Z over `wires`.
    pub fn z_product(wires: Vec<usize>) -> Self {
        Self::Z(wires)
    }

    /// Projector onto `|1>` of `wire`, its expectation is the probability of observing `1`.
    pub fn projector_one(wire: usize) -> Self {
        Self::Hermitian(
            vec![wire],
            vec![Complex::zero(), Complex::zero(), Complex::zero(), Complex::new(P::one(), P::zero())],
        )
    }
}

/// `<psi|O|psi>` for an `n` qubit state.
pub(crate) fn expectation<P: Precision>(
    n: usize,
    observable: &Observable<P>,
    state: &[Complex<P>],
) -> BackendResult<P> {
    match observable {
        Observable::Z(wires) => {
            check_wires(n, wires)?;
            let mask: usize = wires.iter().map(|w| 1 << wire_bit(n, *w)).sum();
            Ok(iter!(state)
                .enumerate()
                .map(|(row, amp)| {
                    let p = amp.norm_sqr();
                    if (row & mask).count_ones() % 2 == 0 {
                        p
                    } else {
                        -p
                    }
                })
                .sum())
        }
        Observable::Hermitian(wires, data) => {
            check_wires(n, wires)?;
            check_matrix(wires, data)?;
            let mut applied = vec![Complex::zero(); state.len()];
            apply_matrix(n, wires, data, 0, state, &mut applied);
            Ok(iter!(state)
                .zip(iter!(applied))
                .map(|(a, b)| (a.conj() * b).re)
                .sum())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_vector::from_reals;

    #[test]
    fn z_parity() {
        // |01>
        let state = from_reals(&[0.0, 1.0, 0.0, 0.0]);
        assert_eq!(expectation(2, &Observable::z(0), &state).unwrap(), 1.0);
        assert_eq!(expectation(2, &Observable::z(1), &state).unwrap(), -1.0);
        assert_eq!(
            expectation(2, &Observable::z_product(vec![0, 1]), &state).unwrap(),
            -1.0
        );
    }

    #[test]
    fn projector_gives_probability() {
        let m = std::f64::consts::FRAC_1_SQRT_2;
        let state = from_reals(&[m, m]);
        let p = expectation(1, &Observable::projector_one(0), &state).unwrap();
        assert!((p - 0.5).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_is_error() {
        let state = from_reals(&[1.0, 0.0]);
        assert!(expectation(1, &Observable::<f64>::z(3), &state).is_err());
    }
}
