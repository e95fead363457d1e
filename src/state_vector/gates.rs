use crate::errors::{BackendError, BackendResult};
use crate::rayon_helper::*;
use crate::types::{from_f64, Precision};
use crate::utils::{deposit_bits, extract_bits, wire_bit};
use num_complex::Complex;
use num_traits::{One, Zero};
use std::f64::consts::FRAC_1_SQRT_2;

fn real<P: Precision>(x: f64) -> Complex<P> {
    Complex::new(from_f64(x), P::zero())
}

/// Gates which the state-vector backend applies.
///
/// Matrices are row-major over the sub-basis of their wires, with the first wire as the most
/// significant bit (kron product order).
#[derive(Clone, Debug, PartialEq)]
pub enum Gate<P> {
    /// Wires, `2^k x 2^k` matrix data.
    Matrix(Vec<usize>, Vec<Complex<P>>),
    /// Control wires, gate applied when all controls are `|1>`.
    Control(Vec<usize>, Box<Gate<P>>),
    /// Exchange two wires.
    Swap(usize, usize),
}

impl<P: Precision> Gate<P> {
    /// Dense matrix gate on `wires`.
    pub fn matrix(wires: Vec<usize>, data: Vec<Complex<P>>) -> Self {
        Self::Matrix(wires, data)
    }

    /// Single wire matrix from real entries.
    fn real_single(wire: usize, data: [f64; 4]) -> Self {
        Self::Matrix(vec![wire], data.iter().map(|x| real(*x)).collect())
    }

    /// Hadamard.
    pub fn h(wire: usize) -> Self {
        let m = FRAC_1_SQRT_2;
        Self::real_single(wire, [m, m, m, -m])
    }

    /// Pauli X.
    pub fn x(wire: usize) -> Self {
        Self::real_single(wire, [0.0, 1.0, 1.0, 0.0])
    }

    /// Pauli Y.
    pub fn y(wire: usize) -> Self {
        let i = Complex::i();
        Self::Matrix(vec![wire], vec![Complex::zero(), -i, i, Complex::zero()])
    }

    /// Pauli Z.
    pub fn z(wire: usize) -> Self {
        Self::real_single(wire, [1.0, 0.0, 0.0, -1.0])
    }

    /// Phase by `theta` on `|1>`.
    pub fn phase(wire: usize, theta: f64) -> Self {
        let (s, c) = theta.sin_cos();
        let p = Complex::new(from_f64(c), from_f64(s));
        Self::Matrix(vec![wire], vec![Complex::one(), Complex::zero(), Complex::zero(), p])
    }

    /// S gate.
    pub fn s(wire: usize) -> Self {
        Self::phase(wire, std::f64::consts::FRAC_PI_2)
    }

    /// T gate.
    pub fn t(wire: usize) -> Self {
        Self::phase(wire, std::f64::consts::FRAC_PI_4)
    }

    /// Rotation about X by `theta`.
    pub fn rx(wire: usize, theta: f64) -> Self {
        let (s, c) = (theta / 2.0).sin_cos();
        let (c, s): (P, P) = (from_f64(c), from_f64(s));
        let off = Complex::new(P::zero(), -s);
        Self::Matrix(
            vec![wire],
            vec![Complex::new(c, P::zero()), off, off, Complex::new(c, P::zero())],
        )
    }

    /// Rotation about Y by `theta`.
    pub fn ry(wire: usize, theta: f64) -> Self {
        let (s, c) = (theta / 2.0).sin_cos();
        Self::real_single(wire, [c, -s, s, c])
    }

    /// Rotation about Z by `theta`.
    pub fn rz(wire: usize, theta: f64) -> Self {
        let (s, c) = (theta / 2.0).sin_cos();
        let (c, s): (P, P) = (from_f64(c), from_f64(s));
        Self::Matrix(
            vec![wire],
            vec![
                Complex::new(c, -s),
                Complex::zero(),
                Complex::zero(),
                Complex::new(c, s),
            ],
        )
    }

    /// Apply `gate` only when every wire in `controls` is `|1>`.
    pub fn controlled(controls: Vec<usize>, gate: Gate<P>) -> Self {
        match gate {
            Gate::Control(mut inner_controls, inner) => {
                inner_controls.extend(controls);
                Gate::Control(inner_controls, inner)
            }
            gate => Gate::Control(controls, Box::new(gate)),
        }
    }

    /// Controlled X.
    pub fn cnot(control: usize, target: usize) -> Self {
        Self::controlled(vec![control], Self::x(target))
    }

    /// Controlled Z.
    pub fn cz(control: usize, target: usize) -> Self {
        Self::controlled(vec![control], Self::z(target))
    }

    /// Swap two wires.
    pub fn swap(a: usize, b: usize) -> Self {
        Self::Swap(a, b)
    }

    /// All wires touched by this gate, controls first.
    pub fn wires(&self) -> Vec<usize> {
        match self {
            Gate::Matrix(wires, _) => wires.clone(),
            Gate::Control(controls, gate) => {
                let mut wires = controls.clone();
                wires.extend(gate.wires());
                wires
            }
            Gate::Swap(a, b) => vec![*a, *b],
        }
    }
}

/// Check that `wires` are distinct and fit in `n` qubits.
pub(crate) fn check_wires(n: usize, wires: &[usize]) -> BackendResult<()> {
    for (i, wire) in wires.iter().enumerate() {
        if *wire >= n {
            let message = format!("wire {} out of range for {} qubits", wire, n);
            return Err(BackendError::new(message));
        }
        if wires[..i].contains(wire) {
            let message = format!("wire {} used twice in {:?}", wire, wires);
            return Err(BackendError::new(message));
        }
    }
    Ok(())
}

/// Check that `data` is a square matrix over `wires`.
pub(crate) fn check_matrix<P>(wires: &[usize], data: &[Complex<P>]) -> BackendResult<()> {
    let expected = 1 << (2 * wires.len());
    if wires.is_empty() {
        Err(BackendError::new("Must supply at least one op index"))
    } else if data.len() != expected {
        let message = format!(
            "Matrix data has {:?} entries versus expected 2^2*{:?}",
            data.len(),
            wires.len()
        );
        Err(BackendError::new(message))
    } else {
        Ok(())
    }
}

/// Index bit positions of `wires`, least significant sub-index bit first.
fn sub_positions(n: usize, wires: &[usize]) -> Vec<usize> {
    wires.iter().rev().map(|w| wire_bit(n, *w)).collect()
}

/// Multiply `data` over `wires` into `output`, rows outside `control_mask` are copied unchanged.
pub(crate) fn apply_matrix<P: Precision>(
    n: usize,
    wires: &[usize],
    data: &[Complex<P>],
    control_mask: usize,
    input: &[Complex<P>],
    output: &mut [Complex<P>],
) {
    let positions = sub_positions(n, wires);
    let dim = 1 << wires.len();
    let f = |(row, out): (usize, &mut Complex<P>)| {
        if row & control_mask != control_mask {
            *out = input[row];
        } else {
            let r = extract_bits(row, &positions);
            *out = (0..dim)
                .map(|c| data[r * dim + c] * input[deposit_bits(row, &positions, c)])
                .sum();
        }
    };
    iter_mut!(output).enumerate().for_each(f);
}

/// Apply `gate` to the `n` qubit `input`, writing into `output`.
pub(crate) fn apply_gate<P: Precision>(
    n: usize,
    gate: &Gate<P>,
    input: &[Complex<P>],
    output: &mut [Complex<P>],
) -> BackendResult<()> {
    check_wires(n, &gate.wires())?;
    let mut control_mask = 0;
    let mut gate = gate;
    while let Gate::Control(controls, inner) = gate {
        control_mask |= controls.iter().map(|c| 1 << wire_bit(n, *c)).sum::<usize>();
        gate = inner;
    }
    match gate {
        Gate::Matrix(wires, data) => {
            check_matrix(wires, data)?;
            apply_matrix(n, wires, data, control_mask, input, output);
        }
        Gate::Swap(a, b) => {
            let positions = [wire_bit(n, *a), wire_bit(n, *b)];
            let f = |(row, out): (usize, &mut Complex<P>)| {
                if row & control_mask != control_mask {
                    *out = input[row];
                } else {
                    let bits = extract_bits(row, &positions);
                    let swapped = ((bits & 1) << 1) | (bits >> 1);
                    *out = input[deposit_bits(row, &positions, swapped)];
                }
            };
            iter_mut!(output).enumerate().for_each(f);
        }
        Gate::Control(..) => return Err(BackendError::new("unresolved controlled gate")),
    }
    Ok(())
}
