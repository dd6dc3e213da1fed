//! Typed collectives over [`Communicator`].
//!
//! Payloads are `bytemuck::Pod` records. Reductions are folded in rank order
//! on every rank, so all ranks observe bit-identical results.

use bytemuck::Pod;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{cast_slice, decode_records};
use crate::mesh_error::AssemblerError;

/// Exchange one variable-length record list with every rank.
///
/// `sends[p]` goes to rank `p`; the result is indexed by source rank.
pub fn all_to_all_v<T: Pod, C: Communicator + ?Sized>(
    comm: &C,
    tag: CommTag,
    sends: &[Vec<T>],
) -> Result<Vec<Vec<T>>, AssemblerError> {
    let bytes: Vec<Vec<u8>> = sends.iter().map(|s| cast_slice(s).to_vec()).collect();
    let recvd = comm.all_to_all_bytes(tag, &bytes)?;
    recvd
        .iter()
        .enumerate()
        .map(|(src, b)| decode_records(src, b))
        .collect()
}

/// Gather one record list from every rank.
pub fn all_gather_v<T: Pod, C: Communicator + ?Sized>(
    comm: &C,
    tag: CommTag,
    data: &[T],
) -> Result<Vec<Vec<T>>, AssemblerError> {
    let recvd = comm.all_gather_bytes(tag, cast_slice(data))?;
    recvd
        .iter()
        .enumerate()
        .map(|(src, b)| decode_records(src, b))
        .collect()
}

/// Gather a single value from every rank.
pub fn all_gather<T: Pod, C: Communicator + ?Sized>(
    comm: &C,
    tag: CommTag,
    value: T,
) -> Result<Vec<T>, AssemblerError> {
    let per_rank = all_gather_v(comm, tag, std::slice::from_ref(&value))?;
    per_rank
        .into_iter()
        .enumerate()
        .map(|(src, v)| {
            v.first().copied().ok_or(AssemblerError::BufferSizeMismatch {
                neighbor: src,
                expected: size_of::<T>(),
                got: 0,
            })
        })
        .collect()
}

fn all_reduce_with<C: Communicator + ?Sized>(
    comm: &C,
    tag: CommTag,
    local: &[f64],
    op: impl Fn(f64, f64) -> f64,
) -> Result<Vec<f64>, AssemblerError> {
    let per_rank = all_gather_v(comm, tag, local)?;
    let mut out: Option<Vec<f64>> = None;
    for (src, v) in per_rank.into_iter().enumerate() {
        if v.len() != local.len() {
            return Err(AssemblerError::BufferSizeMismatch {
                neighbor: src,
                expected: local.len() * size_of::<f64>(),
                got: v.len() * size_of::<f64>(),
            });
        }
        out = Some(match out {
            None => v,
            Some(acc) => acc.iter().zip(&v).map(|(&a, &b)| op(a, b)).collect(),
        });
    }
    Ok(out.unwrap_or_default())
}

/// Element-wise sum across ranks.
pub fn all_reduce_sum<C: Communicator + ?Sized>(
    comm: &C,
    tag: CommTag,
    local: &[f64],
) -> Result<Vec<f64>, AssemblerError> {
    all_reduce_with(comm, tag, local, |a, b| a + b)
}

/// Element-wise maximum across ranks.
pub fn all_reduce_max<C: Communicator + ?Sized>(
    comm: &C,
    tag: CommTag,
    local: &[f64],
) -> Result<Vec<f64>, AssemblerError> {
    all_reduce_with(comm, tag, local, f64::max)
}

/// Element-wise minimum across ranks.
pub fn all_reduce_min<C: Communicator + ?Sized>(
    comm: &C,
    tag: CommTag,
    local: &[f64],
) -> Result<Vec<f64>, AssemblerError> {
    all_reduce_with(comm, tag, local, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, RayonComm};

    #[test]
    fn serial_reduce_is_identity() {
        let out = all_reduce_sum(&NoComm, CommTag::new(1), &[1.0, 2.0]).unwrap();
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn reductions_over_three_ranks() {
        let handles: Vec<_> = RayonComm::group(3)
            .into_iter()
            .map(|c| {
                std::thread::spawn(move || {
                    let r = c.rank() as f64;
                    let sum = all_reduce_sum(&c, CommTag::new(1), &[r, 1.0]).unwrap();
                    let max = all_reduce_max(&c, CommTag::new(2), &[r]).unwrap();
                    let min = all_reduce_min(&c, CommTag::new(3), &[r]).unwrap();
                    let counts = all_gather(&c, CommTag::new(4), c.rank() as u64 * 10).unwrap();
                    (sum, max, min, counts)
                })
            })
            .collect();
        for h in handles {
            let (sum, max, min, counts) = h.join().unwrap();
            assert_eq!(sum, vec![3.0, 3.0]);
            assert_eq!(max, vec![2.0]);
            assert_eq!(min, vec![0.0]);
            assert_eq!(counts, vec![0, 10, 20]);
        }
    }
}
