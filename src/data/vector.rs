//! Node-blocked distributed vectors.
//!
//! A [`DistVec`] stores the `bsize` values of every node this rank owns, in
//! global-id order. Ghost values only exist inside the assembler's local
//! (extended) work arrays.

use std::ops::Range;

use crate::algs::collective::all_reduce_sum;
use crate::algs::communicator::{Communicator, tags};
use crate::data::bc::BcMap;
use crate::mesh_error::AssemblerError;

#[derive(Clone, Debug, PartialEq)]
pub struct DistVec {
    owned: Range<usize>,
    bsize: usize,
    data: Vec<f64>,
}

impl DistVec {
    /// Zero vector over the owned global ids `owned`.
    pub fn new(owned: Range<usize>, bsize: usize) -> Self {
        let data = vec![0.0; owned.len() * bsize];
        Self { owned, bsize, data }
    }

    pub fn bsize(&self) -> usize {
        self.bsize
    }

    /// Owned global node ids.
    pub fn owned_range(&self) -> Range<usize> {
        self.owned.clone()
    }

    /// Number of owned entries (`nodes * bsize`).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.data
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Values of an owned global node.
    pub fn node(&self, global: usize) -> Option<&[f64]> {
        self.offset(global)
            .map(|o| &self.data[o * self.bsize..(o + 1) * self.bsize])
    }

    pub fn node_mut(&mut self, global: usize) -> Option<&mut [f64]> {
        let bs = self.bsize;
        self.offset(global)
            .map(move |o| &mut self.data[o * bs..(o + 1) * bs])
    }

    fn offset(&self, global: usize) -> Option<usize> {
        self.owned.contains(&global).then(|| global - self.owned.start)
    }

    pub fn zero_entries(&mut self) {
        self.data.fill(0.0);
    }

    pub fn set_all(&mut self, v: f64) {
        self.data.fill(v);
    }

    pub fn scale(&mut self, a: f64) {
        self.data.iter_mut().for_each(|x| *x *= a);
    }

    /// `self += a * x`.
    pub fn axpy(&mut self, a: f64, x: &DistVec) -> Result<(), AssemblerError> {
        self.check_same_layout(x)?;
        self.data
            .iter_mut()
            .zip(&x.data)
            .for_each(|(y, xv)| *y += a * xv);
        Ok(())
    }

    pub fn copy_values(&mut self, x: &DistVec) -> Result<(), AssemblerError> {
        self.check_same_layout(x)?;
        self.data.copy_from_slice(&x.data);
        Ok(())
    }

    /// Collective dot product.
    pub fn dot<C: Communicator + ?Sized>(&self, comm: &C, x: &DistVec) -> Result<f64, AssemblerError> {
        self.check_same_layout(x)?;
        let local: f64 = self.data.iter().zip(&x.data).map(|(a, b)| a * b).sum();
        Ok(all_reduce_sum(comm, tags::REDUCE, &[local])?[0])
    }

    /// Collective 2-norm.
    pub fn norm<C: Communicator + ?Sized>(&self, comm: &C) -> Result<f64, AssemblerError> {
        Ok(self.dot(comm, self)?.sqrt())
    }

    /// Zero every constrained entry of the owned nodes in `bcs` (global ids).
    pub fn apply_bcs(&mut self, bcs: &BcMap) {
        let bs = self.bsize;
        for (node, entry) in bcs.iter() {
            if let Some(vals) = self.node_mut(node) {
                for d in entry.dofs().filter(|&d| d < bs) {
                    vals[d] = 0.0;
                }
            }
        }
    }

    fn check_same_layout(&self, x: &DistVec) -> Result<(), AssemblerError> {
        if x.owned != self.owned || x.bsize != self.bsize {
            return Err(AssemblerError::VectorLayoutMismatch {
                expected: self.data.len(),
                got: x.data.len(),
            });
        }
        Ok(())
    }
}
