//! Dirichlet boundary conditions keyed by node.
//!
//! Each constrained node carries a bitmask of constrained DOFs and one
//! prescribed value per DOF (zero for unconstrained DOFs).

use std::collections::BTreeMap;

use crate::mesh_error::AssemblerError;

/// Largest number of DOFs per node a mask can describe.
pub const MAX_BC_DOFS: usize = 32;

/// Constrained DOFs of one node.
#[derive(Clone, Debug, PartialEq)]
pub struct BcEntry {
    pub mask: u32,
    pub values: Vec<f64>,
}

impl BcEntry {
    #[inline]
    pub fn is_constrained(&self, dof: usize) -> bool {
        dof < MAX_BC_DOFS && self.mask & (1 << dof) != 0
    }

    /// Constrained DOF indices in increasing order.
    pub fn dofs(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.values.len()).filter(|&d| self.is_constrained(d))
    }
}

/// Boundary conditions for the nodes one rank knows about.
#[derive(Clone, Debug, PartialEq)]
pub struct BcMap {
    vars_per_node: usize,
    entries: BTreeMap<usize, BcEntry>,
}

impl BcMap {
    pub fn new(vars_per_node: usize) -> Result<Self, AssemblerError> {
        if vars_per_node == 0 || vars_per_node > MAX_BC_DOFS {
            return Err(AssemblerError::InvalidOption(format!(
                "vars per node must be in 1..={MAX_BC_DOFS}, got {vars_per_node}"
            )));
        }
        Ok(Self {
            vars_per_node,
            entries: BTreeMap::new(),
        })
    }

    pub fn vars_per_node(&self) -> usize {
        self.vars_per_node
    }

    /// Constrain `dofs` of `node`. With no values the prescribed values are
    /// zero. Constraining an already constrained node merges the masks; new
    /// values replace old ones.
    pub fn add(
        &mut self,
        node: usize,
        dofs: &[usize],
        values: Option<&[f64]>,
    ) -> Result<(), AssemblerError> {
        if let Some(v) = values {
            if v.len() != dofs.len() {
                return Err(AssemblerError::InvalidOption(format!(
                    "{} BC values for {} dofs",
                    v.len(),
                    dofs.len()
                )));
            }
        }
        let vpn = self.vars_per_node;
        let entry = self.entries.entry(node).or_insert_with(|| BcEntry {
            mask: 0,
            values: vec![0.0; vpn],
        });
        for (i, &d) in dofs.iter().enumerate() {
            if d >= vpn {
                return Err(AssemblerError::InvalidOption(format!(
                    "BC dof {d} out of range for {vpn} vars per node"
                )));
            }
            entry.mask |= 1 << d;
            entry.values[d] = values.map_or(0.0, |v| v[i]);
        }
        Ok(())
    }

    /// Insert a full entry, merging with an existing one.
    pub fn insert(&mut self, node: usize, mask: u32, values: &[f64]) {
        let vpn = self.vars_per_node;
        let entry = self.entries.entry(node).or_insert_with(|| BcEntry {
            mask: 0,
            values: vec![0.0; vpn],
        });
        entry.mask |= mask;
        for (d, &v) in values.iter().enumerate().take(vpn) {
            if mask & (1 << d) != 0 {
                entry.values[d] = v;
            }
        }
    }

    pub fn get(&self, node: usize) -> Option<&BcEntry> {
        self.entries.get(&node)
    }

    pub fn is_constrained(&self, node: usize, dof: usize) -> bool {
        self.entries.get(&node).is_some_and(|e| e.is_constrained(dof))
    }

    /// Entries in increasing node order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &BcEntry)> {
        self.entries.iter().map(|(&n, e)| (n, e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite node ids; entries that collide are merged.
    pub fn try_map_nodes<F>(&self, mut f: F) -> Result<Self, AssemblerError>
    where
        F: FnMut(usize) -> Result<usize, AssemblerError>,
    {
        let mut out = Self {
            vars_per_node: self.vars_per_node,
            entries: BTreeMap::new(),
        };
        for (n, e) in self.iter() {
            out.insert(f(n)?, e.mask, &e.values);
        }
        Ok(out)
    }
}
