//! CSR element → node connectivity.

use crate::mesh_error::AssemblerError;
use crate::topology::node::NodeRef;

/// Element connectivity: `ptr[e]..ptr[e + 1]` indexes the node run of element `e`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ElementConnectivity {
    ptr: Vec<usize>,
    nodes: Vec<i64>,
}

impl ElementConnectivity {
    /// Build from CSR arrays, checking only that they agree with each other.
    pub fn new(rank: usize, ptr: Vec<usize>, nodes: Vec<i64>) -> Result<Self, AssemblerError> {
        let mismatch = |msg: String| AssemblerError::ConnectivityMismatch { rank, msg };
        match ptr.first() {
            Some(0) => {}
            Some(&p0) => return Err(mismatch(format!("ptr[0] must be 0, got {p0}"))),
            None => return Err(mismatch("ptr must have numElements + 1 entries".into())),
        }
        if let Some(e) = ptr.windows(2).position(|w| w[1] < w[0]) {
            return Err(mismatch(format!("ptr decreases at element {e}")));
        }
        let last = ptr[ptr.len() - 1];
        if last != nodes.len() {
            return Err(mismatch(format!(
                "ptr ends at {last} but {} node ids were given",
                nodes.len()
            )));
        }
        Ok(Self { ptr, nodes })
    }

    /// Build from one node list per element.
    pub fn from_elements<I, E>(rank: usize, elems: I) -> Result<Self, AssemblerError>
    where
        I: IntoIterator<Item = E>,
        E: AsRef<[i64]>,
    {
        let mut ptr = vec![0];
        let mut nodes = Vec::new();
        for e in elems {
            nodes.extend_from_slice(e.as_ref());
            ptr.push(nodes.len());
        }
        Self::new(rank, ptr, nodes)
    }

    pub fn num_elements(&self) -> usize {
        self.ptr.len() - 1
    }

    #[inline]
    pub fn element(&self, e: usize) -> &[i64] {
        &self.nodes[self.ptr[e]..self.ptr[e + 1]]
    }

    pub fn ptr(&self) -> &[usize] {
        &self.ptr
    }

    pub fn nodes(&self) -> &[i64] {
        &self.nodes
    }

    /// Largest per-element node count.
    pub fn max_element_nodes(&self) -> usize {
        self.ptr.windows(2).map(|w| w[1] - w[0]).max().unwrap_or(0)
    }

    /// Check every reference against the global node count and the number of
    /// dependent nodes.
    pub fn check_refs(
        &self,
        rank: usize,
        num_nodes: usize,
        num_dep: usize,
    ) -> Result<(), AssemblerError> {
        for &raw in &self.nodes {
            match NodeRef::from_raw(raw) {
                NodeRef::Independent(n) if n >= num_nodes => {
                    return Err(AssemblerError::NodeOutOfRange {
                        rank,
                        node: raw,
                        num_nodes,
                    });
                }
                NodeRef::Dependent(k) if k >= num_dep => {
                    return Err(AssemblerError::DependentNodeOutOfRange {
                        rank,
                        node: raw,
                        num_dep,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Rewrite every independent reference; dependent references are kept.
    pub fn try_map_independent<F>(&self, mut f: F) -> Result<Self, AssemblerError>
    where
        F: FnMut(usize) -> Result<usize, AssemblerError>,
    {
        let nodes = self
            .nodes
            .iter()
            .map(|&raw| match NodeRef::from_raw(raw) {
                NodeRef::Independent(n) => f(n).map(|m| m as i64),
                NodeRef::Dependent(_) => Ok(raw),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            ptr: self.ptr.clone(),
            nodes,
        })
    }
}
