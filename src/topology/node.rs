//! Node references as they appear in connectivity.
//!
//! Non-negative ids name independent nodes; a negative id `-(k+1)` names
//! dependent node `k`.

/// Decoded node reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Independent(usize),
    Dependent(usize),
}

impl NodeRef {
    #[inline]
    pub fn from_raw(raw: i64) -> Self {
        if raw >= 0 {
            NodeRef::Independent(raw as usize)
        } else {
            NodeRef::Dependent((!raw) as usize)
        }
    }

    #[inline]
    pub fn to_raw(self) -> i64 {
        match self {
            NodeRef::Independent(n) => n as i64,
            NodeRef::Dependent(k) => dependent_node(k),
        }
    }
}

/// Raw id of dependent node `k`.
#[inline]
pub fn dependent_node(k: usize) -> i64 {
    !(k as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding() {
        assert_eq!(dependent_node(0), -1);
        assert_eq!(NodeRef::from_raw(-3), NodeRef::Dependent(2));
        assert_eq!(NodeRef::from_raw(0), NodeRef::Independent(0));
        assert_eq!(NodeRef::Dependent(4).to_raw(), -5);
    }

    #[test]
    fn most_negative_id_decodes() {
        assert_eq!(NodeRef::from_raw(i64::MIN), NodeRef::Dependent(i64::MAX as usize));
        assert_eq!(NodeRef::from_raw(-1), NodeRef::Dependent(0));
    }
}
